//! Sandboxed evaluation of template expressions.
//!
//! The scope is the event payload's top-level fields plus a fixed set of
//! safe math/string functions. There is no access to anything else.

use serde_json::Value;

use crate::error::TemplateError;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Names of the functions exposed to expressions.
pub const SAFE_FUNCTIONS: &[&str] = &[
    "min",
    "max",
    "abs",
    "floor",
    "ceil",
    "round",
    "len",
    "upper",
    "lower",
    "trim",
    "to_int",
    "to_string",
];

/// Evaluate an expression against the event payload.
pub fn eval(expr: &Expr, scope: &Value) -> Result<Value, TemplateError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(i) => Ok(Value::from(*i)),
        Expr::Float(f) => Ok(Value::from(*f)),
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::Eval(format!("unknown variable `{name}`"))),
        Expr::Field(base, field) => {
            let base = eval(base, scope)?;
            base.get(field)
                .cloned()
                .ok_or_else(|| TemplateError::Eval(format!("unknown field `{field}`")))
        }
        Expr::Unary(op, inner) => eval_unary(*op, inner, scope),
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope),
        Expr::Call(name, args) => eval_call(name, args, scope),
    }
}

/// Statically check an expression without evaluating it: every called
/// function must be in the safe set with a plausible arity. Used by the
/// template validation pass.
pub fn check(expr: &Expr) -> Result<(), TemplateError> {
    match expr {
        Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::String(_)
        | Expr::Ident(_) => Ok(()),
        Expr::Field(base, _) | Expr::Unary(_, base) => check(base),
        Expr::Binary(_, lhs, rhs) => {
            check(lhs)?;
            check(rhs)
        }
        Expr::Call(name, args) => {
            if !SAFE_FUNCTIONS.contains(&name.as_str()) {
                return Err(TemplateError::Eval(format!("unknown function `{name}`")));
            }
            let expected = expected_arity(name);
            if args.len() != expected {
                return Err(TemplateError::Eval(format!(
                    "`{name}` expects {expected} argument(s), got {}",
                    args.len()
                )));
            }
            for arg in args {
                check(arg)?;
            }
            Ok(())
        }
    }
}

fn expected_arity(name: &str) -> usize {
    match name {
        "min" | "max" => 2,
        _ => 1,
    }
}

/// Truthiness for logical operators: booleans as-is, null false, numbers
/// nonzero, strings and arrays non-empty.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(value: &Value) -> Result<f64, TemplateError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TemplateError::Eval("number out of range".into())),
        // Numeric strings participate in arithmetic; event payloads often
        // carry counts as strings.
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| TemplateError::Eval(format!("`{s}` is not a number"))),
        other => Err(TemplateError::Eval(format!(
            "expected a number, got {other}"
        ))),
    }
}

/// Both operands as i64 when they are exact integers (including numeric
/// strings like "50").
fn both_i64(lhs: &Value, rhs: &Value) -> Option<(i64, i64)> {
    let to_i64 = |v: &Value| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Some((to_i64(lhs)?, to_i64(rhs)?))
}

fn eval_unary(op: UnaryOp, inner: &Expr, scope: &Value) -> Result<Value, TemplateError> {
    let value = eval(inner, scope)?;
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
        UnaryOp::Neg => {
            if let Value::Number(n) = &value {
                if let Some(i) = n.as_i64() {
                    return Ok(Value::from(-i));
                }
            }
            Ok(Value::from(-as_f64(&value)?))
        }
    }
}

#[allow(clippy::too_many_lines)]
fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &Value,
) -> Result<Value, TemplateError> {
    // Short-circuit logical operators before evaluating the right side.
    match op {
        BinaryOp::And => {
            let l = eval(lhs, scope)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            let r = eval(rhs, scope)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        BinaryOp::Or => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            let r = eval(rhs, scope)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        _ => {}
    }

    let l = eval(lhs, scope)?;
    let r = eval(rhs, scope)?;

    match op {
        BinaryOp::Add => {
            // String + anything is concatenation, except two numeric strings.
            if let (Value::String(a), Value::String(b)) = (&l, &r) {
                if both_i64(&l, &r).is_none()
                    && (a.trim().parse::<f64>().is_err() || b.trim().parse::<f64>().is_err())
                {
                    return Ok(Value::String(format!("{a}{b}")));
                }
            } else if let Value::String(a) = &l {
                if a.trim().parse::<f64>().is_err() {
                    return Ok(Value::String(format!("{a}{}", stringify(&r))));
                }
            }
            if let Some((a, b)) = both_i64(&l, &r) {
                return a
                    .checked_add(b)
                    .map(Value::from)
                    .ok_or_else(|| TemplateError::Eval("integer overflow".into()));
            }
            Ok(Value::from(as_f64(&l)? + as_f64(&r)?))
        }
        BinaryOp::Sub => {
            if let Some((a, b)) = both_i64(&l, &r) {
                return a
                    .checked_sub(b)
                    .map(Value::from)
                    .ok_or_else(|| TemplateError::Eval("integer overflow".into()));
            }
            Ok(Value::from(as_f64(&l)? - as_f64(&r)?))
        }
        BinaryOp::Mul => {
            if let Some((a, b)) = both_i64(&l, &r) {
                return a
                    .checked_mul(b)
                    .map(Value::from)
                    .ok_or_else(|| TemplateError::Eval("integer overflow".into()));
            }
            Ok(Value::from(as_f64(&l)? * as_f64(&r)?))
        }
        BinaryOp::Div => {
            let divisor = as_f64(&r)?;
            if divisor == 0.0 {
                return Err(TemplateError::Eval("division by zero".into()));
            }
            if let Some((a, b)) = both_i64(&l, &r) {
                if b != 0 && a % b == 0 {
                    return Ok(Value::from(a / b));
                }
            }
            Ok(Value::from(as_f64(&l)? / divisor))
        }
        BinaryOp::Mod => {
            if let Some((a, b)) = both_i64(&l, &r) {
                if b == 0 {
                    return Err(TemplateError::Eval("division by zero".into()));
                }
                return Ok(Value::from(a % b));
            }
            let divisor = as_f64(&r)?;
            if divisor == 0.0 {
                return Err(TemplateError::Eval("division by zero".into()));
            }
            Ok(Value::from(as_f64(&l)? % divisor))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            // Strings compare lexicographically only when neither side is
            // numeric.
            let result = match (&l, &r) {
                (Value::String(a), Value::String(b))
                    if a.trim().parse::<f64>().is_err() || b.trim().parse::<f64>().is_err() =>
                {
                    compare_ord(op, a.as_str().cmp(b.as_str()))
                }
                _ => {
                    let (a, b) = (as_f64(&l)?, as_f64(&r)?);
                    match op {
                        BinaryOp::Lt => a < b,
                        BinaryOp::Le => a <= b,
                        BinaryOp::Gt => a > b,
                        _ => a >= b,
                    }
                }
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn compare_ord(op: BinaryOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering;
    match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    }
}

/// Equality with numeric coercion: `"50" == 50` holds, mirroring how event
/// payloads carry numbers as strings.
fn loose_eq(l: &Value, r: &Value) -> bool {
    if l == r {
        return true;
    }
    if let (Ok(a), Ok(b)) = (as_f64(l), as_f64(r)) {
        return a == b;
    }
    false
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn eval_call(name: &str, args: &[Expr], scope: &Value) -> Result<Value, TemplateError> {
    let expected = expected_arity(name);
    if SAFE_FUNCTIONS.contains(&name) && args.len() != expected {
        return Err(TemplateError::Eval(format!(
            "`{name}` expects {expected} argument(s), got {}",
            args.len()
        )));
    }
    let values: Vec<Value> = args
        .iter()
        .map(|a| eval(a, scope))
        .collect::<Result<_, _>>()?;

    match name {
        "min" | "max" => {
            let (a, b) = (as_f64(&values[0])?, as_f64(&values[1])?);
            let result = if name == "min" { a.min(b) } else { a.max(b) };
            Ok(number(result))
        }
        "abs" => Ok(number(as_f64(&values[0])?.abs())),
        "floor" => Ok(number(as_f64(&values[0])?.floor())),
        "ceil" => Ok(number(as_f64(&values[0])?.ceil())),
        "round" => Ok(number(as_f64(&values[0])?.round())),
        "len" => match &values[0] {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            other => Err(TemplateError::Eval(format!(
                "`len` expects a string or collection, got {other}"
            ))),
        },
        "upper" => Ok(Value::String(stringify(&values[0]).to_uppercase())),
        "lower" => Ok(Value::String(stringify(&values[0]).to_lowercase())),
        "trim" => Ok(Value::String(stringify(&values[0]).trim().to_owned())),
        "to_int" => {
            let f = as_f64(&values[0])?;
            Ok(Value::from(f.trunc() as i64))
        }
        "to_string" => Ok(Value::String(stringify(&values[0]))),
        other => Err(TemplateError::Eval(format!("unknown function `{other}`"))),
    }
}

/// Collapse a float back to an integer JSON number when it is whole, so
/// `floor(2.7)` renders as `2` rather than `2.0`.
#[allow(clippy::cast_possible_truncation)]
fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}
