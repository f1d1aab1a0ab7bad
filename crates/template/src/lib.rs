//! Context templating for the Pulsebridge action pipeline.
//!
//! A context template is a nested JSON structure whose strings may contain
//! two kinds of substitution:
//!
//! - `{path}` placeholders resolved by dotted-path lookup into the event
//!   payload, plus the system tokens `{timestamp}` (unix milliseconds) and
//!   `{random}` (0..100). Unresolved placeholders become the empty string.
//! - `${expr}` expressions evaluated in a sandbox exposing the payload's
//!   top-level fields and a fixed safe function set. Evaluation errors are
//!   logged and become the empty string; they never reach the caller.
//!
//! After substitution, a string that is exactly an integer, float, boolean,
//! or `null` literal is coerced to that native JSON type. This is how
//! numeric action parameters (e.g. intensity) emerge from string templates.
//!
//! ```
//! let template = serde_json::json!({"msg": "Hi {username}", "coins": "{coins}"});
//! let payload = serde_json::json!({"username": "A", "coins": "50"});
//! let context = pulsebridge_template::render(&template, &payload);
//! assert_eq!(context, serde_json::json!({"msg": "Hi A", "coins": 50}));
//! ```

pub mod error;
pub mod eval;
pub mod expr;
pub mod parser;

pub use error::TemplateError;
pub use eval::{SAFE_FUNCTIONS, check, eval, truthy};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use parser::parse_expr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// A problem found by the non-executing [`validate`] pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateIssue {
    /// Dotted location of the offending string within the template.
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

/// One piece of a template string after lexing.
#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    /// `{token}` placeholder content.
    Placeholder(String),
    /// `${expr}` expression source.
    Expression(String),
}

/// Render a context template against an event payload.
///
/// Never fails: unresolved placeholders and failed expressions reduce to
/// empty strings (logged), and non-string leaves pass through unchanged.
#[must_use]
pub fn render(template: &Value, payload: &Value) -> Value {
    match template {
        Value::String(s) => render_string(s, payload),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, payload)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, payload)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Validate a template without executing it.
///
/// Flags expression syntax errors, unknown functions and bad arities, and
/// malformed placeholders. Field existence is a runtime property of each
/// event and is not checked here. Intended for mapping-registration time.
#[must_use]
pub fn validate(template: &Value) -> Vec<TemplateIssue> {
    let mut issues = Vec::new();
    validate_value(template, "", &mut issues);
    issues
}

fn validate_value(value: &Value, path: &str, issues: &mut Vec<TemplateIssue>) {
    match value {
        Value::String(s) => {
            for segment in split_segments(s) {
                match segment {
                    Segment::Expression(src) => match parse_expr(&src) {
                        Ok(expr) => {
                            if let Err(e) = check(&expr) {
                                issues.push(TemplateIssue {
                                    path: path.to_owned(),
                                    message: e.to_string(),
                                });
                            }
                        }
                        Err(e) => issues.push(TemplateIssue {
                            path: path.to_owned(),
                            message: e.to_string(),
                        }),
                    },
                    Segment::Literal(text) => {
                        // A stray `{` that did not lex as a placeholder is
                        // almost always a typo in the token.
                        if text.contains('{') {
                            issues.push(TemplateIssue {
                                path: path.to_owned(),
                                message: format!("malformed placeholder near `{text}`"),
                            });
                        }
                    }
                    Segment::Placeholder(_) => {}
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                validate_value(item, &format!("{path}[{i}]"), issues);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                validate_value(item, &child, issues);
            }
        }
        _ => {}
    }
}

fn render_string(s: &str, payload: &Value) -> Value {
    let segments = split_segments(s);

    // A string that is exactly one substitution keeps the native type of
    // the resolved value; everything else is spliced into a string.
    if segments.len() == 1 {
        match &segments[0] {
            Segment::Placeholder(token) => {
                let value = resolve_placeholder(token, payload);
                return match value {
                    Value::String(text) => coerce_literal(&text),
                    other => other,
                };
            }
            Segment::Expression(src) => {
                let value = resolve_expression(src, payload);
                return match value {
                    Value::String(text) => coerce_literal(&text),
                    other => other,
                };
            }
            Segment::Literal(_) => {}
        }
    }

    let mut out = String::new();
    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Placeholder(token) => {
                out.push_str(&stringify(&resolve_placeholder(token, payload)));
            }
            Segment::Expression(src) => {
                out.push_str(&stringify(&resolve_expression(src, payload)));
            }
        }
    }
    coerce_literal(&out)
}

fn resolve_placeholder(token: &str, payload: &Value) -> Value {
    match token {
        "timestamp" => Value::from(chrono::Utc::now().timestamp_millis()),
        "random" => Value::from(rand::rng().random_range(0..100)),
        _ => lookup_path(payload, token).cloned().unwrap_or_else(|| {
            debug!(token, "placeholder did not resolve, substituting empty string");
            Value::String(String::new())
        }),
    }
}

fn resolve_expression(src: &str, payload: &Value) -> Value {
    let result = parse_expr(src).and_then(|expr| eval(&expr, payload));
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(expression = src, error = %e, "expression failed, substituting empty string");
            Value::String(String::new())
        }
    }
}

/// Dotted-path lookup into the payload. Numeric segments index into arrays.
fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Coerce a post-substitution string that is exactly a number, boolean, or
/// `null` literal into the native JSON type; anything else stays a string.
fn coerce_literal(s: &str) -> Value {
    match s {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    let looks_numeric = s
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-');
    if looks_numeric {
        if let Ok(i) = s.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            if f.is_finite() {
                return Value::from(f);
            }
        }
    }
    Value::String(s.to_owned())
}

/// Lex a template string into literal, `{placeholder}`, and `${expression}`
/// segments. Malformed braces are preserved literally.
fn split_segments(s: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            match find_close(s, i + 2) {
                Some(end) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Expression(s[i + 2..end].to_owned()));
                    i = end + 1;
                    continue;
                }
                None => {
                    literal.push_str(&s[i..]);
                    break;
                }
            }
        }
        if bytes[i] == b'{' {
            if let Some(end) = s[i + 1..].find('}').map(|o| i + 1 + o) {
                let token = &s[i + 1..end];
                if is_token(token) {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(token.to_owned()));
                    i = end + 1;
                    continue;
                }
            }
        }
        let c = s[i..].chars().next().unwrap_or('\0');
        literal.push(c);
        i += c.len_utf8();
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// Scan for the `}` closing an expression, skipping over double-quoted
/// string literals inside it.
fn find_close(s: &str, from: usize) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in s[from..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '}' => return Some(from + offset),
            _ => {}
        }
    }
    None
}

/// Placeholder tokens are dotted identifier paths: `[A-Za-z_][A-Za-z0-9_.]*`.
fn is_token(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
