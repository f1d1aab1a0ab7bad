//! Hand-written recursive descent parser for the template expression grammar.
//!
//! Uses `nom` for low-level token recognition with manual precedence
//! climbing. The output is the [`Expr`] AST from [`crate::expr`].

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{opt, recognize},
    sequence::{delimited, tuple},
};

use crate::error::TemplateError;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Parse a complete expression string into an [`Expr`].
///
/// Returns a [`TemplateError::Parse`] if the input cannot be parsed or has
/// trailing tokens.
pub fn parse_expr(input: &str) -> Result<Expr, TemplateError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TemplateError::Parse("empty expression".to_owned()));
    }
    let (rest, expr) =
        parse_or(input).map_err(|e| TemplateError::Parse(format!("expression parse error: {e}")))?;
    let rest = rest.trim();
    if !rest.is_empty() {
        return Err(TemplateError::Parse(format!(
            "unexpected trailing input: {rest:?}"
        )));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------------
// Precedence climbing: || < && < comparison < additive < multiplicative
// ---------------------------------------------------------------------------

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_and(input)?;
    loop {
        let (rest, _) = multispace0(input)?;
        let op: IResult<&str, &str> = tag("||")(rest);
        match op {
            Ok((rest, _)) => {
                let (rest, rhs) = parse_and(rest)?;
                lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_comparison(input)?;
    loop {
        let (rest, _) = multispace0(input)?;
        let op: IResult<&str, &str> = tag("&&")(rest);
        match op {
            Ok((rest, _)) => {
                let (rest, rhs) = parse_comparison(rest)?;
                lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

/// Comparison is non-associative: at most one operator per level.
fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    let (input, lhs) = parse_additive(input)?;
    let (rest, _) = multispace0(input)?;
    let op: IResult<&str, &str> =
        alt((tag("=="), tag("!="), tag("<="), tag(">="), tag("<"), tag(">")))(rest);
    match op {
        Ok((rest, symbol)) => {
            let (rest, rhs) = parse_additive(rest)?;
            let op = match symbol {
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "<=" => BinaryOp::Le,
                ">=" => BinaryOp::Ge,
                "<" => BinaryOp::Lt,
                _ => BinaryOp::Gt,
            };
            Ok((rest, Expr::Binary(op, Box::new(lhs), Box::new(rhs))))
        }
        Err(_) => Ok((input, lhs)),
    }
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_multiplicative(input)?;
    loop {
        let (rest, _) = multispace0(input)?;
        let op: IResult<&str, char> = alt((char('+'), char('-')))(rest);
        match op {
            Ok((rest, symbol)) => {
                let (rest, rhs) = parse_multiplicative(rest)?;
                let op = if symbol == '+' {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut lhs) = parse_unary(input)?;
    loop {
        let (rest, _) = multispace0(input)?;
        let op: IResult<&str, char> = alt((char('*'), char('/'), char('%')))(rest);
        match op {
            Ok((rest, symbol)) => {
                let (rest, rhs) = parse_unary(rest)?;
                let op = match symbol {
                    '*' => BinaryOp::Mul,
                    '/' => BinaryOp::Div,
                    _ => BinaryOp::Mod,
                };
                lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                input = rest;
            }
            Err(_) => return Ok((input, lhs)),
        }
    }
}

fn parse_unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    let not: IResult<&str, char> = char('!')(input);
    if let Ok((rest, _)) = not {
        let (rest, inner) = parse_unary(rest)?;
        return Ok((rest, Expr::Unary(UnaryOp::Not, Box::new(inner))));
    }
    let neg: IResult<&str, char> = char('-')(input);
    if let Ok((rest, _)) = neg {
        let (rest, inner) = parse_unary(rest)?;
        return Ok((rest, Expr::Unary(UnaryOp::Neg, Box::new(inner))));
    }
    parse_postfix(input)
}

/// An atom followed by any number of `.field` accesses.
fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (mut input, mut expr) = parse_atom(input)?;
    loop {
        let dot: IResult<&str, char> = char('.')(input);
        match dot {
            Ok((rest, _)) => {
                let (rest, field) = parse_ident_str(rest)?;
                expr = Expr::Field(Box::new(expr), field.to_owned());
                input = rest;
            }
            Err(_) => return Ok((input, expr)),
        }
    }
}

// ---------------------------------------------------------------------------
// Atoms (literals, identifiers, function calls, parenthesised expressions)
// ---------------------------------------------------------------------------

fn parse_atom(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        parse_null,
        parse_bool,
        parse_number,
        parse_string_literal,
        parse_paren,
        parse_function_or_ident,
    ))(input)
}

/// Parse the `null` keyword, rejecting identifier prefixes like `nullable`.
fn parse_null(input: &str) -> IResult<&str, Expr> {
    let (rest, _) = tag("null")(input)?;
    if rest
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, Expr::Null))
}

/// Parse boolean literals `true` and `false`.
fn parse_bool(input: &str) -> IResult<&str, Expr> {
    let (rest, word) = alt((tag("true"), tag("false")))(input)?;
    if rest
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, Expr::Bool(word == "true")))
}

/// Parse an unsigned number literal (integer or float). A leading `-` is
/// handled by the unary layer so that `5 - 3` parses as subtraction.
fn parse_number(input: &str) -> IResult<&str, Expr> {
    let (rest, num_str) = recognize(tuple((
        take_while1(|c: char| c.is_ascii_digit()),
        opt(tuple((
            char('.'),
            take_while1(|c: char| c.is_ascii_digit()),
        ))),
    )))(input)?;

    if num_str.contains('.') {
        let f: f64 = num_str.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?;
        Ok((rest, Expr::Float(f)))
    } else {
        let i: i64 = num_str.parse().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?;
        Ok((rest, Expr::Int(i)))
    }
}

/// Parse a double-quoted string literal with `\n`, `\t`, `\\`, `\"` escapes.
fn parse_string_literal(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut chars = input.chars();
    let mut consumed = 0;
    loop {
        match chars.next() {
            Some('"') => {
                consumed += 1;
                return Ok((&input[consumed..], Expr::String(result)));
            }
            Some('\\') => {
                consumed += 1;
                match chars.next() {
                    Some('n') => {
                        result.push('\n');
                        consumed += 1;
                    }
                    Some('t') => {
                        result.push('\t');
                        consumed += 1;
                    }
                    Some('\\') => {
                        result.push('\\');
                        consumed += 1;
                    }
                    Some('"') => {
                        result.push('"');
                        consumed += 1;
                    }
                    Some(c) => {
                        result.push('\\');
                        result.push(c);
                        consumed += c.len_utf8();
                    }
                    None => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            input,
                            nom::error::ErrorKind::Char,
                        )));
                    }
                }
            }
            Some(c) => {
                result.push(c);
                consumed += c.len_utf8();
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parse a parenthesised expression.
fn parse_paren(input: &str) -> IResult<&str, Expr> {
    delimited(
        char('('),
        delimited(multispace0, parse_or, multispace0),
        char(')'),
    )(input)
}

/// Parse a bare identifier matching `[a-zA-Z_][a-zA-Z0-9_]*`.
fn parse_ident_str(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    )))(input)
}

/// Parse a function call or a plain identifier. Function names are checked
/// against the safe set at evaluation time, not here.
fn parse_function_or_ident(input: &str) -> IResult<&str, Expr> {
    let (rest, ident) = parse_ident_str(input)?;
    let (after_ws, _) = multispace0(rest)?;

    if after_ws.starts_with('(') {
        let (rest, _) = char('(')(after_ws)?;
        let (rest, _) = multispace0(rest)?;
        let (rest, args) = parse_args(rest)?;
        let (rest, _) = multispace0(rest)?;
        let (rest, _) = char(')')(rest)?;
        return Ok((rest, Expr::Call(ident.to_owned(), args)));
    }

    Ok((rest, Expr::Ident(ident.to_owned())))
}

/// Parse a comma-separated argument list (possibly empty).
fn parse_args(input: &str) -> IResult<&str, Vec<Expr>> {
    if input.starts_with(')') {
        return Ok((input, Vec::new()));
    }
    let mut args = Vec::new();
    let (mut input, first) = parse_or(input)?;
    args.push(first);
    loop {
        let (rest, _) = multispace0(input)?;
        let comma: IResult<&str, char> = char(',')(rest);
        match comma {
            Ok((rest, _)) => {
                let (rest, arg) = parse_or(rest)?;
                args.push(arg);
                input = rest;
            }
            Err(_) => return Ok((input, args)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_literals() {
        assert_eq!(parse_expr("42").unwrap(), Expr::Int(42));
        assert_eq!(parse_expr("3.5").unwrap(), Expr::Float(3.5));
        assert_eq!(parse_expr("true").unwrap(), Expr::Bool(true));
        assert_eq!(parse_expr("null").unwrap(), Expr::Null);
        assert_eq!(
            parse_expr(r#""hi there""#).unwrap(),
            Expr::String("hi there".into())
        );
    }

    #[test]
    fn keyword_prefix_is_ident() {
        assert_eq!(parse_expr("nullable").unwrap(), Expr::Ident("nullable".into()));
        assert_eq!(parse_expr("truex").unwrap(), Expr::Ident("truex".into()));
    }

    #[test]
    fn parses_arithmetic_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Int(3)),
                )),
            )
        );
    }

    #[test]
    fn parses_parentheses() {
        let expr = parse_expr("(1 + 2) * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Mul,
                Box::new(Expr::Binary(
                    BinaryOp::Add,
                    Box::new(Expr::Int(1)),
                    Box::new(Expr::Int(2)),
                )),
                Box::new(Expr::Int(3)),
            )
        );
    }

    #[test]
    fn parses_subtraction_vs_negation() {
        let expr = parse_expr("5 - 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Int(5)),
                Box::new(Expr::Int(3)),
            )
        );
        let expr = parse_expr("-5").unwrap();
        assert_eq!(expr, Expr::Unary(UnaryOp::Neg, Box::new(Expr::Int(5))));
    }

    #[test]
    fn parses_field_access() {
        let expr = parse_expr("gift.name").unwrap();
        assert_eq!(
            expr,
            Expr::Field(Box::new(Expr::Ident("gift".into())), "name".into())
        );
    }

    #[test]
    fn parses_logical_chain() {
        let expr = parse_expr("coins >= 100 && vip || admin").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Binary(BinaryOp::And, _, _)));
                assert_eq!(*rhs, Expr::Ident("admin".into()));
            }
            other => panic!("expected Or at top, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_call() {
        let expr = parse_expr("min(coins, 100)").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "min".into(),
                vec![Expr::Ident("coins".into()), Expr::Int(100)],
            )
        );
    }

    #[test]
    fn parses_nested_calls() {
        let expr = parse_expr("max(1, min(coins * 2, 100))").unwrap();
        match expr {
            Expr::Call(name, args) => {
                assert_eq!(name, "max");
                assert_eq!(args.len(), 2);
                assert!(matches!(&args[1], Expr::Call(inner, _) if inner == "min"));
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_and_trailing() {
        assert!(parse_expr("").is_err());
        assert!(parse_expr("   ").is_err());
        assert!(parse_expr("1 + ").is_err());
        assert!(parse_expr("1 1").is_err());
        assert!(parse_expr("(1 + 2").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse_expr(r#""oops"#).is_err());
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            parse_expr(r#""a\nb\"c""#).unwrap(),
            Expr::String("a\nb\"c".into())
        );
    }
}
