use thiserror::Error;

/// Errors produced while parsing or evaluating template expressions.
///
/// Rendering catches these internally and substitutes an empty string; they
/// only surface to callers through [`validate`](crate::validate) and the
/// predicate-evaluation path.
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// The expression text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The expression parsed but failed to evaluate (unknown variable,
    /// type mismatch, bad arity, division by zero).
    #[error("evaluation error: {0}")]
    Eval(String),
}
