/// Unary operators supported in template expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (`!expr`).
    Not,
    /// Arithmetic negation (`-expr`).
    Neg,
}

/// Binary operators supported in template expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical (short-circuit)
    And,
    Or,
}

/// The expression AST for `${...}` template expressions and boolean
/// mapping predicates.
///
/// The grammar is deliberately small: literals, event-field references,
/// arithmetic, comparisons, boolean connectives, and a fixed set of safe
/// functions. There is no assignment, no loops, and no host access.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The null literal.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// A 64-bit signed integer literal.
    Int(i64),
    /// A 64-bit floating-point literal.
    Float(f64),
    /// A string literal.
    String(String),
    /// A variable reference resolving into the event payload.
    Ident(String),
    /// Field access: `expr.field`.
    Field(Box<Expr>, String),
    /// A unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// A call to one of the fixed safe functions.
    Call(String, Vec<Expr>),
}
