//! Predicate compilation errors.

use thiserror::Error;

/// Errors produced while compiling a condition string.
///
/// Compilation never panics past the parser boundary; every failure mode
/// surfaces as one of these variants.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    /// The text is not a well-formed expression.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    /// An identifier does not name a registered function.
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),

    /// The operator table has no entry for this operator.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    /// A call passed the wrong number of arguments.
    #[error("{function}: expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: usize,
        actual: usize,
    },

    /// A call argument has the wrong literal kind.
    #[error("{function}: argument {index} must be {expected}, got {actual}")]
    ArgumentType {
        function: String,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// Only literals are accepted as call arguments.
    #[error("{function}: argument {index} is not a literal")]
    NonLiteralArgument { function: String, index: usize },

    /// Operand kinds do not fit the operator.
    #[error("type error: {0}")]
    Type(String),

    /// A registered function failed or panicked while being called.
    #[error("{function}: {message}")]
    Invocation { function: String, message: String },

    /// The whole expression evaluated to something other than a predicate.
    #[error("expression does not evaluate to a predicate, got {0}")]
    NotAPredicate(&'static str),
}
