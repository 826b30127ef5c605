//! Retry predicate vocabulary.
//!
//! ```text
//! IsNetworkError() && Attempts() <= 2
//! RequestMethod() == "GET" && ResponseCode() == 503
//! ```

use crate::predicate::{Functions, Operators, Parser, Predicate, PredicateError};

/// Hard ceiling on attempts per request, whatever the predicate says.
pub const MAX_ATTEMPTS: i64 = 10;

/// What a retry predicate sees after an attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts made so far, including the one that just finished.
    pub attempts: i64,
    pub response_code: i64,
    pub method: String,
}

pub fn compile_retry(text: &str) -> Result<Predicate<RetryContext>, PredicateError> {
    let functions = Functions::new()
        .int_mapper("Attempts", |c: &RetryContext| c.attempts)
        .int_mapper("ResponseCode", |c: &RetryContext| c.response_code)
        .predicate("IsNetworkError", |c: &RetryContext| {
            c.response_code == 502 || c.response_code == 504
        })
        .str_mapper("RequestMethod", |c: &RetryContext| c.method.clone());
    Parser::new(functions, Operators::standard()).parse(text)
}
