//! Condition expression compiler.
//!
//! # Data Flow
//! ```text
//! "Attempts() <= 2 && ResponseCode() == 502"
//!     → lexer.rs (tokens)
//!     → parser.rs (Expr tree)
//!     → compiler.rs (resolve functions, coerce literal arguments,
//!                    apply operator table)
//!     → Predicate<C> (Arc closure, evaluated per request)
//! ```
//!
//! # Design Decisions
//! - Compilation happens once, at configuration time; evaluation is a plain
//!   closure call with no locking
//! - Functions have a fixed set of call shapes instead of dynamic dispatch
//! - Only literals are accepted as call arguments
//! - Panics inside registered functions are caught and reported as errors

mod compiler;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod operators;
pub mod parser;

pub use error::PredicateError;
pub use functions::{CallResult, Callable, Functions, Mapper, Predicate, Value};
pub use lexer::BinaryOp;
pub use operators::Operators;

use compiler::Compiler;

/// Compiles condition strings against a function registry and an operator
/// table.
pub struct Parser<C> {
    functions: Functions<C>,
    operators: Operators<C>,
}

impl<C> Clone for Parser<C> {
    fn clone(&self) -> Self {
        Self {
            functions: self.functions.clone(),
            operators: self.operators.clone(),
        }
    }
}

impl<C: 'static> Parser<C> {
    pub fn new(functions: Functions<C>, operators: Operators<C>) -> Self {
        Self {
            functions,
            operators,
        }
    }

    pub fn parse(&self, text: &str) -> Result<Predicate<C>, PredicateError> {
        let expr = parser::parse_expr(text)?;
        let compiler = Compiler {
            functions: &self.functions,
            operators: &self.operators,
        };
        match compiler.eval(&expr)? {
            Value::Predicate(p) => Ok(p),
            other => Err(PredicateError::NotAPredicate(other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers() -> Parser<i64> {
        let functions = Functions::new()
            .with_int("DivisibleBy", |divisor| {
                if divisor == 0 {
                    return Err("divisor must not be zero".to_string());
                }
                Ok(Value::predicate(move |x: &i64| x % divisor == 0))
            })
            .with_int("Remainder", |divisor| {
                if divisor == 0 {
                    return Err("divisor must not be zero".to_string());
                }
                Ok(Value::int_mapper(move |x: &i64| x % divisor))
            })
            .with_int("Explode", |_| panic!("boom"))
            .int_mapper("math.Value", |x: &i64| *x)
            .predicate("Even", |x: &i64| x % 2 == 0);
        Parser::new(functions, Operators::standard())
    }

    #[test]
    fn test_and_of_divisibility() {
        let p = numbers().parse("DivisibleBy(2) && DivisibleBy(3)").unwrap();
        assert!(!p.eval(&2));
        assert!(!p.eval(&3));
        assert!(p.eval(&6));
    }

    #[test]
    fn test_remainder_comparison() {
        let p = numbers().parse("Remainder(3) > 1").unwrap();
        for x in [2, 5] {
            assert!(p.eval(&x), "{} should match", x);
        }
        for x in [1, 3, 4] {
            assert!(!p.eval(&x), "{} should not match", x);
        }
    }

    #[test]
    fn test_or_and_parentheses() {
        let p = numbers()
            .parse("(DivisibleBy(5) || Remainder(4) == 1) && math.Value() < 20")
            .unwrap();
        assert!(p.eval(&5));
        assert!(p.eval(&9));
        assert!(!p.eval(&6));
        assert!(!p.eval(&25));
    }

    #[test]
    fn test_nullary_predicate() {
        let p = numbers().parse("Even()").unwrap();
        assert!(p.eval(&4));
        assert!(!p.eval(&7));
    }

    #[test]
    fn test_malformed_syntax() {
        assert!(matches!(numbers().parse(")("), Err(PredicateError::Syntax { .. })));
    }

    #[test]
    fn test_arity_and_type_mismatch() {
        assert_eq!(
            numbers().parse("Remainder(1,2)").unwrap_err(),
            PredicateError::ArgumentCount {
                function: "Remainder".into(),
                expected: 1,
                actual: 2,
            }
        );
        assert!(matches!(
            numbers().parse(r#"Remainder("x")"#),
            Err(PredicateError::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            numbers().parse("Nope() && Even()").unwrap_err(),
            PredicateError::UnsupportedFunction("Nope".into())
        );
        assert_eq!(
            numbers().parse("pkg.Nope(1)").unwrap_err(),
            PredicateError::UnsupportedFunction("pkg.Nope".into())
        );
    }

    #[test]
    fn test_nested_call_argument_rejected() {
        assert!(matches!(
            numbers().parse("DivisibleBy(Remainder(2))"),
            Err(PredicateError::NonLiteralArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_function_failure_and_panic_are_errors() {
        assert!(matches!(
            numbers().parse("DivisibleBy(0)"),
            Err(PredicateError::Invocation { .. })
        ));
        assert!(matches!(
            numbers().parse("Explode(1)"),
            Err(PredicateError::Invocation { .. })
        ));
    }

    #[test]
    fn test_result_must_be_predicate() {
        assert_eq!(
            numbers().parse("Remainder(3)").unwrap_err(),
            PredicateError::NotAPredicate("int mapper")
        );
        assert_eq!(
            numbers().parse("Even").unwrap_err(),
            PredicateError::NotAPredicate("function reference")
        );
    }

    #[test]
    fn test_operator_missing_from_table() {
        let functions = Functions::new().predicate("T", |_: &i64| true);
        let parser = Parser::new(functions, Operators::standard().without(BinaryOp::Or));
        assert_eq!(
            parser.parse("T() || T()").unwrap_err(),
            PredicateError::UnsupportedOperator("||".into())
        );
    }

    #[test]
    fn test_compiled_predicate_shared_across_threads() {
        let p = numbers().parse("DivisibleBy(3)").unwrap();
        let handles: Vec<_> = (0..4i64)
            .map(|i| {
                let p = p.clone();
                std::thread::spawn(move || (0..300i64).filter(|x| p.eval(&(*x + i))).count())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 100);
        }
    }
}
