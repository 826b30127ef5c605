//! AST walk turning an [`Expr`] into a [`Value`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::predicate::error::PredicateError;
use crate::predicate::functions::{CallResult, Callable, Functions, Value};
use crate::predicate::operators::Operators;
use crate::predicate::parser::Expr;

pub(crate) struct Compiler<'a, C> {
    pub functions: &'a Functions<C>,
    pub operators: &'a Operators<C>,
}

/// A call argument after literal coercion.
enum Arg {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int",
            Arg::Float(_) => "float",
            Arg::Str(_) => "string",
        }
    }
}

impl<'a, C: 'static> Compiler<'a, C> {
    pub fn eval(&self, expr: &Expr) -> Result<Value<C>, PredicateError> {
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Paren(inner) => self.eval(inner),
            Expr::Ident(name) => {
                if self.functions.contains(name) {
                    Ok(Value::Function(name.clone()))
                } else {
                    Err(PredicateError::UnsupportedFunction(name.clone()))
                }
            }
            Expr::Call { function, args } => self.call(function, args),
            Expr::Binary { op, lhs, rhs } => {
                let apply = self
                    .operators
                    .get(*op)
                    .ok_or_else(|| PredicateError::UnsupportedOperator(op.to_string()))?;
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                apply(lhs, rhs).map(Value::Predicate)
            }
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value<C>, PredicateError> {
        let callable = self
            .functions
            .get(name)
            .ok_or_else(|| PredicateError::UnsupportedFunction(name.to_string()))?;

        if args.len() != callable.arity() {
            return Err(PredicateError::ArgumentCount {
                function: name.to_string(),
                expected: callable.arity(),
                actual: args.len(),
            });
        }

        let literals = args
            .iter()
            .enumerate()
            .map(|(index, arg)| literal(name, index, arg))
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = catch_unwind(AssertUnwindSafe(|| invoke(name, callable, literals)));
        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(PredicateError::Invocation {
                function: name.to_string(),
                message,
            }),
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(PredicateError::Invocation {
                function: name.to_string(),
                message: panic_message(panic),
            }),
        }
    }
}

fn literal(function: &str, index: usize, expr: &Expr) -> Result<Arg, PredicateError> {
    match expr {
        Expr::Int(v) => Ok(Arg::Int(*v)),
        Expr::Float(v) => Ok(Arg::Float(*v)),
        Expr::Str(s) => Ok(Arg::Str(s.clone())),
        Expr::Paren(inner) => literal(function, index, inner),
        _ => Err(PredicateError::NonLiteralArgument {
            function: function.to_string(),
            index,
        }),
    }
}

fn invoke<C>(
    name: &str,
    callable: &Callable<C>,
    args: Vec<Arg>,
) -> Result<CallResult<C>, PredicateError> {
    let mismatch = |index: usize, expected: &'static str, actual: &Arg| PredicateError::ArgumentType {
        function: name.to_string(),
        index,
        expected,
        actual: actual.kind(),
    };
    let int_at = |index: usize, arg: &Arg| match arg {
        Arg::Int(v) => Ok(*v),
        other => Err(mismatch(index, "int", other)),
    };

    Ok(match (callable, args.as_slice()) {
        (Callable::Nullary(f), []) => f(),
        (Callable::Int(f), [Arg::Int(v)]) => f(*v),
        (Callable::Int(_), [other]) => return Err(mismatch(0, "int", other)),
        (Callable::Float(f), [Arg::Float(v)]) => f(*v),
        (Callable::Float(f), [Arg::Int(v)]) => f(*v as f64),
        (Callable::Float(_), [other]) => return Err(mismatch(0, "float", other)),
        (Callable::Str(f), [Arg::Str(v)]) => f(v.as_str()),
        (Callable::Str(_), [other]) => return Err(mismatch(0, "string", other)),
        (Callable::IntQuad(f), [a, b, c, d]) => {
            f(int_at(0, a)?, int_at(1, b)?, int_at(2, c)?, int_at(3, d)?)
        }
        (callable, args) => {
            return Err(PredicateError::ArgumentCount {
                function: name.to_string(),
                expected: callable.arity(),
                actual: args.len(),
            })
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
