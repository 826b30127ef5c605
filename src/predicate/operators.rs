//! Operator table.
//!
//! The parser only applies operators present in the table it was given, so a
//! caller can restrict a grammar (for instance, logic only) by building a
//! smaller table.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::predicate::error::PredicateError;
use crate::predicate::functions::{Mapper, Predicate, Value};
use crate::predicate::lexer::BinaryOp;

pub type OperatorFn<C> = fn(Value<C>, Value<C>) -> Result<Predicate<C>, PredicateError>;

pub struct Operators<C> {
    table: HashMap<BinaryOp, OperatorFn<C>>,
}

impl<C> Clone for Operators<C> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<C: 'static> Operators<C> {
    /// An empty table; every operator is rejected.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Logic plus numeric and string comparison.
    pub fn standard() -> Self {
        Self::empty()
            .with(BinaryOp::And, and)
            .with(BinaryOp::Or, or)
            .with(BinaryOp::Eq, eq)
            .with(BinaryOp::Neq, neq)
            .with(BinaryOp::Lt, lt)
            .with(BinaryOp::Gt, gt)
            .with(BinaryOp::Le, le)
            .with(BinaryOp::Ge, ge)
    }

    pub fn with(mut self, op: BinaryOp, f: OperatorFn<C>) -> Self {
        self.table.insert(op, f);
        self
    }

    pub fn without(mut self, op: BinaryOp) -> Self {
        self.table.remove(&op);
        self
    }

    pub fn get(&self, op: BinaryOp) -> Option<OperatorFn<C>> {
        self.table.get(&op).copied()
    }
}

impl<C: 'static> Default for Operators<C> {
    fn default() -> Self {
        Self::standard()
    }
}

pub fn and<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    let (a, b) = both_predicates(BinaryOp::And, lhs, rhs)?;
    Ok(Predicate::new(move |c| a.eval(c) && b.eval(c)))
}

pub fn or<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    let (a, b) = both_predicates(BinaryOp::Or, lhs, rhs)?;
    Ok(Predicate::new(move |c| a.eval(c) || b.eval(c)))
}

pub fn eq<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Eq, lhs, rhs)
}

pub fn neq<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Neq, lhs, rhs)
}

pub fn lt<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Lt, lhs, rhs)
}

pub fn gt<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Gt, lhs, rhs)
}

pub fn le<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Le, lhs, rhs)
}

pub fn ge<C: 'static>(lhs: Value<C>, rhs: Value<C>) -> Result<Predicate<C>, PredicateError> {
    compare(BinaryOp::Ge, lhs, rhs)
}

fn both_predicates<C>(
    op: BinaryOp,
    lhs: Value<C>,
    rhs: Value<C>,
) -> Result<(Predicate<C>, Predicate<C>), PredicateError> {
    match (lhs, rhs) {
        (Value::Predicate(a), Value::Predicate(b)) => Ok((a, b)),
        (a, b) => Err(PredicateError::Type(format!(
            "operator {} expects two predicates, got {} and {}",
            op,
            a.kind(),
            b.kind()
        ))),
    }
}

type Getter<C, T> = Arc<dyn Fn(&C) -> T + Send + Sync>;

enum Num<C> {
    Int(Getter<C, i64>),
    Float(Getter<C, f64>),
}

impl<C: 'static> Num<C> {
    fn from_value(value: &Value<C>) -> Option<Self> {
        match value {
            Value::Int(v) => {
                let v = *v;
                Some(Num::Int(Arc::new(move |_: &C| v)))
            }
            Value::Float(v) => {
                let v = *v;
                Some(Num::Float(Arc::new(move |_: &C| v)))
            }
            Value::Mapper(Mapper::Int(f)) => Some(Num::Int(Arc::clone(f))),
            Value::Mapper(Mapper::Float(f)) => Some(Num::Float(Arc::clone(f))),
            _ => None,
        }
    }

    fn into_float(self) -> Getter<C, f64> {
        match self {
            Num::Float(f) => f,
            Num::Int(f) => Arc::new(move |c: &C| f(c) as f64),
        }
    }
}

fn string_getter<C: 'static>(value: &Value<C>) -> Option<Getter<C, String>> {
    match value {
        Value::Str(s) => {
            let s = s.clone();
            Some(Arc::new(move |_: &C| s.clone()))
        }
        Value::Mapper(Mapper::Str(f)) => Some(Arc::clone(f)),
        _ => None,
    }
}

fn accepts(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Neq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        BinaryOp::And | BinaryOp::Or => false,
    }
}

fn compare<C: 'static>(
    op: BinaryOp,
    lhs: Value<C>,
    rhs: Value<C>,
) -> Result<Predicate<C>, PredicateError> {
    if let (Some(a), Some(b)) = (Num::from_value(&lhs), Num::from_value(&rhs)) {
        return Ok(match (a, b) {
            (Num::Int(a), Num::Int(b)) => Predicate::new(move |c| accepts(op, a(c).cmp(&b(c)))),
            (a, b) => {
                let (a, b) = (a.into_float(), b.into_float());
                // NaN never compares, not even with `!=`.
                Predicate::new(move |c| {
                    a(c).partial_cmp(&b(c))
                        .map(|ordering| accepts(op, ordering))
                        .unwrap_or(false)
                })
            }
        });
    }

    if let (Some(a), Some(b)) = (string_getter(&lhs), string_getter(&rhs)) {
        return match op {
            BinaryOp::Eq => Ok(Predicate::new(move |c| a(c) == b(c))),
            BinaryOp::Neq => Ok(Predicate::new(move |c| a(c) != b(c))),
            _ => Err(PredicateError::Type(format!(
                "operator {} is not defined for strings",
                op
            ))),
        };
    }

    Err(PredicateError::Type(format!(
        "cannot apply {} to {} and {}",
        op,
        lhs.kind(),
        rhs.kind()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_field() -> Value<i64> {
        Value::int_mapper(|x: &i64| *x)
    }

    #[test]
    fn test_int_mapper_against_literal() {
        let p = gt(int_field(), Value::Int(3)).unwrap();
        assert!(p.eval(&4));
        assert!(!p.eval(&3));
    }

    #[test]
    fn test_mixed_int_and_float_promotes() {
        let p = le(int_field(), Value::Float(2.5)).unwrap();
        assert!(p.eval(&2));
        assert!(!p.eval(&3));
    }

    #[test]
    fn test_string_ordering_rejected() {
        let s = || Value::<i64>::str_mapper(|_| "GET".to_string());
        assert!(eq(s(), Value::Str("GET".into())).unwrap().eval(&0));
        assert!(matches!(
            lt(s(), Value::Str("GET".into())),
            Err(PredicateError::Type(_))
        ));
    }

    #[test]
    fn test_mismatched_operands() {
        assert!(matches!(
            eq(int_field(), Value::Str("x".into())),
            Err(PredicateError::Type(_))
        ));
        assert!(matches!(
            and(int_field(), Value::predicate(|_: &i64| true)),
            Err(PredicateError::Type(_))
        ));
    }

    #[test]
    fn test_restricted_table() {
        let ops: Operators<i64> = Operators::standard().without(BinaryOp::Lt);
        assert!(ops.get(BinaryOp::Lt).is_none());
        assert!(ops.get(BinaryOp::And).is_some());
    }
}
