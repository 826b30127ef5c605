//! Typed function registry.
//!
//! Functions are registered under a name with one of a fixed set of call
//! shapes ([`Callable`]). Calling one at compile time yields a [`Value`]:
//! a constant, a mapper reading a field out of the evaluation context, or a
//! finished predicate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A compiled boolean condition over a context `C`.
pub struct Predicate<C>(Arc<dyn Fn(&C) -> bool + Send + Sync>);

impl<C> Predicate<C> {
    pub fn new(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn eval(&self, ctx: &C) -> bool {
        (self.0)(ctx)
    }
}

impl<C: 'static> Predicate<C> {
    pub fn constant(value: bool) -> Self {
        Self::new(move |_| value)
    }
}

impl<C> Clone for Predicate<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C> fmt::Debug for Predicate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// Extracts a typed value from the evaluation context.
pub enum Mapper<C> {
    Int(Arc<dyn Fn(&C) -> i64 + Send + Sync>),
    Float(Arc<dyn Fn(&C) -> f64 + Send + Sync>),
    Str(Arc<dyn Fn(&C) -> String + Send + Sync>),
}

impl<C> Clone for Mapper<C> {
    fn clone(&self) -> Self {
        match self {
            Mapper::Int(f) => Mapper::Int(Arc::clone(f)),
            Mapper::Float(f) => Mapper::Float(Arc::clone(f)),
            Mapper::Str(f) => Mapper::Str(Arc::clone(f)),
        }
    }
}

/// Result of evaluating one AST node at compile time.
pub enum Value<C> {
    Int(i64),
    Float(f64),
    Str(String),
    Mapper(Mapper<C>),
    Predicate(Predicate<C>),
    /// A bare reference to a registered function that was never called.
    Function(String),
}

impl<C> Value<C> {
    pub fn predicate(f: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        Value::Predicate(Predicate::new(f))
    }

    pub fn int_mapper(f: impl Fn(&C) -> i64 + Send + Sync + 'static) -> Self {
        Value::Mapper(Mapper::Int(Arc::new(f)))
    }

    pub fn float_mapper(f: impl Fn(&C) -> f64 + Send + Sync + 'static) -> Self {
        Value::Mapper(Mapper::Float(Arc::new(f)))
    }

    pub fn str_mapper(f: impl Fn(&C) -> String + Send + Sync + 'static) -> Self {
        Value::Mapper(Mapper::Str(Arc::new(f)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Mapper(Mapper::Int(_)) => "int mapper",
            Value::Mapper(Mapper::Float(_)) => "float mapper",
            Value::Mapper(Mapper::Str(_)) => "string mapper",
            Value::Predicate(_) => "predicate",
            Value::Function(_) => "function reference",
        }
    }
}

/// What a registered function may return. Errors carry a human message.
pub type CallResult<C> = Result<Value<C>, String>;

/// The supported call shapes.
pub enum Callable<C> {
    Nullary(Arc<dyn Fn() -> CallResult<C> + Send + Sync>),
    Int(Arc<dyn Fn(i64) -> CallResult<C> + Send + Sync>),
    Float(Arc<dyn Fn(f64) -> CallResult<C> + Send + Sync>),
    Str(Arc<dyn Fn(&str) -> CallResult<C> + Send + Sync>),
    IntQuad(Arc<dyn Fn(i64, i64, i64, i64) -> CallResult<C> + Send + Sync>),
}

impl<C> Callable<C> {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Nullary(_) => 0,
            Callable::Int(_) | Callable::Float(_) | Callable::Str(_) => 1,
            Callable::IntQuad(_) => 4,
        }
    }
}

impl<C> Clone for Callable<C> {
    fn clone(&self) -> Self {
        match self {
            Callable::Nullary(f) => Callable::Nullary(Arc::clone(f)),
            Callable::Int(f) => Callable::Int(Arc::clone(f)),
            Callable::Float(f) => Callable::Float(Arc::clone(f)),
            Callable::Str(f) => Callable::Str(Arc::clone(f)),
            Callable::IntQuad(f) => Callable::IntQuad(Arc::clone(f)),
        }
    }
}

/// Name to [`Callable`] map handed to the parser.
pub struct Functions<C> {
    entries: HashMap<String, Callable<C>>,
}

impl<C> Default for Functions<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<C> Clone for Functions<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<C: 'static> Functions<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, callable: Callable<C>) -> Self {
        self.entries.insert(name.into(), callable);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Callable<C>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// `Name()` evaluating directly to a predicate over the context.
    pub fn predicate<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        let pred = Predicate::new(f);
        self.register(
            name,
            Callable::Nullary(Arc::new(move || Ok(Value::Predicate(pred.clone())))),
        )
    }

    /// `Name()` evaluating to an integer field of the context.
    pub fn int_mapper<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> i64 + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(&C) -> i64 + Send + Sync> = Arc::new(f);
        self.register(
            name,
            Callable::Nullary(Arc::new(move || Ok(Value::Mapper(Mapper::Int(Arc::clone(&f)))))),
        )
    }

    /// `Name()` evaluating to a float field of the context.
    pub fn float_mapper<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> f64 + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(&C) -> f64 + Send + Sync> = Arc::new(f);
        self.register(
            name,
            Callable::Nullary(Arc::new(move || Ok(Value::Mapper(Mapper::Float(Arc::clone(&f)))))),
        )
    }

    /// `Name()` evaluating to a string field of the context.
    pub fn str_mapper<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(&C) -> String + Send + Sync> = Arc::new(f);
        self.register(
            name,
            Callable::Nullary(Arc::new(move || Ok(Value::Mapper(Mapper::Str(Arc::clone(&f)))))),
        )
    }

    pub fn with_int<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(i64) -> CallResult<C> + Send + Sync + 'static,
    {
        self.register(name, Callable::Int(Arc::new(f)))
    }

    pub fn with_float<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(f64) -> CallResult<C> + Send + Sync + 'static,
    {
        self.register(name, Callable::Float(Arc::new(f)))
    }

    pub fn with_str<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> CallResult<C> + Send + Sync + 'static,
    {
        self.register(name, Callable::Str(Arc::new(f)))
    }

    pub fn with_int_quad<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(i64, i64, i64, i64) -> CallResult<C> + Send + Sync + 'static,
    {
        self.register(name, Callable::IntQuad(Arc::new(f)))
    }
}
