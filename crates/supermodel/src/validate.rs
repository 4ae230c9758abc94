#![forbid(unsafe_code)]

//! Per-key validators.
//!
//! At most one validator exists per key; registering again replaces it.
//! Validation is evaluated on demand and always announced on
//! `validate:<key>` `[valid]` then `validate` `[key, valid]`, even though it
//! only reads the store.
//!
//! Registration probes the validator against an absent value first. A
//! validator whose probe does not yield a boolean (or panics) is rejected
//! with [`StoreError::InvalidValidator`] and never stored.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use regex::Regex;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::model::{Model, keyed};

/// A validation rule for one key.
#[derive(Clone)]
pub enum Rule {
    /// Passes when the value is a string matching the pattern.
    Pattern(Regex),
    /// Typed predicate over a present value.
    Predicate(Rc<dyn Fn(&Value) -> bool>),
    /// Untyped predicate; only `Value::Bool(true)` counts as valid.
    Dynamic(Rc<dyn Fn(Option<&Value>) -> Value>),
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Regex> for Rule {
    fn from(re: Regex) -> Self {
        Self::Pattern(re)
    }
}

impl Rule {
    pub fn predicate(f: impl Fn(&Value) -> bool + 'static) -> Self {
        Self::Predicate(Rc::new(f))
    }

    pub fn dynamic(f: impl Fn(Option<&Value>) -> Value + 'static) -> Self {
        Self::Dynamic(Rc::new(f))
    }

    /// Call the rule with no value and check the result is boolean.
    fn probe(&self) -> std::result::Result<(), String> {
        match self {
            Self::Pattern(_) => Ok(()),
            Self::Predicate(f) => catch_unwind(AssertUnwindSafe(|| f(&Value::Null)))
                .map(|_| ())
                .map_err(|_| "probe call panicked".to_owned()),
            Self::Dynamic(f) => match catch_unwind(AssertUnwindSafe(|| f(None))) {
                Ok(Value::Bool(_)) => Ok(()),
                Ok(other) => Err(format!("probe returned {other} instead of a boolean")),
                Err(_) => Err("probe call panicked".to_owned()),
            },
        }
    }

    #[must_use]
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Self::Pattern(re) => value.as_str().is_some_and(|s| re.is_match(s)),
            Self::Predicate(f) => f(value),
            Self::Dynamic(f) => matches!(f(Some(value)), Value::Bool(true)),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Validators {
    rules: HashMap<String, Rule>,
}

impl Validators {
    pub(crate) fn get(&self, key: &str) -> Option<Rule> {
        self.rules.get(key).cloned()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.rules.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: &str, rule: Rule) {
        self.rules.insert(key.to_owned(), rule);
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        self.rules.remove(key).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.rules.clear();
    }
}

impl Model {
    /// Evaluate and announce the validity of `key`.
    ///
    /// `false` unless the key is present and has a validator that accepts
    /// its value.
    pub fn validate(&self, key: &str) -> bool {
        let valid = self.validity(key);
        let emitter = self.emitter();
        emitter.emit(&keyed("validate", key), &[Value::Bool(valid)]);
        emitter.emit("validate", &[Value::String(key.to_owned()), Value::Bool(valid)]);
        valid
    }

    /// Evaluate without emitting.
    pub(crate) fn validity(&self, key: &str) -> bool {
        let rule = self.inner.validators.borrow().get(key);
        match (rule, self.peek(key)) {
            (Some(rule), Some(value)) => rule.check(&value),
            _ => false,
        }
    }

    /// Register the validator for `key`, replacing any earlier one.
    pub fn register_validator(&self, key: &str, rule: impl Into<Rule>) -> Result<&Self> {
        let rule = rule.into();
        if let Err(reason) = rule.probe() {
            tracing::debug!(key, %reason, "validator rejected");
            return Err(StoreError::invalid_validator(key, reason));
        }
        self.inner.validators.borrow_mut().insert(key, rule);
        Ok(self)
    }

    pub fn remove_validator(&self, key: &str) -> bool {
        self.inner.validators.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn has_validator(&self, key: &str) -> bool {
        self.inner.validators.borrow().contains(key)
    }

    /// Validation facade: `check` reads, `register` installs.
    #[must_use]
    pub fn valid(&self) -> Validation<'_> {
        Validation { model: self }
    }
}

/// Borrowed view over a model's validators.
#[derive(Debug, Clone, Copy)]
pub struct Validation<'a> {
    model: &'a Model,
}

impl Validation<'_> {
    pub fn check(&self, key: &str) -> bool {
        self.model.validate(key)
    }

    pub fn register(&self, key: &str, rule: impl Into<Rule>) -> Result<()> {
        self.model.register_validator(key, rule).map(|_| ())
    }
}
