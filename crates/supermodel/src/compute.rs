#![forbid(unsafe_code)]

//! Computed keys: values derived on demand from the whole model.
//!
//! A computation is a function of the [`Model`]; it may read any key. There
//! is no dependency tracking: nothing is recomputed until [`Model::compute`]
//! is called again. The last result is remembered only to suppress repeat
//! announcements, which go out through the deferred dispatcher as
//! `compute:<key>` `[result]` and `compute` `[key, result]`.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::model::{Model, keyed};

/// A derivation function for one computed key.
#[derive(Clone)]
pub struct Computation(Rc<dyn Fn(&Model) -> Value>);

impl Computation {
    pub fn new(f: impl Fn(&Model) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    fn run(&self, model: &Model) -> Value {
        (self.0)(model)
    }

    fn same(&self, other: &Self) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0).cast::<()>(),
            Rc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

impl fmt::Debug for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computation(..)")
    }
}

#[derive(Debug)]
struct ComputedEntry {
    computation: Computation,
    last: Option<Value>,
}

#[derive(Debug, Default)]
pub(crate) struct ComputedRegistry {
    entries: HashMap<String, ComputedEntry>,
}

impl ComputedRegistry {
    fn computation(&self, key: &str) -> Option<Computation> {
        self.entries.get(key).map(|e| e.computation.clone())
    }

    /// Store `result` as the latest for `key` if it came from the current
    /// computation. Returns `true` when it differs from the previous result.
    fn record(&mut self, key: &str, computation: &Computation, result: &Value) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) if entry.computation.same(computation) => {
                if entry.last.as_ref() == Some(result) {
                    false
                } else {
                    entry.last = Some(result.clone());
                    true
                }
            }
            _ => false,
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Model {
    /// Recompute `key` and return the fresh result.
    ///
    /// Returns `None` when no computation is registered. A result different
    /// from the previous one is announced on the next turn.
    pub fn compute(&self, key: &str) -> Option<Value> {
        let computation = self.inner.computed.borrow().computation(key)?;
        let result = computation.run(self);
        let changed = self
            .inner
            .computed
            .borrow_mut()
            .record(key, &computation, &result);
        if changed {
            tracing::trace!(key, "computed value changed");
            let emitter = self.emitter();
            emitter.emit_async(&keyed("compute", key), std::slice::from_ref(&result));
            emitter.emit_async("compute", &[Value::String(key.to_owned()), result.clone()]);
        }
        Some(result)
    }

    /// Run the computation for `key` without memoizing or emitting.
    pub(crate) fn evaluate_computed(&self, key: &str) -> Option<Value> {
        let computation = self.inner.computed.borrow().computation(key)?;
        Some(computation.run(self))
    }

    /// Register the computation for `key`, replacing any earlier one and
    /// forgetting its last result.
    pub fn register_computed(&self, key: &str, f: impl Fn(&Model) -> Value + 'static) -> &Self {
        self.insert_computed(key.to_owned(), Computation::new(f))
    }

    /// Register several computations at once.
    pub fn register_computed_many<K: Into<String>>(
        &self,
        computations: impl IntoIterator<Item = (K, Computation)>,
    ) -> &Self {
        for (key, computation) in computations {
            self.insert_computed(key.into(), computation);
        }
        self
    }

    fn insert_computed(&self, key: String, computation: Computation) -> &Self {
        self.inner.computed.borrow_mut().entries.insert(
            key,
            ComputedEntry {
                computation,
                last: None,
            },
        );
        self
    }

    pub fn remove_computed(&self, key: &str) -> bool {
        self.inner.computed.borrow_mut().entries.remove(key).is_some()
    }

    #[must_use]
    pub fn has_computed(&self, key: &str) -> bool {
        self.inner.computed.borrow().contains(key)
    }

    /// Last announced result for `key`, without recomputing.
    #[must_use]
    pub fn last_computed(&self, key: &str) -> Option<Value> {
        self.inner
            .computed
            .borrow()
            .entries
            .get(key)
            .and_then(|e| e.last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn sum(model: &Model) -> Value {
        let a = model.peek("a").and_then(|v| v.as_i64()).unwrap_or(0);
        let b = model.peek("b").and_then(|v| v.as_i64()).unwrap_or(0);
        json!(a + b)
    }

    #[test]
    fn unregistered_key_computes_nothing() {
        let model = Model::new();
        assert_eq!(model.compute("missing"), None);
    }

    #[test]
    fn result_is_announced_on_next_turn_only_when_changed() {
        let model = Model::new();
        model.set("a", 1).set("b", 2);
        model.register_computed("sum", sum);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        model.on("compute:sum", move |args| s.borrow_mut().push(args[0].clone()));

        assert_eq!(model.compute("sum"), Some(json!(3)));
        assert!(seen.borrow().is_empty());
        model.run_pending();
        assert_eq!(*seen.borrow(), vec![json!(3)]);

        assert_eq!(model.compute("sum"), Some(json!(3)));
        model.run_pending();
        assert_eq!(seen.borrow().len(), 1);

        model.set("a", 4);
        assert_eq!(model.compute("sum"), Some(json!(6)));
        model.run_pending();
        assert_eq!(*seen.borrow(), vec![json!(3), json!(6)]);
        assert_eq!(model.last_computed("sum"), Some(json!(6)));
    }

    #[test]
    fn no_dependency_tracking() {
        let model = Model::new();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        model.register_computed("sum", move |m| {
            c.set(c.get() + 1);
            sum(m)
        });
        model.set("a", 1);
        model.set("a", 2);
        assert_eq!(calls.get(), 0);
        let _ = model.compute("sum");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn bare_compute_event_carries_key() {
        let model = Model::new();
        model.register_computed("twice", |m| {
            json!(m.peek("n").and_then(|v| v.as_i64()).unwrap_or(0) * 2)
        });
        model.set("n", 5);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        model.on("compute", move |args| s.borrow_mut().push(args.to_vec()));
        let _ = model.compute("twice");
        model.run_pending();
        assert_eq!(*seen.borrow(), vec![vec![json!("twice"), json!(10)]]);
    }

    #[test]
    fn bulk_registration() {
        let model = Model::new();
        model.register_computed_many([
            ("one", Computation::new(|_| json!(1))),
            ("two", Computation::new(|_| json!(2))),
        ]);
        assert!(model.has_computed("one"));
        assert_eq!(model.compute("two"), Some(json!(2)));
        assert!(model.remove_computed("one"));
        assert!(!model.has_computed("one"));
    }

    #[test]
    fn reregistering_forgets_last_result() {
        let model = Model::new();
        model.register_computed("k", |_| json!("v"));
        let _ = model.compute("k");
        model.register_computed("k", |_| json!("v"));
        assert_eq!(model.last_computed("k"), None);

        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        model.on("compute:k", move |_| c.set(c.get() + 1));
        let _ = model.compute("k");
        model.run_pending();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn computation_may_read_through_the_router() {
        let model = Model::new();
        model.set("name", "ada");
        model.register_computed("greeting", |m| {
            let name = m
                .get("name")
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            json!(format!("hi {name}"))
        });
        assert_eq!(model.compute("greeting"), Some(json!("hi ada")));
    }
}
