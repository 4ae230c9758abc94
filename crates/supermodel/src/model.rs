#![forbid(unsafe_code)]

//! The store and its mutation router.
//!
//! Every read, write and delete goes through [`Model::mutate`] or
//! [`Model::delete_many`], which decide between a write and a no-op read and
//! fire the matching events:
//!
//! | operation            | events (in order)                      |
//! |----------------------|----------------------------------------|
//! | write (value changed)| `set` `[key, value]`, `set:<key>` `[value]` |
//! | read / no-op write   | `get` `[key]`, `get:<key>` `[]`        |
//! | delete               | `delete` `[key]`, `delete:<key>` `[]`  |
//!
//! Silent variants change the store without emitting anything. Deletion
//! always tears down the key's sync bindings and pending async reads; a
//! silent delete does so directly instead of through `delete:<key>`.
//!
//! # Ownership
//!
//! `Model` is a cheap, cloneable handle (`Rc` inside). Closures the model
//! registers on its own emitter hold a [`WeakModel`] so the model can be
//! dropped while subscriptions are still installed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};

use crate::compute::ComputedRegistry;
use crate::config::ModelConfig;
use crate::deferred::Waiters;
use crate::emitter::{Emitter, Listener};
use crate::listeners::Handler;
use crate::sync::SyncRegistry;
use crate::validate::Validators;

/// Ordered key/value record, also the store's backing map.
pub type Record = Map<String, Value>;

pub(crate) struct ModelInner {
    pub(crate) store: RefCell<Record>,
    pub(crate) emitter: Emitter,
    pub(crate) validators: RefCell<Validators>,
    pub(crate) computed: RefCell<ComputedRegistry>,
    pub(crate) syncs: RefCell<SyncRegistry>,
    pub(crate) waiters: RefCell<Waiters>,
    pub(crate) config: ModelConfig,
}

impl Drop for ModelInner {
    fn drop(&mut self) {
        // Reverse hooks live on external objects that may outlive the model.
        for (target, binding) in self.syncs.get_mut().drain() {
            binding.release(target.as_ref());
        }
    }
}

/// Outcome of a routed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// The value differed and was stored.
    Written,
    /// Nothing changed; carries the current value, if any.
    Read(Option<Value>),
}

/// Reactive key/value store.
#[derive(Clone)]
pub struct Model {
    pub(crate) inner: Rc<ModelInner>,
}

/// Non-owning handle to a [`Model`].
#[derive(Clone)]
pub(crate) struct WeakModel(Weak<ModelInner>);

impl WeakModel {
    pub(crate) fn upgrade(&self) -> Option<Model> {
        self.0.upgrade().map(|inner| Model { inner })
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("store", &*self.inner.store.borrow())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl From<Record> for Model {
    fn from(record: Record) -> Self {
        Self::from_record(record)
    }
}

impl Model {
    // ── Construction ─────────────────────────────────────────────────

    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    #[must_use]
    pub fn with_config(config: ModelConfig) -> Self {
        Self {
            inner: Rc::new(ModelInner {
                store: RefCell::new(Record::new()),
                emitter: Emitter::new(),
                validators: RefCell::new(Validators::default()),
                computed: RefCell::new(ComputedRegistry::default()),
                syncs: RefCell::new(SyncRegistry::default()),
                waiters: RefCell::new(Waiters::default()),
                config,
            }),
        }
    }

    /// Seed a model from a record; `null` entries are skipped.
    #[must_use]
    pub fn from_record(record: Record) -> Self {
        Self::from_record_with_config(record, ModelConfig::default())
    }

    #[must_use]
    pub fn from_record_with_config(record: Record, config: ModelConfig) -> Self {
        let model = Self::with_config(config);
        model.set_many(record);
        model
    }

    /// Seed a model from a serialized JSON object.
    ///
    /// Malformed input, or JSON that is not an object, yields an empty model.
    #[must_use]
    pub fn from_json(text: &str) -> Self {
        Self::from_json_with_config(text, ModelConfig::default())
    }

    #[must_use]
    pub fn from_json_with_config(text: &str, config: ModelConfig) -> Self {
        let model = Self::with_config(config);
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(record)) => {
                model.set_many(record);
            }
            Ok(other) => {
                tracing::debug!(
                    kind = json_kind(&other),
                    "initial JSON is not an object; starting empty"
                );
            }
            Err(err) => {
                tracing::debug!(error = %err, "malformed initial JSON; starting empty");
            }
        }
        model
    }

    pub(crate) fn downgrade(&self) -> WeakModel {
        WeakModel(Rc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn config(&self) -> ModelConfig {
        self.inner.config
    }

    // ── Mutation router ──────────────────────────────────────────────

    /// Single entry point for reads and writes.
    ///
    /// `None` reads. `Some(value)` writes when it differs from the current
    /// value and otherwise degrades to a read.
    pub fn mutate(&self, key: &str, value: Option<Value>, silent: bool) -> Mutation {
        let current = self.inner.store.borrow().get(key).cloned();
        match value {
            Some(value) if current.as_ref() != Some(&value) => {
                self.inner
                    .store
                    .borrow_mut()
                    .insert(key.to_owned(), value.clone());
                tracing::trace!(key, action = "set", silent, "store mutation");
                if !silent {
                    self.inner
                        .emitter
                        .emit("set", &[Value::String(key.to_owned()), value.clone()]);
                    self.inner.emitter.emit(&keyed("set", key), &[value]);
                }
                Mutation::Written
            }
            _ => {
                if !silent && self.inner.config.observe_reads {
                    self.inner.emitter.emit("get", &[Value::String(key.to_owned())]);
                    self.inner.emitter.emit(&keyed("get", key), &[]);
                }
                Mutation::Read(current)
            }
        }
    }

    /// Observable read: emits `get` / `get:<key>` even when `key` is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.mutate(key, None, false) {
            Mutation::Read(value) => value,
            Mutation::Written => None,
        }
    }

    /// Silent read.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.store.borrow().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.mutate(key, Some(value.into()), false);
        self
    }

    pub fn set_silent(&self, key: &str, value: impl Into<Value>) -> &Self {
        self.mutate(key, Some(value.into()), true);
        self
    }

    /// Bulk assignment. `null` entries delete their key instead.
    pub fn set_many<K: AsRef<str>>(&self, record: impl IntoIterator<Item = (K, Value)>) -> &Self {
        self.apply_record(record, false)
    }

    pub fn set_many_silent<K: AsRef<str>>(
        &self,
        record: impl IntoIterator<Item = (K, Value)>,
    ) -> &Self {
        self.apply_record(record, true)
    }

    fn apply_record<K: AsRef<str>>(
        &self,
        record: impl IntoIterator<Item = (K, Value)>,
        silent: bool,
    ) -> &Self {
        for (key, value) in record {
            let key = key.as_ref();
            if value.is_null() {
                self.remove(key, silent);
            } else {
                self.mutate(key, Some(value), silent);
            }
        }
        self
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.inner.store.borrow().contains_key(key)
    }

    /// Remove `key` and emit `delete` / `delete:<key>`.
    pub fn delete(&self, key: &str) -> &Self {
        self.remove(key, false);
        self
    }

    pub fn delete_silent(&self, key: &str) -> &Self {
        self.remove(key, true);
        self
    }

    /// Remove several keys, emitting per key unless `silent`.
    pub fn delete_many<K: AsRef<str>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        silent: bool,
    ) -> &Self {
        for key in keys {
            self.remove(key.as_ref(), silent);
        }
        self
    }

    fn remove(&self, key: &str, silent: bool) -> Option<Value> {
        let removed = self.inner.store.borrow_mut().shift_remove(key);
        tracing::trace!(
            key,
            action = "delete",
            present = removed.is_some(),
            silent,
            "store mutation"
        );
        if !silent {
            self.inner.emitter.emit("delete", &[Value::String(key.to_owned())]);
            self.inner.emitter.emit(&keyed("delete", key), &[]);
        }
        // After an announced delete these find nothing left to release.
        self.release_bindings(key);
        self.cancel_waiters(key);
        removed
    }

    // ── Bulk helpers and snapshots ───────────────────────────────────

    /// Visit every entry in insertion order. Never emits.
    pub fn each(&self, mut f: impl FnMut(&str, &Value)) {
        for (key, value) in self.to_array() {
            f(&key, &value);
        }
    }

    /// Rewrite values in place. Returning `Some(new)` routes `new` through
    /// the mutation router, so changed values emit `set` as usual.
    pub fn map(&self, mut f: impl FnMut(&str, &Value) -> Option<Value>) -> &Self {
        for (key, value) in self.to_array() {
            if let Some(next) = f(&key, &value) {
                self.mutate(&key, Some(next), false);
            }
        }
        self
    }

    /// Delete every entry for which `keep` returns `false`.
    pub fn filter(&self, mut keep: impl FnMut(&str, &Value) -> bool) -> &Self {
        for (key, value) in self.to_array() {
            if !keep(&key, &value) {
                self.remove(&key, false);
            }
        }
        self
    }

    /// Snapshot as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.inner.store.borrow().clone())
    }

    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Snapshot as `(key, value)` pairs in insertion order.
    #[must_use]
    pub fn to_array(&self) -> Vec<(String, Value)> {
        self.inner
            .store
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.store.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.store.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.store.borrow().is_empty()
    }

    // ── Events ───────────────────────────────────────────────────────

    #[must_use]
    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn on(&self, event: impl Into<String>, f: impl Fn(&[Value]) + 'static) -> Listener {
        self.inner.emitter.on(event, f)
    }

    pub fn once(&self, event: impl Into<String>, f: impl Fn(&[Value]) + 'static) -> Listener {
        self.inner.emitter.once(event, f)
    }

    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        self.inner.emitter.off(event, handler)
    }

    pub fn emit(&self, event: &str, args: &[Value]) {
        self.inner.emitter.emit(event, args);
    }

    pub fn emit_async(&self, event: &str, args: &[Value]) {
        self.inner.emitter.emit_async(event, args);
    }

    /// Run one turn of deferred work: async emits and pending async writes.
    pub fn run_pending(&self) -> bool {
        self.inner.emitter.run_pending()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Remove every listener, sync binding, validator and computed entry.
    /// Stored values are kept; pending async reads complete as detached.
    pub fn teardown(&self) {
        let bindings = self.inner.syncs.borrow_mut().drain();
        for (target, binding) in bindings {
            binding.release(target.as_ref());
        }
        self.inner.emitter.clear();
        self.inner.waiters.borrow_mut().clear();
        self.inner.validators.borrow_mut().clear();
        self.inner.computed.borrow_mut().clear();
        tracing::debug!("model torn down");
    }
}

/// `"<action>:<key>"`.
#[must_use]
pub fn keyed(action: &str, key: &str) -> String {
    format!("{action}:{key}")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
