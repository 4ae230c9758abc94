#![forbid(unsafe_code)]

//! Future-based access to keys.
//!
//! - [`Deferred::get`] resolves with the key's value now if present,
//!   otherwise on the first later `set` of the key. If the key is deleted
//!   first, the future completes with [`StoreError::KeyDeleted`].
//! - [`Deferred::set`] writes the key once a supplied future completes. The
//!   write happens on a later [`Model::run_pending`] turn.
//!
//! Waiting is always a one-shot `set:<key>` subscription paired with a
//! one-shot `delete:<key>` subscription; whichever fires first disarms the
//! other. The delete side is also tracked per key, so removing the key
//! cancels the wait even when the removal is silent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use serde_json::Value;

use crate::emitter::WeakListener;
use crate::error::{Result, StoreError};
use crate::model::{Model, keyed};

/// Completes with the value of a key (see [`Deferred::get`]).
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct KeyFuture {
    rx: oneshot::Receiver<Result<Value>>,
}

impl Future for KeyFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped without answering: the model went away.
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(StoreError::Detached)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Delete-side subscriptions of pending waits, by key.
#[derive(Default)]
pub(crate) struct Waiters {
    by_key: HashMap<String, Vec<WeakListener>>,
}

impl Waiters {
    fn track(&mut self, key: &str, cancel: WeakListener) {
        let pending = self.by_key.entry(key.to_owned()).or_default();
        // Waits that already resolved have had their delete side dropped.
        pending.retain(WeakListener::is_live);
        pending.push(cancel);
    }

    fn take(&mut self, key: &str) -> Vec<WeakListener> {
        self.by_key.remove(key).unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.by_key.clear();
    }
}

impl std::fmt::Debug for Waiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.by_key.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

/// Async facade over a model's keys.
#[derive(Debug, Clone, Copy)]
pub struct Deferred<'a> {
    model: &'a Model,
}

impl Model {
    #[must_use]
    pub fn deferred(&self) -> Deferred<'_> {
        Deferred { model: self }
    }
}

impl Deferred<'_> {
    /// Future for the value of `key`.
    ///
    /// Unlike a bare one-shot `set:<key>` subscription, the future does not
    /// hang when the key is removed before it is ever set: it completes
    /// with [`StoreError::KeyDeleted`] instead of a value.
    pub fn get(&self, key: &str) -> KeyFuture {
        let (tx, rx) = oneshot::channel();
        if let Some(value) = self.model.peek(key) {
            let _ = tx.send(Ok(value));
        } else {
            let sender = Rc::new(RefCell::new(Some(tx)));
            let on_delete = Rc::clone(&sender);
            let missing = key.to_owned();
            self.wait_for_set(
                key,
                move |value| {
                    if let Some(tx) = sender.take() {
                        let _ = tx.send(Ok(value));
                    }
                },
                move || {
                    if let Some(tx) = on_delete.take() {
                        let _ = tx.send(Err(StoreError::key_deleted(missing.as_str())));
                    }
                },
            );
        }
        KeyFuture { rx }
    }

    /// Run `f` with the value of `key`, now or on its first later `set`.
    /// Dropped unrun if the key is deleted first.
    pub fn with(&self, key: &str, f: impl FnOnce(Value) + 'static) {
        if let Some(value) = self.model.peek(key) {
            f(value);
            return;
        }
        let slot = RefCell::new(Some(f));
        self.wait_for_set(
            key,
            move |value| {
                if let Some(f) = slot.take() {
                    f(value);
                }
            },
            || {},
        );
    }

    /// Write `key` once `value` completes.
    ///
    /// The future is driven by [`Model::run_pending`]. If the model is
    /// dropped first the result is discarded.
    pub fn set<F, V>(&self, key: &str, value: F)
    where
        F: Future<Output = V> + 'static,
        V: Into<Value>,
    {
        let model = self.model.downgrade();
        let key = key.to_owned();
        self.model.emitter().scheduler().spawn(async move {
            let value: Value = value.await.into();
            match model.upgrade() {
                Some(model) => {
                    tracing::debug!(key = %key, "deferred write completed");
                    model.set(&key, value);
                }
                None => tracing::debug!(key = %key, "deferred write dropped; model is gone"),
            }
        });
    }

    fn wait_for_set(
        &self,
        key: &str,
        on_set: impl Fn(Value) + 'static,
        on_delete: impl Fn() + 'static,
    ) {
        // Weak cross-references: the registry alone keeps the pair alive.
        let delete_slot: Rc<RefCell<Option<WeakListener>>> = Rc::new(RefCell::new(None));
        let disarm = Rc::clone(&delete_slot);
        let set_listener = self
            .model
            .once(keyed("set", key), move |args| {
                if let Some(listener) = disarm.take() {
                    listener.off();
                }
                on_set(args.first().cloned().unwrap_or(Value::Null));
            })
            .downgrade();
        let delete_listener = self.model.once(keyed("delete", key), move |_| {
            set_listener.off();
            on_delete();
        });
        *delete_slot.borrow_mut() = Some(delete_listener.downgrade());
        self.model
            .inner
            .waiters
            .borrow_mut()
            .track(key, delete_listener.downgrade());
    }
}

impl Model {
    /// Cancel every pending wait on `key` without emitting `delete:<key>`.
    pub(crate) fn cancel_waiters(&self, key: &str) {
        let pending = self.inner.waiters.borrow_mut().take(key);
        for cancel in pending {
            cancel.fire(&[]);
        }
    }
}
