#![forbid(unsafe_code)]

//! Listener registry: event name to an insertion-ordered set of handlers.
//!
//! # Invariants
//!
//! 1. A handler appears at most once per event name (identity, not value).
//! 2. An event name is dropped as soon as its handler set becomes empty.
//! 3. Iteration follows registration order.

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

type HandlerFn = dyn Fn(&[Value]);

/// A shared, identity-compared event handler.
///
/// Two `Handler`s are the same listener only if they are clones of one
/// another; structurally identical closures are distinct handlers.
#[derive(Clone)]
pub struct Handler(Rc<HandlerFn>);

impl Handler {
    pub fn new(f: impl Fn(&[Value]) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the handler with the event arguments.
    pub fn call(&self, args: &[Value]) {
        (self.0)(args);
    }

    pub(crate) fn downgrade(&self) -> WeakHandler {
        WeakHandler(Rc::downgrade(&self.0))
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        // Compare data addresses only; vtable pointers are not stable across codegen units.
        std::ptr::eq(
            Rc::as_ptr(&self.0).cast::<()>(),
            Rc::as_ptr(&other.0).cast::<()>(),
        )
    }
}

/// Non-owning handler reference, for listeners that must not keep each
/// other alive.
#[derive(Clone)]
pub(crate) struct WeakHandler(Weak<HandlerFn>);

impl WeakHandler {
    pub(crate) fn upgrade(&self) -> Option<Handler> {
        self.0.upgrade().map(Handler)
    }
}

impl<F: Fn(&[Value]) + 'static> From<F> for Handler {
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// One registered handler and its firing mode.
#[derive(Debug, Clone)]
pub struct ListenerRecord {
    pub handler: Handler,
    pub once: bool,
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    map: HashMap<String, Vec<ListenerRecord>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `event`.
    ///
    /// Re-adding a handler that is already present keeps its position and
    /// only updates the firing mode. Returns `true` if the handler was new.
    pub fn add(&mut self, event: &str, handler: Handler, once: bool) -> bool {
        let set = self.map.entry(event.to_owned()).or_default();
        if let Some(existing) = set.iter_mut().find(|r| r.handler.same(&handler)) {
            existing.once = once;
            return false;
        }
        set.push(ListenerRecord { handler, once });
        true
    }

    /// Remove `handler` from `event`. Removing an absent handler is a no-op.
    pub fn remove(&mut self, event: &str, handler: &Handler) -> bool {
        let Some(set) = self.map.get_mut(event) else {
            return false;
        };
        let before = set.len();
        set.retain(|r| !r.handler.same(handler));
        let removed = set.len() != before;
        if set.is_empty() {
            self.map.remove(event);
        }
        removed
    }

    /// With a handler: whether that handler is registered for `event`.
    /// Without: whether `event` has any handler at all.
    #[must_use]
    pub fn contains(&self, event: &str, handler: Option<&Handler>) -> bool {
        match (self.map.get(event), handler) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(set), Some(h)) => set.iter().any(|r| r.handler.same(h)),
        }
    }

    /// Copy of the current handler set for `event`, in registration order.
    #[must_use]
    pub fn snapshot(&self, event: &str) -> Vec<ListenerRecord> {
        self.map.get(event).cloned().unwrap_or_default()
    }

    /// Iterate a snapshot of `event`'s handlers, so `f` may freely mutate
    /// the registry it was handed out of.
    pub fn for_each(&self, event: &str, mut f: impl FnMut(&ListenerRecord)) {
        for record in self.snapshot(event) {
            f(&record);
        }
    }

    /// Decide whether `handler` may fire right now for `event`.
    ///
    /// Returns `false` when the handler has been removed since the snapshot
    /// was taken. A one-shot handler is removed before this returns `true`,
    /// so a recursive emit from inside the handler cannot fire it again.
    pub fn claim(&mut self, event: &str, handler: &Handler) -> bool {
        let once = match self
            .map
            .get(event)
            .and_then(|set| set.iter().find(|r| r.handler.same(handler)))
        {
            Some(record) => record.once,
            None => return false,
        };
        if once {
            self.remove(event, handler);
        }
        true
    }

    #[must_use]
    pub fn len(&self, event: &str) -> usize {
        self.map.get(event).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Event names that currently have at least one handler.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
