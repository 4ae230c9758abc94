#![forbid(unsafe_code)]

//! Event dispatcher with persistent and one-shot subscriptions.
//!
//! # Dispatch rules
//!
//! - [`Emitter::emit`] runs every handler registered for the event
//!   synchronously, in registration order, before returning. A panicking
//!   handler unwinds straight to the caller of `emit`.
//! - [`Emitter::emit_async`] schedules each matched handler as its own
//!   deferred task. Tasks run on the next [`Emitter::run_pending`]; their
//!   relative order is **not** guaranteed. A panicking deferred handler is
//!   isolated to its own task.
//! - A one-shot handler is unregistered before it is invoked, so it fires
//!   exactly once even if it re-emits its own event.
//! - A handler removed while a dispatch is in flight does not fire for the
//!   remainder of that dispatch.
//!
//! Handles returned by `on`/`once` do **not** unsubscribe on drop; call
//! [`Listener::off`] or convert to a [`ListenerGuard`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::listeners::{Handler, ListenerRegistry, WeakHandler};
use crate::scheduler::Scheduler;

#[derive(Debug, Default)]
struct EmitterInner {
    registry: RefCell<ListenerRegistry>,
    scheduler: Scheduler,
}

impl EmitterInner {
    fn register(&self, event: &str, handler: Handler, once: bool) {
        self.registry.borrow_mut().add(event, handler, once);
    }

    fn unregister(&self, event: &str, handler: &Handler) -> bool {
        self.registry.borrow_mut().remove(event, handler)
    }
}

/// Shared handle to an event dispatcher. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct Emitter {
    inner: Rc<EmitterInner>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.registry.borrow();
        let mut events: Vec<&str> = registry.events().collect();
        events.sort_unstable();
        f.debug_struct("Emitter").field("events", &events).finish()
    }
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `f` to `event` until explicitly removed.
    pub fn on(&self, event: impl Into<String>, f: impl Fn(&[Value]) + 'static) -> Listener {
        self.listen(event.into(), Handler::new(f), false)
    }

    /// Subscribe `f` to the next firing of `event` only.
    pub fn once(&self, event: impl Into<String>, f: impl Fn(&[Value]) + 'static) -> Listener {
        self.listen(event.into(), Handler::new(f), true)
    }

    /// Subscribe an existing handler. Subscribing the same handler twice to
    /// the same event keeps a single registration.
    pub fn on_handler(&self, event: impl Into<String>, handler: &Handler) -> Listener {
        self.listen(event.into(), handler.clone(), false)
    }

    pub fn once_handler(&self, event: impl Into<String>, handler: &Handler) -> Listener {
        self.listen(event.into(), handler.clone(), true)
    }

    /// Bulk registration from `(event, handler)` pairs.
    pub fn on_many<I, S>(&self, pairs: I) -> Listeners
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: Into<String>,
    {
        Listeners(
            pairs
                .into_iter()
                .map(|(event, handler)| self.listen(event.into(), handler, false))
                .collect(),
        )
    }

    pub fn once_many<I, S>(&self, pairs: I) -> Listeners
    where
        I: IntoIterator<Item = (S, Handler)>,
        S: Into<String>,
    {
        Listeners(
            pairs
                .into_iter()
                .map(|(event, handler)| self.listen(event.into(), handler, true))
                .collect(),
        )
    }

    fn listen(&self, event: String, handler: Handler, once: bool) -> Listener {
        self.inner.register(&event, handler.clone(), once);
        Listener {
            emitter: Rc::downgrade(&self.inner),
            event,
            handler,
        }
    }

    /// Remove `handler` from `event`. Safe to call repeatedly and from
    /// inside a handler currently being dispatched.
    pub fn off(&self, event: &str, handler: &Handler) -> bool {
        self.inner.unregister(event, handler)
    }

    /// Dispatch `event` synchronously.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let snapshot = self.inner.registry.borrow().snapshot(event);
        if snapshot.is_empty() {
            return;
        }
        tracing::trace!(event, handlers = snapshot.len(), "emit");
        for record in snapshot {
            let fire = self.inner.registry.borrow_mut().claim(event, &record.handler);
            if fire {
                record.handler.call(args);
            }
        }
    }

    /// Dispatch `event` on a later turn, one task per handler.
    pub fn emit_async(&self, event: &str, args: &[Value]) {
        let snapshot = self.inner.registry.borrow().snapshot(event);
        if snapshot.is_empty() {
            return;
        }
        tracing::trace!(event, handlers = snapshot.len(), "emit_async");
        let args: Rc<[Value]> = Rc::from(args);
        for record in snapshot {
            // One-shot handlers are claimed now so a second emit before the
            // next turn cannot schedule them again.
            if !self.inner.registry.borrow_mut().claim(event, &record.handler) {
                continue;
            }
            let once = record.once;
            let handler = record.handler;
            let args = Rc::clone(&args);
            let weak = Rc::downgrade(&self.inner);
            let event_name = event.to_owned();
            self.inner.scheduler.defer(event, move || {
                if !once {
                    let still_registered = weak.upgrade().is_some_and(|inner| {
                        inner
                            .registry
                            .borrow()
                            .contains(&event_name, Some(&handler))
                    });
                    if !still_registered {
                        return;
                    }
                }
                handler.call(&args);
            });
        }
    }

    /// Whether `event` has `handler` registered, or any handler if `None`.
    #[must_use]
    pub fn has_listener(&self, event: &str, handler: Option<&Handler>) -> bool {
        self.inner.registry.borrow().contains(event, handler)
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.registry.borrow().len(event)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.inner.registry.borrow_mut().clear();
    }

    /// Run deferred handlers and tasks until none are ready.
    pub fn run_pending(&self) -> bool {
        self.inner.scheduler.run_pending()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }
}

/// Handle to a single registration.
///
/// Besides cancelling, the handle can re-arm the same handler as persistent
/// ([`Listener::on`]) or one-shot ([`Listener::once`]); re-arming moves it to
/// the end of the dispatch order.
#[derive(Clone)]
pub struct Listener {
    emitter: Weak<EmitterInner>,
    event: String,
    handler: Handler,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("event", &self.event)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Listener {
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Unsubscribe. Idempotent.
    pub fn off(&self) -> &Self {
        if let Some(inner) = self.emitter.upgrade() {
            inner.unregister(&self.event, &self.handler);
        }
        self
    }

    /// Re-register as a persistent listener.
    pub fn on(&self) -> &Self {
        self.rearm(false)
    }

    /// Re-register as a one-shot listener.
    pub fn once(&self) -> &Self {
        self.rearm(true)
    }

    fn rearm(&self, once: bool) -> &Self {
        if let Some(inner) = self.emitter.upgrade() {
            inner.unregister(&self.event, &self.handler);
            inner.register(&self.event, self.handler.clone(), once);
        }
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.emitter.upgrade().is_some_and(|inner| {
            inner
                .registry
                .borrow()
                .contains(&self.event, Some(&self.handler))
        })
    }

    /// A handle that can cancel this registration without keeping the
    /// handler alive.
    pub(crate) fn downgrade(&self) -> WeakListener {
        WeakListener {
            emitter: Weak::clone(&self.emitter),
            event: self.event.clone(),
            handler: self.handler.downgrade(),
        }
    }

    /// Tie the registration to a scope: it is removed when the guard drops.
    #[must_use]
    pub fn guard(self) -> ListenerGuard {
        ListenerGuard(self)
    }
}

/// Weak counterpart of [`Listener`], used to pair subscriptions that cancel
/// each other.
pub(crate) struct WeakListener {
    emitter: Weak<EmitterInner>,
    event: String,
    handler: WeakHandler,
}

impl WeakListener {
    pub(crate) fn off(&self) {
        if let Some((inner, handler)) = self.upgrade() {
            inner.unregister(&self.event, &handler);
        }
    }

    /// Invoke this one registration directly, without dispatching its event
    /// to anyone else. Follows the usual claim rules: a one-shot handler is
    /// removed first, and a handler that is no longer registered does not
    /// run. Returns whether the handler ran.
    pub(crate) fn fire(&self, args: &[Value]) -> bool {
        let Some((inner, handler)) = self.upgrade() else {
            return false;
        };
        let claimed = inner.registry.borrow_mut().claim(&self.event, &handler);
        if claimed {
            handler.call(args);
        }
        claimed
    }

    /// Whether the handler still exists (the registry or a handle owns it).
    pub(crate) fn is_live(&self) -> bool {
        self.handler.upgrade().is_some()
    }

    fn upgrade(&self) -> Option<(Rc<EmitterInner>, Handler)> {
        Some((self.emitter.upgrade()?, self.handler.upgrade()?))
    }
}

/// RAII guard that unsubscribes its listener on drop.
#[derive(Debug)]
pub struct ListenerGuard(Listener);

impl ListenerGuard {
    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.0
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.off();
    }
}

/// Handles produced by a bulk registration.
#[derive(Debug, Clone, Default)]
pub struct Listeners(Vec<Listener>);

impl Listeners {
    /// Unsubscribe every listener in the set.
    pub fn off(&self) -> &Self {
        for listener in &self.0 {
            listener.off();
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Listeners {
    type Item = Listener;
    type IntoIter = std::vec::IntoIter<Listener>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
