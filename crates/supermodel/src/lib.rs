#![forbid(unsafe_code)]

//! Reactive key/value store.
//!
//! A [`Model`] holds JSON values under string keys and announces every
//! change on an event bus. On top of the store sit per-key validators,
//! computed keys, bidirectional bindings to external objects, and a
//! future-based facade for keys that are not set yet.
//!
//! - [`Model`]: the store and its mutation router.
//! - [`Emitter`] / [`Listener`]: persistent and one-shot subscriptions,
//!   synchronous and deferred dispatch.
//! - [`Rule`]: validator rules, registered with [`Model::register_validator`].
//! - [`Computation`]: derivations, registered with [`Model::register_computed`].
//! - [`SyncTarget`] / [`TextInput`]: objects a model can drive and listen to.
//! - [`Deferred`] / [`KeyFuture`]: awaiting keys and writing future results.
//!
//! # Architecture
//!
//! Everything is single-threaded: `Model` is an `Rc` handle and handlers run
//! on the caller's stack. Deferred work (async emits, pending writes) queues
//! on a local executor owned by the model and runs only when the host calls
//! [`Model::run_pending`].
//!
//! # Invariants
//!
//! 1. A write fires `set` and `set:<key>` only when the value changed.
//! 2. Bare events fire before their keyed counterpart.
//! 3. A one-shot handler fires at most once.
//! 4. Handlers run in registration order for synchronous dispatch.
//! 5. No store borrow is held while user code runs, so handlers may freely
//!    read and write the model they observe.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use supermodel::{Model, Value};
//!
//! let model = Model::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = Rc::clone(&seen);
//! model.on("set:name", move |args: &[Value]| log.borrow_mut().push(args[0].clone()));
//!
//! model.set("name", "ada");
//! model.set("name", "ada");
//! assert_eq!(*seen.borrow(), vec![Value::from("ada")]);
//! ```

pub mod compute;
pub mod config;
pub mod deferred;
pub mod emitter;
pub mod error;
pub mod listeners;
pub mod model;
mod scheduler;
pub mod sync;
pub mod validate;

pub use compute::Computation;
pub use config::ModelConfig;
pub use deferred::{Deferred, KeyFuture};
pub use emitter::{Emitter, Listener, ListenerGuard, Listeners};
pub use error::{Result, StoreError};
pub use listeners::{Handler, ListenerRegistry};
pub use model::{Model, Mutation, Record, keyed};
pub use sync::{BindingMode, ChangeToken, SyncTarget, TextInput};
pub use validate::{Rule, Validation};

pub use serde_json::Value;
