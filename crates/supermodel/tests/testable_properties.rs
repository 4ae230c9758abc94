//! End-to-end behaviour of the public store API.
//!
//! Each section exercises one observable guarantee through the crate's
//! public surface only:
//!
//! 1. Writing the same value twice announces it once.
//! 2. Reads are observable, even for absent keys.
//! 3. One-shot handlers fire exactly once.
//! 4. Deleting a key, silently or not, tears down its bindings and pending
//!    reads.
//! 5. Validators must return a boolean from their probe.
//! 6. Computed keys announce only changed results.
//! 7. Construction, binding and async-read scenarios.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::FutureExt;
use futures::executor::block_on;
use serde_json::json;
use supermodel::{Handler, Model, Record, Rule, StoreError, SyncTarget, Value};

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Target {
    props: RefCell<HashMap<String, Value>>,
}

impl SyncTarget for Target {
    fn set_property(&self, property: &str, value: &Value) {
        self.props
            .borrow_mut()
            .insert(property.to_owned(), value.clone());
    }
}

impl Target {
    fn prop(&self, name: &str) -> Option<Value> {
        self.props.borrow().get(name).cloned()
    }
}

fn count_event(model: &Model, event: &str) -> Rc<Cell<usize>> {
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    model.on(event, move |_| c.set(c.get() + 1));
    count
}

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Idempotent write
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn repeated_write_emits_once() {
    let model = Model::new();
    let sets = count_event(&model, "set:k");
    model.set("k", json!({"nested": [1, 2]}));
    model.set("k", json!({"nested": [1, 2]}));
    assert_eq!(sets.get(), 1);
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Observable read
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn read_emits_bare_and_keyed_even_when_absent() {
    let model = Model::new();
    let bare = Rc::new(RefCell::new(Vec::new()));
    let b = Rc::clone(&bare);
    model.on("get", move |args| b.borrow_mut().push(args.to_vec()));
    let keyed = count_event(&model, "get:ghost");

    assert_eq!(model.get("ghost"), None);
    assert_eq!(*bare.borrow(), vec![vec![json!("ghost")]]);
    assert_eq!(keyed.get(), 1);
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Once fires exactly once
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn once_handler_fires_exactly_once() {
    let model = Model::new();
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    let handler = Handler::new(move |_| c.set(c.get() + 1));
    model.emitter().once_handler("ping", &handler);

    model.emit("ping", &[]);
    assert!(!model.emitter().has_listener("ping", Some(&handler)));
    model.emit("ping", &[]);
    assert_eq!(count.get(), 1);
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Delete cascades
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn delete_tears_down_bindings_and_pending_reads() {
    let model = Model::new();
    let first = Rc::new(Target::default());
    let second = Rc::new(Target::default());
    model.sync_as(&first, "text", "k");
    model.sync_as(&second, "caption", "k");
    let pending = model.deferred().get("k");

    model.delete("k");
    model.set("k", "after");

    assert_eq!(first.prop("text"), None);
    assert_eq!(second.prop("caption"), None);
    assert_eq!(model.binding_count(&first), 0);
    assert_eq!(model.binding_count(&second), 0);
    // The read never sees the later value.
    assert_eq!(block_on(pending), Err(StoreError::key_deleted("k")));
}

#[test]
fn silent_delete_tears_down_bindings_and_pending_reads() {
    let model = Model::new();
    let target = Rc::new(Target::default());
    model.sync_as(&target, "label", "k");
    let pending = model.deferred().get("k");
    let deletes = count_event(&model, "delete:k");

    model.delete_many(["k"], true);
    model.set("k", "after");

    assert_eq!(deletes.get(), 0);
    assert_eq!(model.binding_count(&target), 0);
    assert_eq!(target.prop("label"), None);
    assert_eq!(block_on(pending), Err(StoreError::key_deleted("k")));
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Validator probe contract
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn non_boolean_validator_is_not_registered() {
    let model = Model::new();
    let outcome = model.valid().register("x", Rule::dynamic(|_| json!("yes")));
    assert!(matches!(outcome, Err(StoreError::InvalidValidator { .. })));
    assert!(!model.has_validator("x"));

    model.set("x", "yes");
    assert!(!model.validate("x"));
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Computed memoization
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn computed_result_announced_only_on_change() {
    let model = Model::new();
    model.set("a", 1).set("b", 2);
    model.register_computed("sum", |m| {
        let a = m.peek("a").and_then(|v| v.as_i64()).unwrap_or(0);
        let b = m.peek("b").and_then(|v| v.as_i64()).unwrap_or(0);
        json!(a + b)
    });
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    model.on("compute:sum", move |args| s.borrow_mut().push(args[0].clone()));

    let _ = model.compute("sum");
    model.run_pending();
    assert_eq!(*seen.borrow(), vec![json!(3)]);

    let _ = model.compute("sum");
    model.run_pending();
    assert_eq!(*seen.borrow(), vec![json!(3)]);

    model.set("a", 4);
    let _ = model.compute("sum");
    model.run_pending();
    assert_eq!(*seen.borrow(), vec![json!(3), json!(6)]);
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Scenarios
// ═════════════════════════════════════════════════════════════════════════

#[test]
fn initial_record_is_readable() {
    let model = Model::from_record(record(json!({"name": "x"})));
    assert!(model.has("name"));
    assert_eq!(model.get("name"), Some(json!("x")));
}

#[test]
fn binding_before_key_is_set() {
    let model = Model::new();
    let target = Rc::new(Target::default());
    model.sync_as(&target, "label", "name");
    assert_eq!(target.prop("label"), None);

    model.set("name", "y");
    assert_eq!(target.prop("label"), Some(json!("y")));
}

#[test]
fn async_read_resolves_with_first_set_only() {
    let model = Model::new();
    let first = model.deferred().get("ready");
    model.set("ready", true);
    model.set("ready", false);
    assert_eq!(block_on(first), Ok(json!(true)));

    let second = model.deferred().get("ready");
    assert_eq!(second.now_or_never(), Some(Ok(json!(false))));
}

#[test]
fn deferred_write_lands_on_a_later_turn() {
    let model = Model::new();
    let sets = count_event(&model, "set:total");
    model.deferred().set("total", async { 99 });
    assert!(!model.has("total"));
    model.run_pending();
    assert_eq!(model.peek("total"), Some(json!(99)));
    assert_eq!(sets.get(), 1);
}
