#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use supermodel::Model;

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Set { key: u8, value: i16 },
    SetSilent { key: u8, value: i16 },
    SetNull { key: u8 },
    Delete { key: u8 },
    Get { key: u8 },
    Validate { key: u8 },
    Compute { key: u8 },
    AwaitKey { key: u8 },
    OnceListener { key: u8 },
    Turn,
}

fn key(k: u8) -> String {
    // A small key space makes collisions between operations likely.
    format!("k{}", k % 8)
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let model = Model::new();
    let changes = Rc::new(Cell::new(0usize));
    let c = Rc::clone(&changes);
    model.on("set", move |_| c.set(c.get() + 1));

    let _ = model.register_validator("k0", supermodel::Rule::predicate(|v| v.is_i64()));
    model.register_computed("k1", |m| Value::from(m.len() as u64));

    let mut pending = Vec::new();
    for op in ops.into_iter().take(512) {
        match op {
            FuzzOp::Set { key: k, value } => {
                model.set(&key(k), value);
            }
            FuzzOp::SetSilent { key: k, value } => {
                model.set_silent(&key(k), value);
            }
            FuzzOp::SetNull { key: k } => {
                model.set(&key(k), Value::Null);
            }
            FuzzOp::Delete { key: k } => {
                model.delete(&key(k));
            }
            FuzzOp::Get { key: k } => {
                let _ = model.get(&key(k));
            }
            FuzzOp::Validate { key: k } => {
                let _ = model.validate(&key(k));
            }
            FuzzOp::Compute { key: k } => {
                let _ = model.compute(&key(k));
            }
            FuzzOp::AwaitKey { key: k } => {
                pending.push(model.deferred().get(&key(k)));
            }
            FuzzOp::OnceListener { key: k } => {
                let m = model.clone();
                model.once(format!("set:{}", key(k)), move |_| {
                    let _ = m.peek("k0");
                });
            }
            FuzzOp::Turn => {
                model.run_pending();
            }
        }
        assert!(model.len() <= 8);
    }

    model.run_pending();
    model.teardown();
    drop(pending);
});
