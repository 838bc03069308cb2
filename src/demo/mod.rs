//! Demo application: components and ops used by the harness binary and the
//! scenario tests.

pub mod counter;
pub mod store;

pub use counter::{Counter, FixedCounter};
pub use store::Store;

use rand::Rng;

use crate::component::ComponentDef;
use crate::errors::CallError;
use crate::op::Op;
use crate::sim::Simulator;
use crate::value::Value;

/// The demo component set: a counter and a store that calls into it.
pub fn components() -> Vec<ComponentDef> {
    vec![Counter::definition(), Store::definition()]
}

const KEYS: [&str; 3] = ["alpha", "beta", "gamma"];

/// Register the demo ops.
///
/// `read-back` writes a key and reads it again through the same component
/// handle. With more than one store replica the read may land on an
/// instance that never saw the write, so the op fails: this is the demo
/// application's seeded consistency bug.
pub fn register_demo_ops(sim: &Simulator) {
    sim.register_op(Op {
        name: "inc",
        gen: Box::new(|rng| rng.gen_range(1..=5i64)),
        components: vec!["Counter"],
        body: Box::new(|cx, delta, handles| {
            handles[0].call(cx, "Inc", vec![Value::Int(delta)])?;
            Ok(())
        }),
    });

    sim.register_op(Op {
        name: "put",
        gen: Box::new(|rng| {
            let key = KEYS[rng.gen_range(0..KEYS.len())].to_string();
            (key, rng.gen_range(0..100i64))
        }),
        components: vec!["Store"],
        body: Box::new(|cx, (key, value), handles| {
            handles[0].call(cx, "Put", vec![Value::from(key), Value::Int(value)])?;
            Ok(())
        }),
    });

    sim.register_op(Op {
        name: "read-back",
        gen: Box::new(|rng| {
            let key = KEYS[rng.gen_range(0..KEYS.len())].to_string();
            (key, rng.gen_range(0..100i64))
        }),
        components: vec!["Store"],
        body: Box::new(|cx, (key, value), handles| {
            let store = &handles[0];
            store.call(cx, "Put", vec![Value::from(key.clone()), Value::Int(value)])?;
            let returns = store.call(cx, "Get", vec![Value::from(key.clone())])?;
            match returns.first() {
                Some(Value::Int(read)) if *read == value => Ok(()),
                other => Err(CallError::app(format!(
                    "read-back of {:?}: wrote {}, read {:?}",
                    key, value, other
                ))),
            }
        }),
    });
}
