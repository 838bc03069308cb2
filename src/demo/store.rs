//! A key-value store component that calls through to the counter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::component::{ComponentDef, MethodResult, Replica, SimContext};
use crate::errors::CallError;
use crate::sim::proxy::Handle;
use crate::value::Value;

/// A replicated map of string keys to integers. Every `Put` also bumps the
/// counter component through the handle wired in at construction, so store
/// traffic produces nested calls for the scheduler to interleave.
pub struct Store {
    entries: Mutex<HashMap<String, i64>>,
    counter: Handle,
}

impl Store {
    /// Registration record: methods `Put(key, value) -> count` and
    /// `Get(key) -> value`.
    pub fn definition() -> ComponentDef {
        ComponentDef {
            name: "Store",
            methods: &["Put", "Get"],
            build: Box::new(|cx| {
                let counter = cx.handle("Counter")?;
                Ok(Arc::new(Store { entries: Mutex::new(HashMap::new()), counter }))
            }),
        }
    }
}

impl Replica for Store {
    fn invoke(&self, cx: &SimContext, method: &str, args: &[Value]) -> MethodResult {
        match method {
            "Put" => {
                let (key, value) = match args {
                    [Value::Str(key), Value::Int(value)] => (key.clone(), *value),
                    _ => return Err(CallError::app(format!("Put: bad arguments: {:?}", args))),
                };
                self.entries.lock().unwrap().insert(key, value);
                // The nested call is itself subject to scheduling and error
                // injection; an injected failure surfaces to our caller.
                self.counter.call(cx, "Inc", vec![Value::Int(1)])
            }
            "Get" => {
                let key = match args {
                    [Value::Str(key)] => key,
                    _ => return Err(CallError::app(format!("Get: bad arguments: {:?}", args))),
                };
                match self.entries.lock().unwrap().get(key) {
                    Some(value) => Ok(vec![Value::Int(*value)]),
                    None => Ok(vec![Value::Unit]),
                }
            }
            other => panic!("Store: unknown method {}", other),
        }
    }
}
