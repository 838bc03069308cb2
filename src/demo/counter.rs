//! A counter component.

use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::component::{ComponentDef, MethodResult, Replica, SimContext};
use crate::errors::CallError;
use crate::value::Value;

/// Configuration section for [`Counter`].
#[derive(Debug, Default, Deserialize)]
struct CounterConfig {
    /// Initial counter value.
    #[serde(default)]
    start: i64,
}

/// A replicated counter. Each replica keeps its own value; replicas of the
/// same component diverge as deliveries land on different instances, which
/// is exactly the kind of behavior ops are written to probe.
pub struct Counter {
    value: Mutex<i64>,
}

impl Counter {
    /// Registration record: methods `Inc(delta) -> value` and
    /// `Get() -> value`.
    pub fn definition() -> ComponentDef {
        ComponentDef {
            name: "Counter",
            methods: &["Inc", "Get"],
            build: Box::new(|cx| {
                let config: CounterConfig = cx.config_section()?.unwrap_or_default();
                Ok(Arc::new(Counter { value: Mutex::new(config.start) }))
            }),
        }
    }
}

impl Replica for Counter {
    fn invoke(&self, _cx: &SimContext, method: &str, args: &[Value]) -> MethodResult {
        match method {
            "Inc" => {
                let delta = match args {
                    [Value::Int(delta)] => *delta,
                    _ => return Err(CallError::app(format!("Inc: bad arguments: {:?}", args))),
                };
                let mut value = self.value.lock().unwrap();
                *value += delta;
                Ok(vec![Value::Int(*value)])
            }
            "Get" => Ok(vec![Value::Int(*self.value.lock().unwrap())]),
            other => panic!("Counter: unknown method {}", other),
        }
    }
}

/// A fake counter that answers every method with one fixed value. Useful to
/// pin a component's behavior while simulating the rest of the application.
pub struct FixedCounter {
    pub value: i64,
}

impl Replica for FixedCounter {
    fn invoke(&self, _cx: &SimContext, method: &str, _args: &[Value]) -> MethodResult {
        match method {
            "Inc" | "Get" => Ok(vec![Value::Int(self.value)]),
            other => panic!("FixedCounter: unknown method {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::CancelToken;

    fn background() -> SimContext {
        SimContext::new(0, 0, CancelToken::new())
    }

    #[test]
    fn test_counter_inc_accumulates() {
        let counter = Counter { value: Mutex::new(10) };
        let cx = background();
        assert_eq!(counter.invoke(&cx, "Inc", &[Value::Int(3)]), Ok(vec![Value::Int(13)]));
        assert_eq!(counter.invoke(&cx, "Get", &[]), Ok(vec![Value::Int(13)]));
    }

    #[test]
    fn test_counter_rejects_bad_arguments() {
        let counter = Counter { value: Mutex::new(0) };
        let result = counter.invoke(&background(), "Inc", &[Value::Str("three".to_string())]);
        assert!(matches!(result, Err(CallError::App(_))));
    }
}
