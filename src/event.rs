//! Simulation events and the history recorder.
//!
//! Every scheduler action appends one or more typed events to the history.
//! The append order is the order in which the mutex-protected appends ran,
//! which makes the history a total order over the whole simulation; tests
//! and the diagram renderer assert against that linearization.

use serde::{Deserialize, Serialize};

/// An atomic step of a simulation.
///
/// Trace ids group every event belonging to one op invocation; span ids are
/// unique per op start and per method call. Both counters start at 1, with 0
/// reserved as the invalid id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// An op began executing.
    OpStart {
        trace_id: u64,
        span_id: u64,
        /// Op name.
        name: String,
        /// Stringified generated arguments.
        args: Vec<String>,
    },
    /// An op finished executing.
    OpFinish {
        trace_id: u64,
        span_id: u64,
        /// Returned error message, or `<nil>` on success.
        error: String,
    },
    /// A component method call was created by a proxy.
    Call {
        trace_id: u64,
        span_id: u64,
        /// Calling component, or `"op"` for op bodies.
        caller: String,
        /// Calling replica index, or the op's trace id for op bodies.
        caller_replica: u64,
        /// Component being called.
        component: String,
        /// Method being called.
        method: String,
        /// Stringified method arguments.
        args: Vec<String>,
    },
    /// A pending call was handed to a replica.
    DeliverCall {
        trace_id: u64,
        span_id: u64,
        component: String,
        /// Replica index the call was delivered to.
        replica: usize,
    },
    /// A replica finished executing a method.
    Return {
        trace_id: u64,
        span_id: u64,
        component: String,
        replica: usize,
        /// Stringified return values; the final slot is the error return.
        returns: Vec<String>,
    },
    /// A pending reply was released to its waiting caller.
    DeliverReturn { trace_id: u64, span_id: u64 },
    /// A remote-call error was injected in place of a call or reply.
    DeliverError { trace_id: u64, span_id: u64 },
}

impl Event {
    /// The trace id carried by the event.
    pub fn trace_id(&self) -> u64 {
        match self {
            Event::OpStart { trace_id, .. }
            | Event::OpFinish { trace_id, .. }
            | Event::Call { trace_id, .. }
            | Event::DeliverCall { trace_id, .. }
            | Event::Return { trace_id, .. }
            | Event::DeliverReturn { trace_id, .. }
            | Event::DeliverError { trace_id, .. } => *trace_id,
        }
    }

    /// The span id carried by the event.
    pub fn span_id(&self) -> u64 {
        match self {
            Event::OpStart { span_id, .. }
            | Event::OpFinish { span_id, .. }
            | Event::Call { span_id, .. }
            | Event::DeliverCall { span_id, .. }
            | Event::Return { span_id, .. }
            | Event::DeliverReturn { span_id, .. }
            | Event::DeliverError { span_id, .. } => *span_id,
        }
    }
}

/// Append-only event log. Guarded by the scheduler mutex; the recorder
/// itself imposes no schema beyond the `Event` variants.
#[derive(Debug, Default)]
pub struct History {
    events: Vec<Event>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> History {
        History { events: Vec::new() }
    }

    /// Append one event.
    pub fn append(&mut self, event: Event) {
        self.events.push(event);
    }

    /// All recorded events, in append order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Clone the events out for a `Results` value.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_append_preserves_order() {
        let mut history = History::new();
        history.append(Event::OpStart {
            trace_id: 1,
            span_id: 1,
            name: "inc".to_string(),
            args: vec!["3".to_string()],
        });
        history.append(Event::OpFinish {
            trace_id: 1,
            span_id: 1,
            error: "<nil>".to_string(),
        });

        assert_eq!(history.len(), 2);
        assert_eq!(history.events()[0].span_id(), 1);
        assert_eq!(history.snapshot(), history.events().to_vec());
    }

    #[test]
    fn test_event_id_accessors() {
        let event = Event::DeliverCall {
            trace_id: 4,
            span_id: 9,
            component: "Counter".to_string(),
            replica: 0,
        };
        assert_eq!(event.trace_id(), 4);
        assert_eq!(event.span_id(), 9);
    }
}
