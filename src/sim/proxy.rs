//! Component handles.
//!
//! A `Handle` represents a component from one caller's perspective. Invoking
//! a method through it does not execute anything directly: the invocation
//! becomes a pending call for the scheduler to deliver (or to replace with
//! an injected error), and the calling fiber blocks on a single-shot reply
//! channel until the scheduler decides the call's fate.

use std::sync::Arc;

use crossbeam_channel::{bounded, select};

use crate::component::SimContext;
use crate::errors::CallError;
use crate::event::Event;
use crate::sim::scheduler::{Core, PendingCall};
use crate::value::Value;

/// A caller-scoped handle to a registered component.
#[derive(Clone)]
pub struct Handle {
    core: Arc<Core>,
    component: usize,
    caller: Arc<str>,
    caller_replica: u64,
}

impl Handle {
    pub(crate) fn new(core: Arc<Core>, component: usize, caller: &str, caller_replica: u64) -> Handle {
        Handle { core, component, caller: Arc::from(caller), caller_replica }
    }

    /// Name of the component this handle targets.
    pub fn component(&self) -> &str {
        &self.core.registry.spec(self.component).name
    }

    /// Invoke a method on the component.
    ///
    /// Mints a new span id, records a `Call` event, enqueues the pending
    /// call, takes a scheduler step, and then blocks until the reply is
    /// released or the simulation is cancelled. An injected failure
    /// surfaces as `CallError::RemoteCall`; cancellation as
    /// `CallError::Cancelled`.
    ///
    /// # Panics
    ///
    /// Panics if `method` is not part of the component's registered method
    /// set; that is a programming error in the caller.
    pub fn call(&self, cx: &SimContext, method: &str, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
        let spec = self.core.registry.spec(self.component);
        if !spec.methods.iter().any(|m| m == method) {
            panic!("method {}.{} not found", spec.name, method);
        }

        let (reply_tx, reply_rx) = bounded(1);
        {
            let mut guard = self.core.shared.lock().unwrap();
            let shared = &mut *guard;
            let span_id = shared.next_span;
            shared.next_span += 1;
            shared.history.append(Event::Call {
                trace_id: cx.trace_id(),
                span_id,
                caller: self.caller.to_string(),
                caller_replica: self.caller_replica,
                component: spec.name.clone(),
                method: method.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            });
            shared.calls.push(PendingCall {
                trace_id: cx.trace_id(),
                span_id,
                component: self.component,
                method: method.to_string(),
                args,
                reply_tx,
            });
        }

        // Keep the simulation progressing, then wait for our reply.
        self.core.step();

        let cancel_rx = self.core.cancel.subscribe();
        select! {
            recv(reply_rx) -> msg => match msg {
                Ok(outcome) => outcome,
                Err(_) => Err(CallError::Cancelled),
            },
            recv(cancel_rx) -> _ => Err(CallError::Cancelled),
        }
    }
}
