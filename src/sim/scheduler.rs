//! The simulation scheduler.
//!
//! One mutex guards everything a scheduling decision can touch: the RNG,
//! the pending-call and pending-reply queues, the history, and the id
//! counters. `step` is the sole choice point; fibers call back into it only
//! after releasing the lock, so the sequence of random draws (and therefore
//! the history) is identical for a given seed on every run.

use std::sync::{Arc, Mutex, RwLock};

use crossbeam_channel::Sender;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::component::{MethodResult, SimContext};
use crate::errors::CallError;
use crate::event::{Event, History};
use crate::fiber::{CancelToken, FiberGroup};
use crate::op::{ErasedOp, OpSet, SimRng};
use crate::registry::Registry;
use crate::sim::proxy::Handle;
use crate::sim::Options;
use crate::value::Value;

/// A pending method invocation awaiting a scheduling decision.
pub(crate) struct PendingCall {
    pub trace_id: u64,
    pub span_id: u64,
    /// Target component index.
    pub component: usize,
    pub method: String,
    pub args: Vec<Value>,
    /// Single-shot channel to the waiting proxy.
    pub reply_tx: Sender<MethodResult>,
}

/// A produced method return awaiting delivery to its caller.
pub(crate) struct PendingReply {
    pub trace_id: u64,
    pub span_id: u64,
    pub reply_tx: Sender<MethodResult>,
    pub outcome: MethodResult,
}

/// State mutated only under the scheduler mutex.
pub(crate) struct Shared {
    pub rng: SimRng,
    /// Number of op fibers spawned so far.
    pub ops_spawned: usize,
    pub calls: Vec<PendingCall>,
    pub replies: Vec<PendingReply>,
    pub history: History,
    pub next_trace: u64,
    pub next_span: u64,
}

impl Shared {
    fn new(seed: i64) -> Shared {
        Shared {
            rng: SimRng::seed_from_u64(seed as u64),
            ops_spawned: 0,
            calls: Vec::new(),
            replies: Vec::new(),
            history: History::new(),
            // 0 is reserved as the invalid id.
            next_trace: 1,
            next_span: 1,
        }
    }
}

/// The candidate actions a step chooses among.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    RunOp,
    DeliverCall,
    DeliverCallError,
    DeliverReply,
    DeliverReplyError,
}

/// Shared core of one simulator: registry, op set, scheduler state, and the
/// fiber runtime. Handles and fibers keep it alive through an `Arc`.
pub(crate) struct Core {
    pub(crate) opts: Options,
    pub(crate) registry: Registry,
    pub(crate) ops: RwLock<OpSet>,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) group: FiberGroup,
    pub(crate) cancel: CancelToken,
}

impl Core {
    pub(crate) fn new(opts: Options, registry: Registry) -> Core {
        let cancel = CancelToken::new();
        let seed = opts.seed;
        Core {
            opts,
            registry,
            ops: RwLock::new(OpSet::new()),
            shared: Mutex::new(Shared::new(seed)),
            group: FiberGroup::new(cancel.clone()),
            cancel,
        }
    }

    /// A handle to the named component, recorded as called from
    /// `caller`/`caller_replica`.
    pub(crate) fn handle_for(
        self: &Arc<Self>,
        component: &str,
        caller: &str,
        caller_replica: u64,
    ) -> Result<Handle, crate::errors::BuildError> {
        let index = self.registry.index_of(component).ok_or_else(|| {
            crate::errors::BuildError::UnknownComponent { component: component.to_string() }
        })?;
        Ok(Handle::new(Arc::clone(self), index, caller, caller_replica))
    }

    /// Perform one step of the simulation.
    ///
    /// Under the lock, computes the candidate action set, picks one
    /// uniformly, and applies it. Never blocks: it either enqueues work,
    /// spawns a fiber, or returns without acting. A no-op when the run is
    /// cancelled or no candidate is available.
    pub(crate) fn step(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut guard = self.shared.lock().unwrap();
        let shared = &mut *guard;
        let ops = self.ops.read().unwrap();

        let mut candidates: Vec<Candidate> = Vec::with_capacity(5);
        if shared.ops_spawned < self.opts.num_ops && !ops.is_empty() {
            candidates.push(Candidate::RunOp);
        }
        if !shared.calls.is_empty() {
            candidates.push(Candidate::DeliverCall);
            candidates.push(Candidate::DeliverCallError);
        }
        if !shared.replies.is_empty() {
            candidates.push(Candidate::DeliverReply);
            candidates.push(Candidate::DeliverReplyError);
        }
        if candidates.is_empty() {
            return;
        }

        let choice = candidates[shared.rng.gen_range(0..candidates.len())];
        trace!(?choice, "scheduler step");
        match choice {
            Candidate::RunOp => {
                shared.ops_spawned += 1;
                let op = ops.pick(&mut shared.rng);
                let core = Arc::clone(self);
                self.group.spawn(move || core.run_op(op));
            }

            Candidate::DeliverCall => {
                let call = pop_random(&mut shared.rng, &mut shared.calls);
                let core = Arc::clone(self);
                self.group.spawn(move || {
                    core.deliver_call(call);
                    Ok(())
                });
            }

            Candidate::DeliverReply => {
                let PendingReply { trace_id, span_id, reply_tx, outcome } =
                    pop_random(&mut shared.rng, &mut shared.replies);
                shared.history.append(Event::DeliverReturn { trace_id, span_id });
                // The waiting proxy may already have observed cancellation.
                let _ = reply_tx.send(outcome);
            }

            Candidate::DeliverCallError => {
                let PendingCall { trace_id, span_id, reply_tx, .. } =
                    pop_random(&mut shared.rng, &mut shared.calls);
                shared.history.append(Event::DeliverError { trace_id, span_id });
                let _ = reply_tx.send(Err(CallError::RemoteCall));
            }

            Candidate::DeliverReplyError => {
                let PendingReply { trace_id, span_id, reply_tx, .. } =
                    pop_random(&mut shared.rng, &mut shared.replies);
                shared.history.append(Event::DeliverError { trace_id, span_id });
                let _ = reply_tx.send(Err(CallError::RemoteCall));
            }
        }
    }

    /// Op fiber: generate the input, record the lifecycle events, and run
    /// the body. A body error becomes the fiber error, which cancels the
    /// whole run.
    fn run_op(self: &Arc<Self>, op: Arc<ErasedOp>) -> Result<(), CallError> {
        let (prepared, trace_id, span_id) = {
            let mut guard = self.shared.lock().unwrap();
            let shared = &mut *guard;
            // The generator draws from the shared RNG, so it runs under the
            // same lock as every other choice point.
            let prepared = op.prepare(&mut shared.rng);
            let trace_id = shared.next_trace;
            shared.next_trace += 1;
            let span_id = shared.next_span;
            shared.next_span += 1;
            shared.history.append(Event::OpStart {
                trace_id,
                span_id,
                name: op.name.clone(),
                args: vec![prepared.args.clone()],
            });
            (prepared, trace_id, span_id)
        };

        let cx = SimContext::new(trace_id, span_id, self.cancel.clone());
        let handles: Vec<Handle> = op
            .components
            .iter()
            .map(|&index| Handle::new(Arc::clone(self), index, "op", trace_id))
            .collect();

        let result = (prepared.body)(&cx, &handles);

        let message = match &result {
            Ok(()) => String::from("<nil>"),
            Err(err) => err.to_string(),
        };
        self.shared
            .lock()
            .unwrap()
            .history
            .append(Event::OpFinish { trace_id, span_id, error: message });

        if let Err(err) = result {
            // Returning the error cancels the run; don't take another step.
            debug!(op = %op.name, error = %err, "op failed");
            return Err(err);
        }
        self.step();
        Ok(())
    }

    /// Delivery fiber: pick a replica, invoke the method, and queue the
    /// reply. Runs to completion even if the simulation is cancelled while
    /// the method executes; the trailing `step` is then a no-op.
    fn deliver_call(self: &Arc<Self>, call: PendingCall) {
        let PendingCall { trace_id, span_id, component, method, args, reply_tx } = call;

        let (replica, replica_index, component_name) = {
            let mut guard = self.shared.lock().unwrap();
            let shared = &mut *guard;
            let count = self.registry.replica_count(component);
            let index = shared.rng.gen_range(0..count);
            let name = self.registry.spec(component).name.clone();
            shared.history.append(Event::DeliverCall {
                trace_id,
                span_id,
                component: name.clone(),
                replica: index,
            });
            (self.registry.replica(component, index), index, name)
        };

        let cx = SimContext::new(trace_id, span_id, self.cancel.clone());
        let outcome = replica.invoke(&cx, &method, &args);
        let returns = render_returns(&outcome);

        {
            let mut guard = self.shared.lock().unwrap();
            let shared = &mut *guard;
            shared.replies.push(PendingReply { trace_id, span_id, reply_tx, outcome });
            shared.history.append(Event::Return {
                trace_id,
                span_id,
                component: component_name,
                replica: replica_index,
                returns,
            });
        }
        self.step();
    }
}

/// Remove and return a uniformly random element.
fn pop_random<T>(rng: &mut SimRng, items: &mut Vec<T>) -> T {
    let index = rng.gen_range(0..items.len());
    items.swap_remove(index)
}

/// Stringify a method outcome for a `Return` event. The final slot is the
/// error return: `<nil>` on success, the error message otherwise.
fn render_returns(outcome: &MethodResult) -> Vec<String> {
    match outcome {
        Ok(values) => {
            let mut returns: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            returns.push(String::from("<nil>"));
            returns
        }
        Err(err) => vec![err.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_random_is_seed_stable() {
        let draws = |seed: u64| -> Vec<i32> {
            let mut rng = SimRng::seed_from_u64(seed);
            let mut items = vec![1, 2, 3, 4, 5];
            let mut out = Vec::new();
            while !items.is_empty() {
                out.push(pop_random(&mut rng, &mut items));
            }
            out
        };
        assert_eq!(draws(3), draws(3));
    }

    #[test]
    fn test_render_returns_appends_nil_slot() {
        let ok: MethodResult = Ok(vec![Value::Int(6)]);
        assert_eq!(render_returns(&ok), vec!["6".to_string(), "<nil>".to_string()]);

        let err: MethodResult = Err(CallError::RemoteCall);
        assert_eq!(render_returns(&err), vec!["RemoteCallError".to_string()]);
    }
}
