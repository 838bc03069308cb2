//! History invariant checker.
//!
//! Verifies the structural invariants every simulation history must satisfy:
//! - trace ids are 1..n in order of first appearance
//! - span ids are unique across op starts and calls
//! - every call reaches exactly one terminal state (delivered reply,
//!   call-side injection, or reply-side injection)
//! - every op start is matched by exactly one finish
//! - delivered replica indices stay inside the component's replica set

use std::collections::HashMap;

use crate::event::Event;

/// Result of a history check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Whether all checks passed.
    pub passed: bool,
    /// List of violations found.
    pub violations: Vec<Violation>,
    /// Statistics about the checked history.
    pub stats: CheckStats,
}

/// A single invariant violation.
#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    /// Indices of the related history events.
    pub related_events: Vec<usize>,
}

/// Kinds of history violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Number of op starts differs from the configured op count.
    OpCount,
    /// Trace ids did not appear as the sequence 1..n.
    TraceOrder,
    /// An op finished without starting, finished twice, or never finished.
    OpFlow,
    /// A span id was minted twice.
    DuplicateSpan,
    /// A call's delivery events do not form a valid terminal sequence.
    BrokenCallFlow,
    /// A delivery event references a span no call created.
    OrphanDelivery,
    /// A delivery targeted a replica index outside the component's set.
    ReplicaOutOfRange,
}

/// Statistics gathered while checking.
#[derive(Debug, Clone, Default)]
pub struct CheckStats {
    pub ops_started: usize,
    pub ops_finished: usize,
    pub calls: usize,
    pub deliveries: usize,
    pub injected_errors: usize,
}

/// Per-call progress, keyed by span id.
#[derive(Default)]
struct CallFlow {
    call_event: usize,
    delivered: bool,
    returned: bool,
    /// Reached a terminal state: reply delivered or error injected.
    done: bool,
    events: Vec<usize>,
}

/// Per-op progress, keyed by trace id.
struct OpFlow {
    span_id: u64,
    start_event: usize,
    finishes: usize,
}

/// The history checker. Configure expectations with the builder methods,
/// then run [`Checker::verify`].
#[derive(Default)]
pub struct Checker {
    num_ops: Option<usize>,
    replicas: HashMap<String, usize>,
    allow_unfinished: bool,
}

impl Checker {
    pub fn new() -> Checker {
        Checker::default()
    }

    /// Expect exactly `num_ops` op starts.
    pub fn expect_ops(mut self, num_ops: usize) -> Checker {
        self.num_ops = Some(num_ops);
        self
    }

    /// Bound delivered replica indices per component.
    pub fn replica_counts(mut self, counts: HashMap<String, usize>) -> Checker {
        self.replicas = counts;
        self
    }

    /// Accept unfinished ops and calls, for histories cut short by
    /// cancellation.
    pub fn allow_unfinished(mut self) -> Checker {
        self.allow_unfinished = true;
        self
    }

    /// Verify the invariants against a history.
    pub fn verify(&self, history: &[Event]) -> CheckResult {
        let mut violations = Vec::new();
        let mut stats = CheckStats::default();

        let mut ops: HashMap<u64, OpFlow> = HashMap::new();
        let mut op_order: Vec<u64> = Vec::new();
        let mut flows: HashMap<u64, CallFlow> = HashMap::new();
        let mut span_order: Vec<u64> = Vec::new();

        for (index, event) in history.iter().enumerate() {
            match event {
                Event::OpStart { trace_id, span_id, .. } => {
                    stats.ops_started += 1;
                    op_order.push(*trace_id);
                    if flows.contains_key(span_id) || ops.values().any(|op| op.span_id == *span_id) {
                        violations.push(Violation {
                            kind: ViolationKind::DuplicateSpan,
                            description: format!("span {} minted twice", span_id),
                            related_events: vec![index],
                        });
                    }
                    ops.insert(
                        *trace_id,
                        OpFlow { span_id: *span_id, start_event: index, finishes: 0 },
                    );
                }

                Event::OpFinish { trace_id, span_id, .. } => {
                    stats.ops_finished += 1;
                    match ops.get_mut(trace_id) {
                        None => violations.push(Violation {
                            kind: ViolationKind::OpFlow,
                            description: format!("trace {} finished without starting", trace_id),
                            related_events: vec![index],
                        }),
                        Some(op) => {
                            if op.span_id != *span_id {
                                violations.push(Violation {
                                    kind: ViolationKind::OpFlow,
                                    description: format!(
                                        "trace {} finished with span {} but started with span {}",
                                        trace_id, span_id, op.span_id
                                    ),
                                    related_events: vec![op.start_event, index],
                                });
                            }
                            op.finishes += 1;
                            if op.finishes > 1 {
                                violations.push(Violation {
                                    kind: ViolationKind::OpFlow,
                                    description: format!("trace {} finished twice", trace_id),
                                    related_events: vec![op.start_event, index],
                                });
                            }
                        }
                    }
                }

                Event::Call { span_id, .. } => {
                    stats.calls += 1;
                    if flows.contains_key(span_id) || ops.values().any(|op| op.span_id == *span_id) {
                        violations.push(Violation {
                            kind: ViolationKind::DuplicateSpan,
                            description: format!("span {} minted twice", span_id),
                            related_events: vec![index],
                        });
                    }
                    span_order.push(*span_id);
                    flows.insert(
                        *span_id,
                        CallFlow { call_event: index, events: vec![index], ..CallFlow::default() },
                    );
                }

                Event::DeliverCall { span_id, component, replica, .. } => {
                    stats.deliveries += 1;
                    if let Some(&count) = self.replicas.get(component) {
                        if *replica >= count {
                            violations.push(Violation {
                                kind: ViolationKind::ReplicaOutOfRange,
                                description: format!(
                                    "delivery to {} replica {} but only {} replicas exist",
                                    component, replica, count
                                ),
                                related_events: vec![index],
                            });
                        }
                    }
                    match flows.get_mut(span_id) {
                        None => violations.push(orphan(*span_id, index)),
                        Some(flow) => {
                            if flow.delivered || flow.done {
                                violations.push(broken(*span_id, "delivered twice", flow, index));
                            }
                            flow.delivered = true;
                            flow.events.push(index);
                        }
                    }
                }

                Event::Return { span_id, .. } => match flows.get_mut(span_id) {
                    None => violations.push(orphan(*span_id, index)),
                    Some(flow) => {
                        if !flow.delivered || flow.returned {
                            violations.push(broken(*span_id, "unexpected return", flow, index));
                        }
                        flow.returned = true;
                        flow.events.push(index);
                    }
                },

                Event::DeliverReturn { span_id, .. } => match flows.get_mut(span_id) {
                    None => violations.push(orphan(*span_id, index)),
                    Some(flow) => {
                        if !flow.returned || flow.done {
                            violations.push(broken(*span_id, "reply delivered out of order", flow, index));
                        }
                        flow.done = true;
                        flow.events.push(index);
                    }
                },

                Event::DeliverError { span_id, .. } => {
                    stats.injected_errors += 1;
                    match flows.get_mut(span_id) {
                        None => violations.push(orphan(*span_id, index)),
                        Some(flow) => {
                            // Valid on the call side (before delivery) or on
                            // the reply side (after the return, before the
                            // reply lands).
                            let call_side = !flow.delivered && !flow.done;
                            let reply_side = flow.returned && !flow.done;
                            if !call_side && !reply_side {
                                violations.push(broken(*span_id, "error injected out of order", flow, index));
                            }
                            flow.done = true;
                            flow.events.push(index);
                        }
                    }
                }
            }
        }

        // Trace ids appear as 1..n in order of first appearance.
        for (position, trace_id) in op_order.iter().enumerate() {
            let expected = position as u64 + 1;
            if *trace_id != expected {
                violations.push(Violation {
                    kind: ViolationKind::TraceOrder,
                    description: format!(
                        "op start {} has trace {} (expected {})",
                        position, trace_id, expected
                    ),
                    related_events: Vec::new(),
                });
            }
        }

        if let Some(expected) = self.num_ops {
            if stats.ops_started != expected {
                violations.push(Violation {
                    kind: ViolationKind::OpCount,
                    description: format!(
                        "{} op starts recorded, expected {}",
                        stats.ops_started, expected
                    ),
                    related_events: Vec::new(),
                });
            }
        }

        if !self.allow_unfinished {
            let mut unfinished: Vec<&OpFlow> =
                ops.values().filter(|op| op.finishes == 0).collect();
            unfinished.sort_by_key(|op| op.start_event);
            for op in unfinished {
                violations.push(Violation {
                    kind: ViolationKind::OpFlow,
                    description: "op started but never finished".to_string(),
                    related_events: vec![op.start_event],
                });
            }
            for span_id in &span_order {
                let flow = &flows[span_id];
                if !flow.done {
                    violations.push(Violation {
                        kind: ViolationKind::BrokenCallFlow,
                        description: format!("call span {} never reached a terminal state", span_id),
                        related_events: flow.events.clone(),
                    });
                }
            }
        }

        CheckResult { passed: violations.is_empty(), violations, stats }
    }
}

fn orphan(span_id: u64, index: usize) -> Violation {
    Violation {
        kind: ViolationKind::OrphanDelivery,
        description: format!("delivery event for span {} without a call", span_id),
        related_events: vec![index],
    }
}

fn broken(span_id: u64, what: &str, flow: &CallFlow, index: usize) -> Violation {
    Violation {
        kind: ViolationKind::BrokenCallFlow,
        description: format!("call span {}: {}", span_id, what),
        related_events: vec![flow.call_event, index],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op_start(trace_id: u64, span_id: u64) -> Event {
        Event::OpStart { trace_id, span_id, name: "inc".to_string(), args: vec!["1".to_string()] }
    }

    fn op_finish(trace_id: u64, span_id: u64) -> Event {
        Event::OpFinish { trace_id, span_id, error: "<nil>".to_string() }
    }

    fn call(trace_id: u64, span_id: u64) -> Event {
        Event::Call {
            trace_id,
            span_id,
            caller: "op".to_string(),
            caller_replica: trace_id,
            component: "Counter".to_string(),
            method: "Inc".to_string(),
            args: vec!["1".to_string()],
        }
    }

    fn deliver_call(trace_id: u64, span_id: u64, replica: usize) -> Event {
        Event::DeliverCall { trace_id, span_id, component: "Counter".to_string(), replica }
    }

    fn ret(trace_id: u64, span_id: u64) -> Event {
        Event::Return {
            trace_id,
            span_id,
            component: "Counter".to_string(),
            replica: 0,
            returns: vec!["1".to_string(), "<nil>".to_string()],
        }
    }

    #[test]
    fn test_clean_history_passes() {
        let history = vec![
            op_start(1, 1),
            call(1, 2),
            deliver_call(1, 2, 0),
            ret(1, 2),
            Event::DeliverReturn { trace_id: 1, span_id: 2 },
            op_finish(1, 1),
        ];
        let result = Checker::new().expect_ops(1).verify(&history);
        assert!(result.passed, "violations: {:?}", result.violations);
        assert_eq!(result.stats.calls, 1);
        assert_eq!(result.stats.deliveries, 1);
    }

    #[test]
    fn test_call_side_injection_passes() {
        let history = vec![
            op_start(1, 1),
            call(1, 2),
            Event::DeliverError { trace_id: 1, span_id: 2 },
            op_finish(1, 1),
        ];
        let result = Checker::new().verify(&history);
        assert!(result.passed, "violations: {:?}", result.violations);
        assert_eq!(result.stats.injected_errors, 1);
    }

    #[test]
    fn test_detects_unmatched_call() {
        let history = vec![op_start(1, 1), call(1, 2), op_finish(1, 1)];
        let result = Checker::new().verify(&history);
        assert!(!result.passed);
        assert!(result.violations.iter().any(|v| v.kind == ViolationKind::BrokenCallFlow));
    }

    #[test]
    fn test_detects_duplicate_span() {
        let history = vec![op_start(1, 1), call(1, 2), call(1, 2)];
        let result = Checker::new().allow_unfinished().verify(&history);
        assert!(result.violations.iter().any(|v| v.kind == ViolationKind::DuplicateSpan));
    }

    #[test]
    fn test_detects_trace_gap() {
        let history = vec![op_start(1, 1), op_finish(1, 1), op_start(3, 2), op_finish(3, 2)];
        let result = Checker::new().verify(&history);
        assert!(result.violations.iter().any(|v| v.kind == ViolationKind::TraceOrder));
    }

    #[test]
    fn test_detects_replica_out_of_range() {
        let history = vec![
            op_start(1, 1),
            call(1, 2),
            deliver_call(1, 2, 5),
            ret(1, 2),
            Event::DeliverReturn { trace_id: 1, span_id: 2 },
            op_finish(1, 1),
        ];
        let counts = HashMap::from([("Counter".to_string(), 2)]);
        let result = Checker::new().replica_counts(counts).verify(&history);
        assert!(result.violations.iter().any(|v| v.kind == ViolationKind::ReplicaOutOfRange));
    }

    #[test]
    fn test_detects_double_delivery() {
        let history = vec![
            op_start(1, 1),
            call(1, 2),
            deliver_call(1, 2, 0),
            deliver_call(1, 2, 0),
        ];
        let result = Checker::new().allow_unfinished().verify(&history);
        assert!(result.violations.iter().any(|v| v.kind == ViolationKind::BrokenCallFlow));
    }
}
