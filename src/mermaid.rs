//! Mermaid sequence-diagram rendering.
//!
//! A pure fold over a simulation history: the same history always renders
//! to the same text. Participants are one per op trace id plus one per
//! observed (component, replica) pair; `Call` and `Return` events only
//! provide lookup context and emit no lines of their own.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::event::Event;

struct CallInfo<'a> {
    caller: &'a str,
    caller_replica: u64,
    component: &'a str,
    method: &'a str,
    args: &'a [String],
}

struct ReturnInfo<'a> {
    component: &'a str,
    replica: usize,
    returns: &'a [String],
}

/// Render a history as a Mermaid `sequenceDiagram`.
pub fn render(history: &[Event]) -> String {
    // Gather ops, replicas, and per-span lookup context.
    let mut ops: Vec<u64> = Vec::new();
    let mut replicas: BTreeSet<(&str, usize)> = BTreeSet::new();
    let mut calls: HashMap<u64, CallInfo<'_>> = HashMap::new();
    let mut returns: HashMap<u64, ReturnInfo<'_>> = HashMap::new();
    for event in history {
        match event {
            Event::OpStart { trace_id, .. } => ops.push(*trace_id),
            Event::Call { span_id, caller, caller_replica, component, method, args, .. } => {
                calls.insert(
                    *span_id,
                    CallInfo {
                        caller: caller.as_str(),
                        caller_replica: *caller_replica,
                        component: component.as_str(),
                        method: method.as_str(),
                        args: args.as_slice(),
                    },
                );
            }
            Event::DeliverCall { span_id, replica, .. } => {
                if let Some(call) = calls.get(span_id) {
                    replicas.insert((call.component, *replica));
                }
            }
            Event::Return { span_id, component, replica, returns: values, .. } => {
                returns.insert(
                    *span_id,
                    ReturnInfo {
                        component: component.as_str(),
                        replica: *replica,
                        returns: values.as_slice(),
                    },
                );
            }
            _ => {}
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "sequenceDiagram");
    for trace_id in &ops {
        let _ = writeln!(out, "    participant op{} as Op {}", trace_id, trace_id);
    }
    // BTreeSet iteration keeps replicas sorted by (component, replica).
    for (component, replica) in &replicas {
        let _ = writeln!(
            out,
            "    participant {}{} as {} {}",
            component, replica, component, replica
        );
    }

    for event in history {
        match event {
            Event::OpStart { trace_id, span_id, name, args } => {
                let _ = writeln!(
                    out,
                    "    note right of op{}: [{}:{}] {}({})",
                    trace_id,
                    trace_id,
                    span_id,
                    name,
                    commas(args)
                );
            }
            Event::OpFinish { trace_id, span_id, error } => {
                let _ = writeln!(
                    out,
                    "    note right of op{}: [{}:{}] return {}",
                    trace_id, trace_id, span_id, error
                );
            }
            Event::DeliverCall { trace_id, span_id, replica, .. } => {
                if let Some(call) = calls.get(span_id) {
                    let _ = writeln!(
                        out,
                        "    {}{}->>{}{}: [{}:{}] {}.{}({})",
                        call.caller,
                        call.caller_replica,
                        call.component,
                        replica,
                        trace_id,
                        span_id,
                        call.component,
                        call.method,
                        commas(call.args)
                    );
                }
            }
            Event::DeliverReturn { trace_id, span_id } => {
                if let (Some(call), Some(ret)) = (calls.get(span_id), returns.get(span_id)) {
                    let _ = writeln!(
                        out,
                        "    {}{}->>{}{}: [{}:{}] return {}",
                        ret.component,
                        ret.replica,
                        call.caller,
                        call.caller_replica,
                        trace_id,
                        span_id,
                        commas(ret.returns)
                    );
                }
            }
            Event::DeliverError { trace_id, span_id } => {
                if let Some(call) = calls.get(span_id) {
                    let _ = writeln!(
                        out,
                        "    note right of {}{}: [{}:{}] RemoteCallError",
                        call.caller, call.caller_replica, trace_id, span_id
                    );
                }
            }
            _ => {}
        }
    }
    out
}

fn commas(values: &[String]) -> String {
    values.join(", ")
}
