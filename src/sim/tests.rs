//! Simulator scenario tests.
//!
//! Where a scenario depends on particular scheduler choices (no injections,
//! or an injection on a specific path), the test searches the seed space for
//! a history with the wanted shape instead of hard-coding a seed; the search
//! itself is deterministic, so these tests are stable.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;

use crate::check::Checker;
use crate::component::{ComponentDef, MethodResult, Replica, SimContext};
use crate::demo::{self, Counter, FixedCounter};
use crate::errors::{BuildError, CallError};
use crate::event::Event;
use crate::op::Op;
use crate::sim::{Options, Results, Simulator};
use crate::value::Value;

fn options(seed: i64, num_ops: usize, num_replicas: usize) -> Options {
    Options { seed, num_ops, num_replicas, ..Options::default() }
}

fn counter_sim(seed: i64, num_ops: usize, num_replicas: usize) -> Simulator {
    Simulator::new(options(seed, num_ops, num_replicas), vec![Counter::definition()]).unwrap()
}

/// An op that calls `Counter.Inc` once and propagates any error, injected
/// ones included.
fn register_inc(sim: &Simulator) {
    sim.register_op(Op {
        name: "inc",
        gen: Box::new(|rng| rng.gen_range(1..=5i64)),
        components: vec!["Counter"],
        body: Box::new(|cx, delta, handles| {
            handles[0].call(cx, "Inc", vec![Value::Int(delta)])?;
            Ok(())
        }),
    });
}

/// An op that calls `Counter.Inc` twice and shrugs off injected errors, so
/// every run completes without cancellation.
fn register_tolerant_inc(sim: &Simulator) {
    sim.register_op(Op {
        name: "tolerant-inc",
        gen: Box::new(|rng| rng.gen_range(1..=5i64)),
        components: vec!["Counter"],
        body: Box::new(|cx, delta, handles| {
            let _ = handles[0].call(cx, "Inc", vec![Value::Int(delta)]);
            let _ = handles[0].call(cx, "Inc", vec![Value::Int(delta)]);
            Ok(())
        }),
    });
}

/// Search seeds for a history with a wanted shape. Deterministic: the same
/// predicate always lands on the same seed.
fn find_seed(
    mut run: impl FnMut(i64) -> Results,
    pred: impl Fn(&Results) -> bool,
) -> (i64, Results) {
    for seed in 0..512 {
        let results = run(seed);
        if pred(&results) {
            return (seed, results);
        }
    }
    panic!("no seed in 0..512 produced the wanted history");
}

fn has_deliver_error(history: &[Event]) -> bool {
    history.iter().any(|e| matches!(e, Event::DeliverError { .. }))
}

fn build_err(opts: Options, defs: Vec<ComponentDef>) -> BuildError {
    match Simulator::new(opts, defs) {
        Ok(_) => panic!("construction unexpectedly succeeded"),
        Err(err) => err,
    }
}

#[test]
fn test_single_op_clean_history() {
    let run = |seed| {
        let sim = counter_sim(seed, 1, 1);
        register_inc(&sim);
        sim.simulate()
    };
    let (_, results) = find_seed(run, |r| r.err.is_none() && !has_deliver_error(&r.history));

    let h = &results.history;
    assert_eq!(h.len(), 6, "history: {:?}", h);
    assert!(matches!(
        &h[0],
        Event::OpStart { trace_id: 1, span_id: 1, name, .. } if name == "inc"
    ));
    assert!(matches!(
        &h[1],
        Event::Call { trace_id: 1, span_id: 2, caller, caller_replica: 1, component, method, .. }
            if caller == "op" && component == "Counter" && method == "Inc"
    ));
    assert!(matches!(
        &h[2],
        Event::DeliverCall { trace_id: 1, span_id: 2, component, replica: 0 } if component == "Counter"
    ));
    assert!(matches!(
        &h[3],
        Event::Return { trace_id: 1, span_id: 2, replica: 0, returns, .. }
            if returns.last().map(String::as_str) == Some("<nil>")
    ));
    assert!(matches!(h[4], Event::DeliverReturn { trace_id: 1, span_id: 2 }));
    assert!(matches!(
        &h[5],
        Event::OpFinish { trace_id: 1, span_id: 1, error } if error == "<nil>"
    ));
}

#[test]
fn test_fixed_seed_runs_are_identical() {
    let run = || {
        let sim = counter_sim(42, 4, 2);
        register_tolerant_inc(&sim);
        sim.simulate()
    };
    let first = run();
    let second = run();
    assert_eq!(first.err, second.err);
    assert_eq!(first.history, second.history);
}

#[test]
fn test_injected_call_error_surfaces() {
    let run = |seed| {
        let sim = counter_sim(seed, 1, 1);
        register_inc(&sim);
        sim.simulate()
    };
    let (_, results) = find_seed(run, |r| r.err == Some(CallError::RemoteCall));

    assert!(has_deliver_error(&results.history));
    assert!(results.history.iter().any(|e| matches!(
        e,
        Event::OpFinish { error, .. } if error == "RemoteCallError"
    )));
}

#[test]
fn test_multi_op_interleaving() {
    let sim = counter_sim(5, 2, 2);
    register_tolerant_inc(&sim);
    let results = sim.simulate();
    assert!(results.err.is_none());

    let traces: HashSet<u64> = results
        .history
        .iter()
        .filter_map(|e| match e {
            Event::OpStart { trace_id, .. } => Some(*trace_id),
            _ => None,
        })
        .collect();
    assert_eq!(traces, HashSet::from([1, 2]));

    let call_spans: Vec<u64> = results
        .history
        .iter()
        .filter_map(|e| match e {
            Event::Call { span_id, .. } => Some(*span_id),
            _ => None,
        })
        .collect();
    assert_eq!(call_spans.len(), 4);
    assert_eq!(call_spans.iter().collect::<HashSet<_>>().len(), 4);

    let counts = HashMap::from([("Counter".to_string(), 2)]);
    let check = Checker::new().expect_ops(2).replica_counts(counts).verify(&results.history);
    assert!(check.passed, "violations: {:?}", check.violations);
}

#[test]
fn test_fake_substitution() {
    let run = |seed| {
        let mut opts = options(seed, 3, 3);
        opts.fakes
            .insert("Counter".to_string(), Arc::new(FixedCounter { value: 42 }) as Arc<dyn Replica>);
        let sim = Simulator::new(opts, vec![Counter::definition()]).unwrap();
        sim.register_op(Op {
            name: "get",
            gen: Box::new(|_| ()),
            components: vec!["Counter"],
            body: Box::new(|cx, (), handles| {
                match handles[0].call(cx, "Get", vec![]) {
                    Ok(returns) if returns == vec![Value::Int(42)] => Ok(()),
                    Ok(returns) => Err(CallError::app(format!("fake not in effect: {:?}", returns))),
                    // Injected failures are fine; we only care who answers.
                    Err(_) => Ok(()),
                }
            }),
        });
        sim.simulate()
    };
    let (_, results) = find_seed(run, |r| {
        r.err.is_none() && r.history.iter().any(|e| matches!(e, Event::DeliverCall { .. }))
    });

    for event in &results.history {
        if let Event::DeliverCall { replica, .. } = event {
            assert_eq!(*replica, 0, "fakes are installed as the only replica");
        }
    }
}

#[test]
fn test_op_failure_cancels_run() {
    let sim = counter_sim(11, 5, 1);
    sim.register_op(Op {
        name: "boom",
        gen: Box::new(|rng| rng.gen_range(1..=5i64)),
        components: vec!["Counter"],
        body: Box::new(|cx, delta, handles| {
            let _ = handles[0].call(cx, "Inc", vec![Value::Int(delta)]);
            Err(CallError::app("boom"))
        }),
    });
    let results = sim.simulate();

    assert_eq!(results.err, Some(CallError::app("boom")));

    let first_boom = results
        .history
        .iter()
        .position(|e| matches!(e, Event::OpFinish { error, .. } if error == "boom"))
        .expect("a failing op finish");
    // Cancellation stops the scheduler: after the first failure, the only
    // thing left is other ops winding down.
    for event in &results.history[first_boom + 1..] {
        assert!(
            matches!(event, Event::OpFinish { .. }),
            "unexpected post-cancellation event: {:?}",
            event
        );
    }
}

#[test]
fn test_external_cancellation_before_run() {
    let sim = counter_sim(0, 3, 1);
    register_inc(&sim);
    sim.cancel_token().cancel();
    let results = sim.simulate();

    assert!(results.history.is_empty());
    assert_eq!(results.err, Some(CallError::Cancelled));
}

#[test]
fn test_single_replica_still_injects() {
    let mut found = false;
    for seed in 0..64 {
        let sim = counter_sim(seed, 2, 1);
        register_tolerant_inc(&sim);
        let results = sim.simulate();
        if has_deliver_error(&results.history) {
            found = true;
            break;
        }
    }
    assert!(found, "no injection across 64 seeds with a single replica");
}

#[test]
fn test_error_free_seed_reruns_error_free() {
    let run = |seed| {
        let sim = counter_sim(seed, 2, 2);
        register_inc(&sim);
        sim.simulate()
    };
    let (seed, first) = find_seed(run, |r| r.err.is_none());
    let second = run(seed);
    assert!(second.err.is_none());
    assert_eq!(first.history, second.history);
}

#[test]
fn test_mermaid_renders_consistently() {
    let sim = counter_sim(9, 3, 2);
    register_tolerant_inc(&sim);
    let results = sim.simulate();

    let diagram = results.mermaid();
    assert_eq!(diagram, results.mermaid());
    assert!(diagram.starts_with("sequenceDiagram\n"));
    assert!(diagram.contains("participant op1 as Op 1"));
}

#[test]
fn test_nested_calls_carry_component_caller() {
    let run = |seed| {
        let opts = options(seed, 2, 2);
        let sim = Simulator::new(opts, demo::components()).unwrap();
        sim.register_op(Op {
            name: "put",
            gen: Box::new(|rng| rng.gen_range(0..100i64)),
            components: vec!["Store"],
            body: Box::new(|cx, value, handles| {
                let _ = handles[0].call(cx, "Put", vec![Value::from("key"), Value::Int(value)]);
                Ok(())
            }),
        });
        sim.simulate()
    };
    let (_, results) = find_seed(run, |r| {
        r.history.iter().any(|e| matches!(e, Event::Call { caller, .. } if caller == "Store"))
    });

    let op_traces: HashSet<u64> = results
        .history
        .iter()
        .filter_map(|e| match e {
            Event::OpStart { trace_id, .. } => Some(*trace_id),
            _ => None,
        })
        .collect();
    for event in &results.history {
        if let Event::Call { caller, caller_replica, trace_id, component, .. } = event {
            if caller == "Store" {
                // The nested call keeps the originating op's trace and
                // names the store replica that made it.
                assert!(op_traces.contains(trace_id));
                assert!(*caller_replica < 2);
                assert_eq!(component, "Counter");
            }
        }
    }
}

#[test]
fn test_clean_runs_satisfy_history_invariants() {
    let counts = HashMap::from([("Counter".to_string(), 2)]);
    for seed in 0..20 {
        let sim = counter_sim(seed, 4, 2);
        register_tolerant_inc(&sim);
        let results = sim.simulate();
        assert!(results.err.is_none());

        let check = Checker::new()
            .expect_ops(4)
            .replica_counts(counts.clone())
            .verify(&results.history);
        assert!(check.passed, "seed {}: violations: {:?}", seed, check.violations);
        assert_eq!(check.stats.ops_started, 4);
        assert_eq!(check.stats.ops_finished, 4);
    }
}

#[test]
fn test_config_section_reaches_replicas() {
    let run = |seed| {
        let mut opts = options(seed, 1, 1);
        opts.config_filename = "test.toml".to_string();
        opts.config = "[Counter]\nstart = 100\n".to_string();
        let sim = Simulator::new(opts, vec![Counter::definition()]).unwrap();
        sim.register_op(Op {
            name: "check-start",
            gen: Box::new(|_| ()),
            components: vec!["Counter"],
            body: Box::new(|cx, (), handles| {
                let returns = handles[0].call(cx, "Get", vec![])?;
                if returns == vec![Value::Int(100)] {
                    Ok(())
                } else {
                    Err(CallError::app(format!("unexpected start value: {:?}", returns)))
                }
            }),
        });
        sim.simulate()
    };
    // A clean seed exists only if the configured start value reached the
    // replica.
    find_seed(run, |r| r.err.is_none() && !has_deliver_error(&r.history));
}

#[test]
fn test_zero_options_are_rejected() {
    let err = build_err(options(0, 1, 0), vec![Counter::definition()]);
    assert!(matches!(err, BuildError::InvalidOption { option: "num_replicas" }));

    let err = build_err(options(0, 0, 1), vec![Counter::definition()]);
    assert!(matches!(err, BuildError::InvalidOption { option: "num_ops" }));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut opts = options(0, 1, 1);
    opts.config_filename = "broken.toml".to_string();
    opts.config = "[Counter\nstart = ".to_string();
    let err = build_err(opts, vec![Counter::definition()]);
    match err {
        BuildError::ConfigParse { filename, .. } => assert_eq!(filename, "broken.toml"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_fake_for_unregistered_component_is_rejected() {
    let mut opts = options(0, 1, 1);
    opts.fakes
        .insert("Ghost".to_string(), Arc::new(FixedCounter { value: 0 }) as Arc<dyn Replica>);
    let err = build_err(opts, vec![Counter::definition()]);
    assert!(matches!(err, BuildError::UnknownFake { component } if component == "Ghost"));
}

#[test]
fn test_init_failure_aborts_construction() {
    struct NoInit;
    impl Replica for NoInit {
        fn invoke(&self, _cx: &SimContext, _method: &str, _args: &[Value]) -> MethodResult {
            Ok(vec![])
        }
        fn init(&self, _cx: &SimContext) -> Result<(), CallError> {
            Err(CallError::app("no backing store"))
        }
    }

    let def = ComponentDef {
        name: "Flaky",
        methods: &["Ping"],
        build: Box::new(|_| Ok(Arc::new(NoInit))),
    };
    let err = build_err(options(0, 1, 2), vec![def]);
    match err {
        BuildError::Init { component, replica, source } => {
            assert_eq!(component, "Flaky");
            assert_eq!(replica, 0);
            assert_eq!(source, CallError::app("no backing store"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
#[should_panic(expected = "duplicate registration of op")]
fn test_duplicate_op_panics() {
    let sim = counter_sim(0, 1, 1);
    register_inc(&sim);
    register_inc(&sim);
}

#[test]
#[should_panic(expected = "missing op name")]
fn test_empty_op_name_panics() {
    let sim = counter_sim(0, 1, 1);
    sim.register_op(Op {
        name: "",
        gen: Box::new(|_| ()),
        components: vec![],
        body: Box::new(|_, (), _| Ok(())),
    });
}

#[test]
#[should_panic(expected = "unregistered component")]
fn test_unknown_component_dependency_panics() {
    let sim = counter_sim(0, 1, 1);
    sim.register_op(Op {
        name: "ghost",
        gen: Box::new(|_| ()),
        components: vec!["Ghost"],
        body: Box::new(|_, (), _| Ok(())),
    });
}
