use std::collections::HashMap;
use std::env;
use std::process;

use detsim::check::Checker;
use detsim::demo;
use detsim::{Options, Results, Simulator};

const NUM_REPLICAS: usize = 2;
const NUM_OPS: usize = 6;

const DEMO_CONFIG: &str = r#"
[Counter]
start = 0
"#;

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("run") => {
            let seed = parse_seed(args.get(2));
            run_one(seed, false, false);
        }
        Some("mermaid") => {
            let seed = parse_seed(args.get(2));
            run_one(seed, true, false);
        }
        Some("json") => {
            let seed = parse_seed(args.get(2));
            run_one(seed, false, true);
        }
        Some("sweep") => {
            let count = args
                .get(2)
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(100);
            sweep(count);
        }
        Some(_) | None => {
            print_usage();
        }
    }
}

fn print_usage() {
    eprintln!("Usage: detsim <command> [args]");
    eprintln!("Commands:");
    eprintln!("  run [seed]     - Simulate one seed and print the history");
    eprintln!("  mermaid [seed] - Simulate one seed and print a sequence diagram");
    eprintln!("  json [seed]    - Simulate one seed and print the history as JSON");
    eprintln!("  sweep [count]  - Simulate seeds 0..count and report op failures");
}

fn parse_seed(arg: Option<&String>) -> i64 {
    match arg {
        None => 0,
        Some(raw) => match raw.parse() {
            Ok(seed) => seed,
            Err(_) => {
                eprintln!("FATAL: invalid seed {:?}", raw);
                process::exit(1);
            }
        },
    }
}

fn build_simulator(seed: i64) -> Simulator {
    let opts = Options {
        seed,
        num_replicas: NUM_REPLICAS,
        num_ops: NUM_OPS,
        config_filename: "demo.toml".to_string(),
        config: DEMO_CONFIG.to_string(),
        ..Options::default()
    };
    let sim = match Simulator::new(opts, demo::components()) {
        Ok(sim) => sim,
        Err(err) => {
            eprintln!("FATAL: {}", err);
            process::exit(1);
        }
    };
    demo::register_demo_ops(&sim);
    sim
}

fn run_seed(seed: i64) -> Results {
    build_simulator(seed).simulate()
}

fn run_one(seed: i64, mermaid: bool, json: bool) {
    let results = run_seed(seed);

    if json {
        match serde_json::to_string_pretty(&results.history) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => {
                eprintln!("FATAL: serialize history: {}", err);
                process::exit(1);
            }
        }
        return;
    }

    if mermaid {
        print!("{}", results.mermaid());
        return;
    }

    println!("Seed {} produced {} events:", seed, results.history.len());
    for (index, event) in results.history.iter().enumerate() {
        println!("{:4}  {:?}", index, event);
    }

    let replicas = HashMap::from([
        ("Counter".to_string(), NUM_REPLICAS),
        ("Store".to_string(), NUM_REPLICAS),
    ]);
    let mut checker = Checker::new().replica_counts(replicas);
    if results.err.is_none() {
        checker = checker.expect_ops(NUM_OPS);
    } else {
        // A failing op cancels its siblings mid-flight.
        checker = checker.allow_unfinished();
    }
    let check = checker.verify(&results.history);
    if check.passed {
        println!(
            "History OK: {} ops, {} calls, {} injected errors",
            check.stats.ops_started, check.stats.calls, check.stats.injected_errors
        );
    } else {
        println!("History violations:");
        for violation in &check.violations {
            println!("  {:?}: {}", violation.kind, violation.description);
        }
    }

    match &results.err {
        None => println!("All ops succeeded."),
        Some(err) => println!("Simulation found a failure: {}", err),
    }
}

fn sweep(count: i64) {
    let mut failures = Vec::new();
    for seed in 0..count {
        let results = run_seed(seed);
        if let Some(err) = results.err {
            failures.push((seed, err));
        }
    }

    println!("Swept {} seeds, {} failing:", count, failures.len());
    for (seed, err) in &failures {
        println!("  seed {:4}: {}", seed, err);
    }
    if !failures.is_empty() {
        process::exit(1);
    }
}
