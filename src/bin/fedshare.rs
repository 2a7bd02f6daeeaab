//! FedShare CLI — in-process federated averaging
//!
//! Commands:
//!   fedshare simulate — run aggregation rounds between in-process participants
//!   fedshare share    — split a vector into additive shares and reconstruct it
//!   fedshare config   — print or write the default configuration

use fedshare_core::coordinator::{AggregationMode, ParticipantCoordinator};
use fedshare_core::registry::{task_channel, RendezvousRegistry, Task, TrainingInformation};
use fedshare_core::sharing::{generate_all_shares, reconstruct_secret};
use fedshare_core::weights::{average, WeightVector};
use fedshare_core::{FedConfig, TaskId};
use futures::future::join_all;
use nalgebra::DMatrix;
use rand::Rng;
use std::env;
use std::sync::Arc;

const TASK_NAME: &str = "simulation";
const LAYER_SHAPES: &[(usize, usize)] = &[(4, 3), (3, 1)];

fn print_usage() {
    println!(
        r#"
FedShare v0.1 — Federated Averaging with Additive Secret Sharing

Usage: fedshare <command> [options]

Commands:
  simulate [participants] [rounds] [plain|secure] [config.json]  Run in-process rounds
  share    <n> <values...>                                       Split and rebuild a vector
  config   [path]                                                Print or write default config

Examples:
  fedshare simulate 4 3 secure
  fedshare share 3 1.5 -2 7
  fedshare config fedshare.json
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "simulate" => cmd_simulate(&args[2..]).await,
        "share" => cmd_share(&args[2..]),
        "config" => cmd_config(&args[2..]),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

fn random_weights(rng: &mut impl Rng) -> WeightVector {
    WeightVector::new(
        LAYER_SHAPES
            .iter()
            .map(|&(rows, cols)| DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-1.0..1.0)))
            .collect(),
    )
}

async fn cmd_simulate(args: &[String]) {
    let participants: usize = args.first().and_then(|s| s.parse().ok()).unwrap_or(3);
    let rounds: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(2);
    let mut config = match args.get(3) {
        Some(path) => match FedConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("  Failed to load config '{}': {}", path, e);
                return;
            }
        },
        None => FedConfig::default(),
    };
    match args.get(2).map(|s| s.as_str()) {
        Some("plain") => config.coordinator.mode = AggregationMode::Plain,
        Some("secure") => config.coordinator.mode = AggregationMode::Secure,
        Some(other) => {
            eprintln!("  Unknown mode '{}', expected plain or secure", other);
            return;
        }
        None => {}
    }
    if participants == 0 {
        eprintln!("  Need at least one participant");
        return;
    }

    let task_id = match TaskId::new(TASK_NAME) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("  {}", e);
            return;
        }
    };

    let registry = Arc::new(RendezvousRegistry::new(config.registry.clone()));
    let _pruner = registry.spawn_pruner();
    let (publisher, feed) = task_channel(config.registry.task_queue_capacity);
    let listener = registry.listen_for_tasks(feed);
    let task = Task::new(
        task_id.clone(),
        TrainingInformation {
            min_participants: Some(participants),
            rounds,
            description: "In-process simulation".into(),
        },
    );
    if let Err(e) = publisher.publish(task).await {
        eprintln!("  {}", e);
        return;
    }
    drop(publisher);
    let _ = listener.await;

    println!(
        "\n  Simulating {} participants, {} rounds, {:?} mode",
        participants, rounds, config.coordinator.mode
    );

    let mut coordinators = Vec::with_capacity(participants);
    for _ in 0..participants {
        let mut coordinator = ParticipantCoordinator::new(registry.clone(), config.coordinator.clone());
        if let Err(e) = coordinator.connect(None, task_id.clone()).await {
            eprintln!("  Connect failed: {}", e);
            return;
        }
        coordinators.push(coordinator);
    }

    let mut rng = rand::thread_rng();
    for round in 0..rounds {
        let inputs: Vec<WeightVector> = (0..participants).map(|_| random_weights(&mut rng)).collect();
        let expected = match average(&inputs) {
            Ok(avg) => avg,
            Err(e) => {
                eprintln!("  {}", e);
                return;
            }
        };

        let handles: Vec<_> = coordinators
            .drain(..)
            .zip(inputs)
            .map(|(mut coordinator, weights)| {
                tokio::spawn(async move {
                    let result = coordinator.run_round(&weights).await;
                    (coordinator, result)
                })
            })
            .collect();

        println!("\n  Round {}", round);
        for joined in join_all(handles).await {
            let (coordinator, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("  Participant task panicked: {}", e);
                    return;
                }
            };
            match result {
                Ok(aggregate) => {
                    let diff = aggregate.max_abs_diff(&expected).unwrap_or(f64::NAN);
                    println!("  {} | max diff vs mean {:.3e}", coordinator.stats().summary(), diff);
                }
                Err(e) => println!("  {} | failed: {}", coordinator.stats().summary(), e),
            }
            coordinators.push(coordinator);
        }
    }

    for coordinator in coordinators.iter_mut() {
        let _ = coordinator.disconnect().await;
    }
    let stats = registry.stats().await;
    println!(
        "\n  Registry: {} broadcasts, {} dropped frames, {} still connected",
        stats.broadcasts, stats.dropped_frames, stats.connected
    );
}

fn cmd_share(args: &[String]) {
    if args.len() < 2 {
        eprintln!("Usage: fedshare share <n> <values...>");
        return;
    }
    let n: usize = match args[0].parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("  n must be a number");
            return;
        }
    };
    let values = match args[1..].iter().map(|s| s.parse::<f64>()).collect::<Result<Vec<_>, _>>() {
        Ok(values) => values,
        Err(_) => {
            eprintln!("  values must be numbers");
            return;
        }
    };

    let config = FedConfig::default().coordinator;
    let secret = WeightVector::from_columns(&[&values]);
    let shares = match generate_all_shares(&secret, n, config.max_share_value, config.rng_security) {
        Ok(shares) => shares,
        Err(e) => {
            eprintln!("  {}", e);
            return;
        }
    };
    for (i, share) in shares.iter().enumerate() {
        println!("  share {}: {:?}", i, share.to_flat());
    }
    match reconstruct_secret(&shares) {
        Ok(rebuilt) => println!("  reconstructed: {:?}", rebuilt.to_flat()),
        Err(e) => eprintln!("  {}", e),
    }
}

fn cmd_config(args: &[String]) {
    let config = FedConfig::default();
    match args.first() {
        Some(path) => match config.save(path) {
            Ok(()) => println!("  Wrote default configuration to {}", path),
            Err(e) => eprintln!("  Failed to write '{}': {}", path, e),
        },
        None => match serde_json::to_string_pretty(&config) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("  {}", e),
        },
    }
}
