//! Runnable demonstration of the parallel NRPA scheduler against a toy
//! atomic engine.
//!
//! This binary exists to make `nrpa-core` runnable end-to-end; its
//! `ToyAtomicEngine` does not reproduce real Morpion Solitaire search, it
//! just manufactures plausible-looking move sequences so the dispatcher has
//! something to schedule.

use std::fs;

use clap::{App, Arg};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use nrpa_core::{
    AtomicComputation, AtomicEngine, AtomicRequest, Dispatcher, NrpaError, ProbabilitySelector,
    SchedulerConfig, ToWorker, WeightTablePolicy,
};

/// CLI-facing configuration: the scheduler's five parameters plus demo-only
/// knobs (worker count). Mirrors `ggpf::settings`'s plain-struct-plus-toml
/// pattern.
#[derive(Debug, Deserialize)]
struct DemoConfig {
    #[serde(flatten)]
    scheduler: SchedulerConfig,
    #[serde(default = "default_workers")]
    workers: usize,
}

fn default_workers() -> usize {
    4
}

/// Manufactures a move sequence whose length is a deterministic function of
/// the request's seed, standing in for a real atomic NRPA search.
struct ToyAtomicEngine;

impl AtomicEngine<WeightTablePolicy> for ToyAtomicEngine {
    fn run(&self, request: &AtomicRequest<WeightTablePolicy>) -> AtomicComputation {
        let mut rng = StdRng::seed_from_u64(request.random_seed);
        let len = rng.gen_range(1..=(request.iterations * request.levels).max(1) as usize);
        let best_sequence = (0..len as u32)
            .map(|i| rng.gen_range(0..1000) + i % 7)
            .collect();
        AtomicComputation {
            best_sequence,
            sequences_examined: request.batch_size as u64,
            random_seed_echo: request.random_seed,
        }
    }
}

fn main() {
    flexi_logger::Logger::try_with_env_or_str("info")
        .expect("invalid RUST_LOG")
        .start()
        .expect("failed to start logger");

    if let Err(err) = run() {
        log::error!("nrpa-demo: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), NrpaError> {
    log::info!("nrpa-demo: starting");

    let matches = App::new("nrpa-demo")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("Path to a TOML file with iterations/parallel_levels/atomic_levels/alpha/random_seed/workers"),
        )
        .arg(
            Arg::with_name("iterations")
                .short("i")
                .long("iterations")
                .takes_value(true)
                .default_value("4"),
        )
        .arg(
            Arg::with_name("parallel_levels")
                .short("p")
                .long("parallel-levels")
                .takes_value(true)
                .default_value("2"),
        )
        .arg(
            Arg::with_name("atomic_levels")
                .short("a")
                .long("atomic-levels")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::with_name("alpha")
                .long("alpha")
                .takes_value(true)
                .default_value("1.0"),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::with_name("workers")
                .short("w")
                .long("workers")
                .takes_value(true)
                .default_value("4"),
        )
        .get_matches();

    let demo_config = if let Some(path) = matches.value_of("config") {
        let contents = fs::read_to_string(path).map_err(|e| {
            NrpaError::ConfigurationInvalid(format!("reading {path}: {e}"))
        })?;
        toml::from_str(&contents)
            .map_err(|e| NrpaError::ConfigurationInvalid(format!("parsing {path}: {e}")))?
    } else {
        DemoConfig {
            scheduler: SchedulerConfig {
                iterations: parse_arg(&matches, "iterations")?,
                parallel_levels: parse_arg(&matches, "parallel_levels")?,
                atomic_levels: parse_arg(&matches, "atomic_levels")?,
                alpha: parse_arg(&matches, "alpha")?,
                random_seed: parse_arg(&matches, "seed")?,
            },
            workers: parse_arg(&matches, "workers")?,
        }
    };

    demo_config.scheduler.validate()?;
    log::info!(
        "config: iterations={} parallel_levels={} atomic_levels={} alpha={} seed={} workers={}",
        demo_config.scheduler.iterations,
        demo_config.scheduler.parallel_levels,
        demo_config.scheduler.atomic_levels,
        demo_config.scheduler.alpha,
        demo_config.scheduler.random_seed,
        demo_config.workers,
    );

    let (result_tx, result_rx) = crossbeam_channel::unbounded();
    let engine = std::sync::Arc::new(ToyAtomicEngine);
    let mut to_workers = Vec::with_capacity(demo_config.workers);
    let mut handles = Vec::with_capacity(demo_config.workers);

    for source in 0..demo_config.workers {
        let (tx, rx) = crossbeam_channel::unbounded::<ToWorker<WeightTablePolicy>>();
        to_workers.push(tx);
        let result_tx = result_tx.clone();
        let engine = std::sync::Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            nrpa_core::run_worker_loop(source, engine.as_ref(), &rx, &result_tx);
        }));
    }
    drop(result_tx);

    let mut dispatcher = Dispatcher::new(
        demo_config.scheduler,
        ProbabilitySelector,
        to_workers,
        result_rx,
    )?;

    let best = dispatcher.run()?;
    log::info!("done: best sequence length = {}", best.len());

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr>(
    matches: &clap::ArgMatches,
    name: &str,
) -> Result<T, NrpaError> {
    matches
        .value_of(name)
        .expect("has a default_value")
        .parse()
        .map_err(|_| NrpaError::ConfigurationInvalid(format!("invalid value for --{name}")))
}
