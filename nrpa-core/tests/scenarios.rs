//! End-to-end scheduler scenarios, driven by a scripted [`AtomicEngine`]
//! stub rather than any real search.
//!
//! The wire schema (spec.md §6) never carries a leaf's `node_id` — only its
//! `random_seed`. These scenarios key a scripted reply off the position of
//! that seed within the deterministic seed table (the order `RolloutTree`
//! draws it in), which is the closest externally observable stand-in for
//! "which dispatch is this" available to a worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nrpa_core::{
    AtomicComputation, AtomicEngine, AtomicRequest, Dispatcher, ProbabilitySelector,
    SchedulerConfig, Sequence, ToWorker, WeightTablePolicy,
};

const SEED_LOW: u64 = 1;
const SEED_HIGH: u64 = 1_000_000_000;

/// Replicates `RolloutTree::new`'s seed draw so a test can map a request's
/// `random_seed` back to its draw position.
fn seed_positions(cfg: SchedulerConfig) -> HashMap<u64, usize> {
    let mut rng = StdRng::seed_from_u64(cfg.random_seed);
    (0..cfg.seed_table_size())
        .map(|i| (rng.gen_range(SEED_LOW..SEED_HIGH), i as usize))
        .collect()
}

struct ScriptedEngine {
    positions: HashMap<u64, usize>,
    reply_len: Box<dyn Fn(usize) -> usize + Send + Sync>,
    dispatch_count: AtomicUsize,
}

impl ScriptedEngine {
    fn new(cfg: SchedulerConfig, reply_len: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        Self {
            positions: seed_positions(cfg),
            reply_len: Box::new(reply_len),
            dispatch_count: AtomicUsize::new(0),
        }
    }
}

impl AtomicEngine<WeightTablePolicy> for ScriptedEngine {
    fn run(&self, request: &AtomicRequest<WeightTablePolicy>) -> AtomicComputation {
        self.dispatch_count.fetch_add(1, Ordering::Relaxed);
        let position = self.positions[&request.random_seed];
        let len = (self.reply_len)(position);
        AtomicComputation {
            best_sequence: (0..len as u32).collect(),
            sequences_examined: 1,
            random_seed_echo: request.random_seed,
        }
    }
}

fn config(iterations: u32, parallel_levels: u32, atomic_levels: u32) -> SchedulerConfig {
    SchedulerConfig {
        iterations,
        parallel_levels,
        atomic_levels,
        alpha: 1.0,
        random_seed: 1,
    }
}

struct Harness {
    dispatcher: Dispatcher<WeightTablePolicy, ProbabilitySelector>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

/// Spins up `worker_count` OS threads each running [`nrpa_core::run_worker_loop`]
/// against one shared engine, wires them to a fresh [`Dispatcher`], and
/// returns the harness ready to `run()`.
fn harness(cfg: SchedulerConfig, worker_count: usize, engine: Arc<ScriptedEngine>) -> Harness {
    let (result_tx, result_rx) = crossbeam_channel::unbounded();
    let mut to_workers = Vec::new();
    let mut handles = Vec::new();

    for source in 0..worker_count {
        let (tx, rx) = crossbeam_channel::unbounded::<ToWorker<WeightTablePolicy>>();
        to_workers.push(tx);
        let result_tx = result_tx.clone();
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            nrpa_core::run_worker_loop(source, engine.as_ref(), &rx, &result_tx);
        }));
    }
    drop(result_tx);

    let dispatcher = Dispatcher::new(cfg, ProbabilitySelector, to_workers, result_rx).unwrap();
    Harness { dispatcher, handles }
}

impl Harness {
    fn run(mut self) -> Sequence {
        let best = self.dispatcher.run().unwrap();
        for h in self.handles {
            h.join().unwrap();
        }
        best
    }
}

#[test]
fn s1_two_dispatches_one_worker() {
    let _ = env_logger::try_init();
    let cfg = config(2, 1, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |_position| 1));
    let h = harness(cfg, 1, Arc::clone(&engine));
    let best = h.run();
    assert_eq!(best.len(), 1);
    assert_eq!(engine.dispatch_count.load(Ordering::Relaxed), 2);
}

#[test]
fn s2_more_workers_same_dispatch_count() {
    let _ = env_logger::try_init();
    let cfg = config(2, 1, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |_position| 1));
    let h = harness(cfg, 4, Arc::clone(&engine));
    let best = h.run();
    assert_eq!(best.len(), 1);
    // Capacity (I=2 at the root) gates total dispatches, not worker count.
    assert_eq!(engine.dispatch_count.load(Ordering::Relaxed), 2);
}

#[test]
fn s3_nested_tree_completes_with_bounded_discards() {
    let _ = env_logger::try_init();
    let cfg = config(3, 2, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |position| position % 7));
    let h = harness(cfg, 2, Arc::clone(&engine));
    let best = h.run();
    assert_eq!(best.len(), 6);
    let total = engine.dispatch_count.load(Ordering::Relaxed);
    assert_eq!(total, 9);
}

#[test]
fn s4_long_first_result_discards_shorter_speculative_siblings() {
    let _ = env_logger::try_init();
    // `I=3, P=1, A=1`: the root dispatches 3 atomic leaves directly. The
    // first seed position gets a long reply; later positions get short
    // ones, so once it lands, any sibling whose own `adapt_sequence` is
    // shorter gets discarded rather than counted.
    let cfg = config(3, 1, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |position| if position == 0 { 200 } else { 10 }));
    let h = harness(cfg, 1, Arc::clone(&engine));
    let best = h.run();
    assert_eq!(best.len(), 200);
}

#[test]
fn s5_shutdown_sends_quit_to_every_worker_exactly_once() {
    let _ = env_logger::try_init();
    let cfg = config(2, 1, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |_position| {
        std::thread::sleep(Duration::from_millis(10));
        3
    }));
    let h = harness(cfg, 2, Arc::clone(&engine));
    // `Harness::run` joins every worker thread after the dispatcher
    // returns. `run_worker_loop` only ever returns on an explicit `Quit` or
    // a disconnected channel, and the channels here stay open (the
    // `Dispatcher` isn't dropped until the test function exits), so a join
    // completing at all is already proof that `shutdown` reached every
    // worker; a missed one would hang this test indefinitely.
    h.run();
}

#[test]
fn s6_pause_prevents_dispatch_until_resumed() {
    let _ = env_logger::try_init();
    let cfg = config(2, 1, 1);
    let engine = Arc::new(ScriptedEngine::new(cfg, |_position| 1));
    let mut h = harness(cfg, 1, Arc::clone(&engine));

    let paused = h.dispatcher.pause_handle();
    paused.store(true, Ordering::Relaxed);

    let mut dispatcher = h.dispatcher;
    let run_handle = std::thread::spawn(move || dispatcher.run());

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        engine.dispatch_count.load(Ordering::Relaxed),
        0,
        "no dispatch should happen while paused"
    );

    paused.store(false, Ordering::Relaxed);
    let best = run_handle.join().unwrap().unwrap();

    assert_eq!(best.len(), 1);
    assert_eq!(engine.dispatch_count.load(Ordering::Relaxed), 2);

    for handle in h.handles.drain(..) {
        handle.join().unwrap();
    }
}
