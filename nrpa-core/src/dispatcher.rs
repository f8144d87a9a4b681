//! The central dispatcher: main loop of spec.md §4.7, driving a
//! [`RolloutTree`] and a pool of out-of-process (here: in-process channel)
//! workers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::comparator::Sequence;
use crate::config::SchedulerConfig;
use crate::error::NrpaError;
use crate::policy::Policy;
use crate::progress::{log_progress, ProgressTrigger};
use crate::selector::Selector;
use crate::tree::arena::NodeKey;
use crate::tree::RolloutTree;
use crate::worker::{FromWorker, ToWorker};

/// How often the receive phase re-checks pause state and the progress
/// trigger even with no result pending, so a paused run (or a slow first
/// result) doesn't block the loop from noticing a resume or a 20s tick.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default progress report interval, per spec.md §4.7 step 4.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(20);

/// Drives one rollout tree to completion against a fixed set of workers,
/// reached through one bounded `run` channel per worker and one shared
/// unbounded result channel — mirroring `dg_mcts`'s SPMC dispatch /
/// MPSC-collect shape.
pub struct Dispatcher<P: Policy, S: Selector<P>> {
    tree: RolloutTree<P>,
    selector: S,
    to_workers: Vec<Sender<ToWorker<P>>>,
    from_workers: Receiver<FromWorker>,
    idle: VecDeque<usize>,
    running: HashMap<usize, NodeKey>,
    lost: usize,
    paused: Arc<AtomicBool>,
    started_at: Instant,
    progress: ProgressTrigger,
}

impl<P: Policy, S: Selector<P>> Dispatcher<P, S> {
    /// Builds a dispatcher over a freshly constructed tree. `to_workers[i]`
    /// is the channel for worker id `i`; every worker must share
    /// `from_workers`'s sending half.
    pub fn new(
        config: SchedulerConfig,
        selector: S,
        to_workers: Vec<Sender<ToWorker<P>>>,
        from_workers: Receiver<FromWorker>,
    ) -> Result<Self, NrpaError> {
        let tree = RolloutTree::new(config)?;
        let idle = (0..to_workers.len()).collect();
        Ok(Self {
            tree,
            selector,
            to_workers,
            from_workers,
            idle,
            running: HashMap::new(),
            lost: 0,
            paused: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            progress: ProgressTrigger::new(DEFAULT_PROGRESS_INTERVAL),
        })
    }

    /// A clonable handle that can pause/resume the dispatcher from another
    /// thread. Advisory only: in-flight sends and receives are unaffected,
    /// per spec.md §4.7 — pausing only skips the *next* send phase.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Live worker count, i.e. total minus any lost to `TransientTransport`.
    fn active_worker_count(&self) -> usize {
        self.to_workers.len() - self.lost
    }

    /// Runs the dispatcher to completion, returning the root's final best
    /// sequence. Returns `Err` only on `WorkerProtocolViolation`; a lost
    /// worker (`TransientTransport`) is logged and absorbed without ending
    /// the run. Per spec.md §7, a `WorkerProtocolViolation` still terminates
    /// every reachable worker before the dispatcher itself returns — the
    /// `shutdown()` call below runs on every exit path out of the loop, not
    /// just the ordinary "no more work" one.
    pub fn run(&mut self) -> Result<Sequence, NrpaError> {
        let outcome = self.drive();
        self.maybe_report();
        self.shutdown();
        outcome?;
        Ok(self.tree.best_sequence().clone())
    }

    /// The main loop body of spec.md §4.7, separated from `run()` so that
    /// every return path — the ordinary "no more work" break as well as any
    /// `WorkerProtocolViolation` — passes back through `run()`'s unconditional
    /// `shutdown()`.
    fn drive(&mut self) -> Result<(), NrpaError> {
        loop {
            if self.send_phase() {
                // No candidate was selectable and every live worker is
                // idle: the tree has no more work to hand out.
                return Ok(());
            }

            self.maybe_report();

            match self.from_workers.recv_timeout(RECEIVE_POLL_INTERVAL) {
                Ok(message) => self.handle_result(message)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if self.running.is_empty() {
                        // All workers already quit cleanly; nothing left
                        // to wait for.
                        return Ok(());
                    }
                    return Err(NrpaError::WorkerProtocolViolation(
                        "result channel disconnected with work still in flight".into(),
                    ));
                }
            }
        }
    }

    /// Send phase of spec.md §4.7 step 1/2. Returns `true` when the run is
    /// over: no candidate was found and no worker has outstanding work.
    /// While paused, the phase is skipped entirely and reports "not over".
    fn send_phase(&mut self) -> bool {
        if self.paused.load(Ordering::Relaxed) {
            return false;
        }
        loop {
            let worker = match self.idle.pop_front() {
                Some(w) => w,
                None => return false,
            };

            let leaf = match self.selector.select(&self.tree) {
                Some(leaf) => leaf,
                None => {
                    self.idle.push_front(worker);
                    return self.running.is_empty() && self.idle.len() == self.active_worker_count();
                }
            };

            let request = self.tree.get_computation_metadata(leaf);
            self.tree.mark_running(leaf);

            if self.to_workers[worker].send(ToWorker::Run(request)).is_err() {
                log::warn!("worker {worker}: send failed, treating as lost");
                self.tree.abandon_running_leaf(leaf);
                self.lost += 1;
                // `worker` is not returned to the idle set.
                continue;
            }

            self.running.insert(worker, leaf);
            self.tree.update();
        }
    }

    fn handle_result(&mut self, message: FromWorker) -> Result<(), NrpaError> {
        let leaf = self.running.remove(&message.source).ok_or_else(|| {
            NrpaError::WorkerProtocolViolation(format!(
                "result from unknown or already-settled worker {}",
                message.source
            ))
        })?;

        let sequences_examined = message.result.sequences_examined;
        self.tree.record_computation_result(leaf, message.result);

        {
            let stats = self.tree.stats_mut();
            stats.sequences_executed += sequences_examined;
            stats.computation_time_seconds += message.stats.computation_time_seconds;
            stats.idle_time_seconds += message.stats.idle_time_seconds;
            stats.wall_time_seconds = self.started_at.elapsed().as_secs_f64();
        }

        self.idle.push_back(message.source);
        self.tree.update();
        Ok(())
    }

    /// Per spec.md §4.7 step 4: reports at least every 20s wall time, or
    /// immediately once the root's best sequence is a fuzzy right-better
    /// improvement over the last-reported one (§3's relation, not a raw
    /// length check — see [`ProgressTrigger`]).
    fn maybe_report(&mut self) {
        let best = self.tree.best_sequence().clone();
        let previous = self.progress.last_reported_sequence().clone();
        let improved = self.tree.right_better(&previous, &best);
        if improved || self.progress.interval_elapsed() {
            log_progress(&self.tree);
            self.progress.mark_reported(&best);
        }
    }

    /// Sends `quit` to every worker that is still reachable. Per spec.md
    /// §4.7, this only happens once the tree is complete, so no dispatched
    /// result is ever lost to a shutdown race.
    fn shutdown(&mut self) {
        for sender in &self.to_workers {
            let _ = sender.send(ToWorker::Quit);
        }
    }

    /// The tree's current best known sequence, for callers that want to
    /// observe progress without waiting for [`Dispatcher::run`] to return.
    pub fn best_sequence(&self) -> &Sequence {
        self.tree.best_sequence()
    }
}
