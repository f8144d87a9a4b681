//! Worker-side loop and wire message schema, per spec.md §4.8/§6.
//!
//! The atomic NRPA routine itself is an external collaborator (spec.md
//! §1): this module only provides the trait it must satisfy
//! ([`AtomicEngine`]) and the loop that drives it. `nrpa-core` ships no
//! concrete engine.

use serde::{Deserialize, Serialize};

use crate::policy::Policy;
use crate::tree::{AtomicComputation, AtomicOutcome, AtomicRequest};

/// A message sent from the dispatcher to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToWorker<P> {
    /// Run one atomic NRPA computation and report the result.
    Run(AtomicRequest<P>),
    /// Stop the worker loop.
    Quit,
}

/// Statistics a worker reports alongside every result, per spec.md §6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct WorkerStats {
    pub idle_time_seconds: f64,
    pub computation_time_seconds: f64,
}

/// A message sent from a worker back to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromWorker {
    /// Which worker produced this (the dispatcher's own id, not a wire
    /// identity — see spec.md §6).
    pub source: usize,
    pub result: AtomicOutcome,
    pub stats: WorkerStats,
}

/// The external, pure atomic NRPA routine: given a policy, seed, iteration
/// count and level depth, produces a best sequence and reports how many
/// sequences it examined. `nrpa-core` treats this as an opaque, total
/// function — a worker-side failure is expected to surface as a
/// well-formed result with an empty `best_sequence`, not as an error (see
/// spec.md §7).
pub trait AtomicEngine<P: Policy>: Send + Sync {
    fn run(&self, request: &AtomicRequest<P>) -> AtomicComputation;
}

/// Runs one worker's receive/compute/reply loop until a `Quit` message
/// arrives, per spec.md §4.8.
///
/// `source` is this worker's id, echoed back in every [`FromWorker`] so the
/// dispatcher's `worker_id -> leaf` map (kept dispatcher-side, not sent over
/// the wire) can be used to attribute the result.
pub fn run_worker_loop<P, E>(
    source: usize,
    engine: &E,
    inbox: &crossbeam_channel::Receiver<ToWorker<P>>,
    outbox: &crossbeam_channel::Sender<FromWorker>,
) where
    P: Policy,
    E: AtomicEngine<P>,
{
    let mut last_checkpoint = std::time::Instant::now();
    loop {
        let message = match inbox.recv() {
            Ok(m) => m,
            Err(_) => {
                log::warn!("worker {source}: inbox disconnected, stopping");
                return;
            }
        };

        match message {
            ToWorker::Quit => {
                log::info!("worker {source}: received quit");
                return;
            }
            ToWorker::Run(request) => {
                let now = std::time::Instant::now();
                let idle_time_seconds = now.duration_since(last_checkpoint).as_secs_f64();
                last_checkpoint = now;

                log::debug!("worker {source}: running computation");
                let computation = engine.run(&request);

                let now = std::time::Instant::now();
                let computation_time_seconds = now.duration_since(last_checkpoint).as_secs_f64();
                last_checkpoint = now;
                let result = computation.into_outcome(computation_time_seconds);

                let message = FromWorker {
                    source,
                    result,
                    stats: WorkerStats {
                        idle_time_seconds,
                        computation_time_seconds,
                    },
                };
                if outbox.send(message).is_err() {
                    log::warn!("worker {source}: outbox disconnected, stopping");
                    return;
                }
            }
        }
    }
}
