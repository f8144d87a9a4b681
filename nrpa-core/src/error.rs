//! Error taxonomy for the scheduler, per spec.md §7.

use thiserror::Error;

/// Errors the core recognises. `InvariantViolation` is never constructed
/// through the normal `Result` path — internal assertions panic directly,
/// since they represent programming errors, not recoverable conditions.
#[derive(Debug, Error)]
pub enum NrpaError {
    /// Non-positive iterations/levels, or an otherwise malformed
    /// configuration. Fatal at start-up.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// A worker sent an unexpected message, a message with missing fields,
    /// or used an unknown source id. The dispatcher logs this and
    /// terminates all workers.
    #[error("worker protocol violation: {0}")]
    WorkerProtocolViolation(String),

    /// A delivery failure to one specific worker. That worker is dropped
    /// from the idle pool and its in-flight leaf moves to the discarded
    /// pool; the dispatcher otherwise keeps running.
    #[error("transient transport failure talking to worker {worker}: {reason}")]
    TransientTransport {
        /// The worker id the dispatcher was talking to.
        worker: usize,
        /// Human-readable cause.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NrpaError>;
