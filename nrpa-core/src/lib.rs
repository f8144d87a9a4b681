//! Parallel speculative rollout scheduler for Nested Rollout Policy
//! Adaptation (NRPA).
//!
//! This crate owns the tree of in-flight and completed rollouts, the
//! selector that decides what to dispatch next, and the dispatcher/worker
//! message loop that drives an external atomic NRPA routine
//! ([`worker::AtomicEngine`]) across a pool of workers. It does not itself
//! play Morpion Solitaire, evaluate a board, or implement the atomic NRPA
//! search — those are supplied by a collaborator crate through the
//! [`worker::AtomicEngine`] trait.

pub mod comparator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod policy;
pub mod progress;
pub mod selector;
pub mod tree;
pub mod worker;

pub use comparator::{MoveCode, Sequence, SequenceComparator, FUZZY_EQUALITY_THRESHOLD};
pub use config::SchedulerConfig;
pub use dispatcher::Dispatcher;
pub use error::{NrpaError, Result};
pub use policy::{Policy, WeightTablePolicy};
pub use selector::{DfsSelector, ProbabilitySelector, Selector};
pub use tree::arena::NodeKey;
pub use tree::node::{Node, NodeKind, State};
pub use tree::{AtomicComputation, AtomicOutcome, AtomicRequest, RolloutTree, Stats};
pub use worker::{run_worker_loop, AtomicEngine, FromWorker, ToWorker, WorkerStats};
