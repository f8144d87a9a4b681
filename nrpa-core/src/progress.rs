//! Console progress reporting, per spec.md §4.7 step 4 / `reporting.py`'s
//! `log_to_console`.

use crate::comparator::Sequence;
use crate::policy::Policy;
use crate::tree::RolloutTree;

/// Emits the three-line progress report `log_to_console` produced, as
/// `log::info!` rather than the original's `logging.info` + neptune
/// dashboard channels (the dashboard sink is out of scope).
pub fn log_progress<P: Policy>(tree: &RolloutTree<P>) {
    let stats = tree.stats();
    log::info!(
        "Time: {:.2} wall, {:.2} working, {:.2} ({:.0}%) idle",
        stats.wall_time_seconds,
        stats.total_time(),
        stats.idle_time_seconds,
        stats.idle_time_percent() * 100.0,
    );
    log::info!(
        "Sequences: {}/{} ({:.0}%) speedup {:.2} done: {:.0}%",
        stats.sequences_executed,
        tree.completed_sequences(),
        tree.parallel_efficiency() * 100.0,
        tree.parallel_speedup(),
        tree.progress() * 100.0,
    );
    log::info!("Root best sequence: {}", tree.best_sequence().len());
}

/// Tracks when the next report is due, per spec.md §4.7 step 4: at least
/// every 20s wall time, or immediately whenever the root's best sequence
/// becomes right-better than the previously reported one — the fuzzy §3
/// relation, not a raw length comparison, since two equal-length sequences
/// that are not fuzzily equal are also a real improvement (§4.7's literal
/// wording, matching `parallel_nrpa.py`'s
/// `SequenceComparator.is_right_better(last_best_sequence, self.root.best_sequence)`).
pub struct ProgressTrigger {
    interval: std::time::Duration,
    last_reported_at: std::time::Instant,
    last_reported_sequence: Sequence,
}

impl ProgressTrigger {
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval,
            last_reported_at: std::time::Instant::now(),
            last_reported_sequence: Vec::new(),
        }
    }

    /// The best sequence as of the last report, for callers to compare
    /// against the tree's current one via [`RolloutTree::right_better`].
    pub fn last_reported_sequence(&self) -> &Sequence {
        &self.last_reported_sequence
    }

    /// Whether the 20s (or configured) interval has elapsed since the last
    /// report, independent of whether the best sequence has improved.
    pub fn interval_elapsed(&self) -> bool {
        self.last_reported_at.elapsed() >= self.interval
    }

    pub fn mark_reported(&mut self, best_sequence: &Sequence) {
        self.last_reported_at = std::time::Instant::now();
        self.last_reported_sequence = best_sequence.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::SequenceComparator;

    #[test]
    fn trigger_fires_on_a_right_better_best_sequence() {
        let trigger = ProgressTrigger::new(std::time::Duration::from_secs(20));
        let mut cmp = SequenceComparator::new();
        assert!(cmp.right_better(trigger.last_reported_sequence(), &[1]));
    }

    #[test]
    fn trigger_does_not_fire_again_immediately_after_reporting() {
        let mut trigger = ProgressTrigger::new(std::time::Duration::from_secs(20));
        let mut cmp = SequenceComparator::new();
        let reported: Sequence = (0..10).collect();
        trigger.mark_reported(&reported);

        assert!(!cmp.right_better(trigger.last_reported_sequence(), &reported));
        assert!(!trigger.interval_elapsed());

        let longer: Sequence = (0..11).collect();
        assert!(cmp.right_better(trigger.last_reported_sequence(), &longer));
    }

    #[test]
    fn trigger_fires_on_an_equal_length_fuzzily_different_sequence() {
        // Same length as what was last reported, but more than 30% of
        // elements differ — a real improvement per §3/§4.7, not caught by a
        // raw length comparison.
        let mut trigger = ProgressTrigger::new(std::time::Duration::from_secs(20));
        let mut cmp = SequenceComparator::new();
        let reported: Sequence = (0..10).collect();
        trigger.mark_reported(&reported);

        let same_length_very_different: Sequence = vec![100, 101, 102, 103, 104, 105, 106, 107, 8, 9];
        assert!(cmp.right_better(trigger.last_reported_sequence(), &same_length_very_different));
    }
}
