//! The rollout tree: state machine, policy inheritance, and discard logic
//! of spec.md §3–§4.

pub mod arena;
pub mod node;

use std::collections::HashSet;

use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::comparator::{MoveCode, Sequence, SequenceComparator};
use crate::config::SchedulerConfig;
use crate::error::NrpaError;
use crate::policy::Policy;
use arena::{Arena, NodeKey};
use node::{AtomicData, Node, NodeKind, ParallelData, State};

/// Lower bound (inclusive) of the atomic seed draw range, per the original
/// `np.random.randint(1, 1_000_000_000, ...)`.
const SEED_LOW: u64 = 1;
/// Upper bound (exclusive) of the atomic seed draw range.
const SEED_HIGH: u64 = 1_000_000_000;

/// Root-owned running counters, per spec.md §3.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub wall_time_seconds: f64,
    pub idle_time_seconds: f64,
    pub sequences_executed: u64,
    pub computation_time_seconds: f64,
    pub completed_atomic: u64,
    pub discarded_atomic: u64,
}

impl Stats {
    /// Total time spent either computing or idle.
    pub fn total_time(&self) -> f64 {
        self.computation_time_seconds + self.idle_time_seconds
    }

    /// Fraction of total time spent idle.
    pub fn idle_time_percent(&self) -> f64 {
        let total = self.total_time();
        if total == 0.0 {
            0.0
        } else {
            self.idle_time_seconds / total
        }
    }
}

/// A request to run the external atomic NRPA routine, per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicRequest<P> {
    pub iterations: u32,
    pub levels: u32,
    pub batch_size: u32,
    pub alpha: f64,
    pub random_seed: u64,
    pub weights: P,
}

/// The result of one atomic NRPA run, per spec.md §6's `result` payload.
/// `computation_time_seconds` is filled in by the worker loop after timing
/// the call to [`crate::worker::AtomicEngine::run`] — the routine itself
/// reports only [`AtomicComputation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicOutcome {
    pub best_sequence: Sequence,
    pub sequences_examined: u64,
    pub random_seed_echo: u64,
    pub computation_time_seconds: f64,
}

/// The pure result of the external atomic NRPA routine, with no timing
/// attached — spec.md §6's `nrpa(...)` return value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicComputation {
    pub best_sequence: Sequence,
    pub sequences_examined: u64,
    pub random_seed_echo: u64,
}

impl AtomicComputation {
    /// Attaches a measured computation time, producing the full
    /// [`AtomicOutcome`] that gets recorded into the tree and sent over the
    /// wire.
    pub fn into_outcome(self, computation_time_seconds: f64) -> AtomicOutcome {
        AtomicOutcome {
            best_sequence: self.best_sequence,
            sequences_examined: self.sequences_examined,
            random_seed_echo: self.random_seed_echo,
            computation_time_seconds,
        }
    }
}

/// The full speculative rollout tree, exclusively owned by one dispatcher.
pub struct RolloutTree<P: Policy> {
    arena: Arena<Node<P>>,
    root: NodeKey,
    config: SchedulerConfig,
    seeds: Vec<u64>,
    stats: Stats,
    discarded_pool: HashSet<NodeKey>,
    comparator: SequenceComparator,
}

impl<P: Policy> RolloutTree<P> {
    /// Builds a fresh tree: validates `config`, draws the deterministic
    /// atomic-seed table, creates the root node, and gives it its first
    /// pending child — mirroring `RootRollout.__init__` followed by the
    /// explicit `self.root.add_pending_nodes()` call in `parallel_nrpa.py`.
    pub fn new(config: SchedulerConfig) -> Result<Self, NrpaError> {
        config.validate()?;

        let seed_table_size = config.seed_table_size();
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let seeds = (0..seed_table_size)
            .map(|_| rng.gen_range(SEED_LOW..SEED_HIGH))
            .collect();

        let mut arena = Arena::new();
        let root = arena.insert(Node {
            state: State::Pending,
            parent: None,
            sibling: None,
            adapt_sequence: Vec::new(),
            policy: P::fresh(),
            best_sequence: Vec::new(),
            depth: 0,
            dirty: false,
            node_id: 0,
            kind: NodeKind::Parallel(ParallelData::default()),
        });

        let mut tree = Self {
            arena,
            root,
            config,
            seeds,
            stats: Stats::default(),
            discarded_pool: HashSet::new(),
            comparator: SequenceComparator::new(),
        };
        tree.add_pending_nodes(tree.root);
        Ok(tree)
    }

    /// The root's key, stable for the tree's lifetime.
    pub fn root_key(&self) -> NodeKey {
        self.root
    }

    /// Read-only access to a node, for the selector and for tests.
    pub fn node(&self, key: NodeKey) -> &Node<P> {
        self.arena.get(key)
    }

    /// Running statistics.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Mutable access to statistics, for the dispatcher to fold in
    /// worker-reported timings.
    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// The root's current best known sequence.
    pub fn best_sequence(&self) -> &Sequence {
        &self.arena.get(self.root).best_sequence
    }

    /// The root's current state — `Completed` once the whole tree is done.
    pub fn state(&self) -> State {
        self.arena.get(self.root).state
    }

    /// Whether `right` is a fuzzy-strict improvement over `left`.
    pub fn right_better(&mut self, left: &[MoveCode], right: &[MoveCode]) -> bool {
        self.comparator.right_better(left, right)
    }

    // ---- reporting metrics, ported from RootRollout (rollout.py) ----

    /// Progress fraction towards `total_expected_sequences`.
    pub fn progress(&self) -> f64 {
        if self.stats.sequences_executed == 0 {
            0.0
        } else {
            self.completed_sequences() as f64 / self.config.total_expected_sequences() as f64
        }
    }

    /// Atomic computations actually put to use (not discarded), scaled by
    /// the number of sequences each one explores.
    pub fn completed_sequences(&self) -> u64 {
        (self.stats.completed_atomic - self.stats.discarded_atomic)
            * (self.config.iterations as u64).pow(self.config.atomic_levels)
    }

    /// Fraction of executed sequences that were put to use.
    pub fn parallel_efficiency(&self) -> f64 {
        if self.stats.sequences_executed == 0 {
            1.0
        } else {
            self.completed_sequences() as f64 / self.stats.sequences_executed as f64
        }
    }

    /// Efficiency-scaled computation-time-over-wall-time ratio.
    pub fn parallel_speedup(&self) -> f64 {
        if self.stats.wall_time_seconds == 0.0 {
            1.0
        } else {
            self.parallel_efficiency() * self.stats.computation_time_seconds
                / self.stats.wall_time_seconds
        }
    }

    // ---- tree-shape helpers ----

    /// `predicted_best_sequence` per spec.md §4.2: the right-better of a
    /// node's own best sequence and every child's prediction, copied before
    /// returning so callers never alias tree-owned storage.
    pub fn predicted_best_sequence(&mut self, key: NodeKey) -> Sequence {
        let (children, own_best) = {
            let node = self.arena.get(key);
            match &node.kind {
                NodeKind::Atomic(_) => return node.best_sequence.clone(),
                NodeKind::Parallel(data) => (
                    data.active_pool.iter().copied().collect::<Vec<_>>(),
                    node.best_sequence.clone(),
                ),
            }
        };

        let mut best = own_best;
        for child in children {
            let candidate = self.predicted_best_sequence(child);
            if self.comparator.right_better(&best, &candidate) {
                best = candidate;
            }
        }
        best
    }

    fn next_child_id(&self, parent: NodeKey) -> u64 {
        let node = self.arena.get(parent);
        let data = node.kind.as_parallel().expect("next_child_id on atomic node");
        node.node_id * self.config.iterations as u64
            + data.active_pool.len() as u64
            + data.completed_nodes
    }

    /// Creates one new pending child for `parent` unless capacity `I` is
    /// already exhausted, per spec.md §4.4 step 6 / §4.3.
    pub fn add_pending_nodes(&mut self, parent: NodeKey) -> bool {
        let (pool_len, completed_nodes, parent_depth, youngest) = {
            let node = self.arena.get(parent);
            let data = node
                .kind
                .as_parallel()
                .expect("add_pending_nodes on atomic node");
            (
                data.active_pool.len() as u64,
                data.completed_nodes,
                node.depth,
                data.active_pool.back().copied(),
            )
        };

        if pool_len + completed_nodes >= self.config.iterations as u64 {
            return false;
        }

        let node_id = self.next_child_id(parent);
        let child_depth = parent_depth + 1;
        let is_atomic = child_depth >= self.config.parallel_levels;

        let (adapt_sequence, policy) = match youngest {
            None => (Vec::new(), self.arena.get(parent).policy.clone()),
            Some(sibling_key) => {
                let adapt_sequence = self.predicted_best_sequence(parent);
                let mut policy = self.arena.get(sibling_key).policy.clone();
                policy.adapt(&adapt_sequence, self.config.alpha);
                (adapt_sequence, policy)
            }
        };

        let kind = if is_atomic {
            NodeKind::Atomic(AtomicData::default())
        } else {
            NodeKind::Parallel(ParallelData::default())
        };

        let child = Node {
            state: State::Pending,
            parent: Some(parent),
            sibling: youngest,
            adapt_sequence,
            policy,
            best_sequence: Vec::new(),
            depth: child_depth,
            dirty: false,
            node_id,
            kind,
        };
        let child_key = self.arena.insert(child);

        if !is_atomic {
            self.add_pending_nodes(child_key);
        }

        self.arena
            .get_mut(parent)
            .kind
            .as_parallel_mut()
            .unwrap()
            .active_pool
            .push_back(child_key);

        true
    }

    fn mark_dirty_upward(&mut self, start: NodeKey) {
        let mut cur = Some(start);
        while let Some(key) = cur {
            self.arena.get_mut(key).dirty = true;
            cur = self.arena.get(key).parent;
        }
    }

    /// Marks a leaf as dispatched: `Running`, and dirty up to the root, per
    /// spec.md §4.7 step 1.
    pub fn mark_running(&mut self, leaf: NodeKey) {
        self.arena.get_mut(leaf).state = State::Running;
        self.mark_dirty_upward(leaf);
    }

    /// Builds the payload for a pending atomic leaf, per spec.md §4.3/§6.
    pub fn get_computation_metadata(&self, leaf: NodeKey) -> AtomicRequest<P> {
        let node = self.arena.get(leaf);
        assert!(node.is_atomic(), "InvariantViolation: non-atomic dispatch target");
        assert_eq!(
            node.state,
            State::Pending,
            "InvariantViolation: dispatch target not pending"
        );

        let seed_index = (node.node_id % self.seeds.len() as u64) as usize;
        AtomicRequest {
            iterations: self.config.iterations,
            levels: self.config.atomic_levels,
            batch_size: 1,
            alpha: self.config.alpha,
            random_seed: self.seeds[seed_index],
            weights: node.policy.clone(),
        }
    }

    /// Records a worker's result into the leaf that produced it, per
    /// spec.md §4.8 / the `AtomicRollout.record_computation_result` flow.
    ///
    /// `leaf` must still be live — if its subtree was discarded while
    /// running, it stays alive in the discarded pool precisely so this call
    /// remains valid.
    pub fn record_computation_result(&mut self, leaf: NodeKey, outcome: AtomicOutcome) {
        assert_eq!(
            self.arena.get(leaf).state,
            State::Running,
            "InvariantViolation: result recorded for a non-running leaf"
        );

        {
            let node = self.arena.get_mut(leaf);
            node.state = State::Completed;
            node.best_sequence = outcome.best_sequence;
            if let NodeKind::Atomic(data) = &mut node.kind {
                data.observed_random_seed = Some(outcome.random_seed_echo);
            }
        }
        self.mark_dirty_upward(leaf);
        self.stats.completed_atomic += 1;

        if self.discarded_pool.remove(&leaf) {
            self.stats.discarded_atomic += 1;
            self.arena.remove(leaf);
        }
    }

    /// Moves a running leaf into the discarded pool because the worker
    /// computing it was lost, per spec.md §7's `TransientTransport`: the
    /// leaf's eventual (late) result, if it ever arrives, is absorbed
    /// cleanly by [`RolloutTree::record_computation_result`]. Unlike the
    /// speculative discard of step 4, nothing dirtied this leaf, so its
    /// parent's refill and state recomputation (update_node's steps 6/7)
    /// are done here directly rather than through the ordinary dirty
    /// traversal.
    pub fn abandon_running_leaf(&mut self, leaf: NodeKey) {
        let parent = self
            .arena
            .get(leaf)
            .parent
            .expect("InvariantViolation: abandoned leaf without parent");
        self.arena
            .get_mut(parent)
            .kind
            .as_parallel_mut()
            .unwrap()
            .active_pool
            .retain(|&k| k != leaf);
        self.discard_node(leaf);

        let pool = self.children_of(parent);
        let mut has_pending = pool.iter().any(|&c| self.arena.get(c).state == State::Pending);
        let has_running = pool.iter().any(|&c| self.arena.get(c).state == State::Running);
        if !has_pending {
            has_pending = self.add_pending_nodes(parent);
        }
        self.arena.get_mut(parent).state = if has_running {
            State::Running
        } else if has_pending {
            State::Pending
        } else {
            State::Completed
        };
        self.mark_dirty_upward(parent);
    }

    fn free_completed_subtree(&mut self, key: NodeKey) {
        let node = self.arena.remove(key);
        if let NodeKind::Parallel(data) = node.kind {
            for child in data.active_pool {
                self.free_completed_subtree(child);
            }
        }
    }

    /// Discards a node per spec.md §4.5. The root must never be discarded.
    fn discard_node(&mut self, key: NodeKey) {
        assert!(key != self.root, "InvariantViolation: root rollout discarded");

        let is_atomic = self.arena.get(key).is_atomic();
        if is_atomic {
            let state = self.arena.get(key).state;
            self.arena.get_mut(key).parent = None;
            match state {
                State::Running => {
                    self.discarded_pool.insert(key);
                }
                State::Pending => {
                    self.arena.remove(key);
                }
                State::Completed => {
                    self.stats.discarded_atomic += 1;
                    self.arena.remove(key);
                }
            }
        } else {
            let children: Vec<NodeKey> = self
                .arena
                .get(key)
                .kind
                .as_parallel()
                .unwrap()
                .active_pool
                .iter()
                .copied()
                .collect();
            for child in children {
                self.discard_node(child);
            }
            self.arena.get_mut(key).parent = None;
            self.arena.remove(key);
        }
    }

    /// Recursive tree-update state machine of spec.md §4.4. Atomic nodes are
    /// a no-op; parallel nodes (including the root) run the full procedure.
    fn update_node(&mut self, key: NodeKey) {
        if self.arena.get(key).is_atomic() {
            return;
        }
        if !self.arena.get(key).dirty {
            return;
        }

        let pool: Vec<NodeKey> = self
            .arena
            .get(key)
            .kind
            .as_parallel()
            .unwrap()
            .active_pool
            .iter()
            .copied()
            .collect();

        let dirty_idx = pool.iter().position(|&c| self.arena.get(c).dirty);
        let dirty_idx = match dirty_idx {
            Some(i) => i,
            None => {
                // The dirty leaf in this subtree was discarded.
                self.arena.get_mut(key).dirty = false;
                return;
            }
        };
        let dirty_key = pool[dirty_idx];
        let next_key = pool.get(dirty_idx + 1).copied();

        self.update_node(dirty_key);

        // Step 4: speculation invalidation.
        if let Some(next_key) = next_key {
            let next_adapt_sequence = self.arena.get(next_key).adapt_sequence.clone();
            let dirty_predicted = self.predicted_best_sequence(dirty_key);
            if self.comparator.right_better(&next_adapt_sequence, &dirty_predicted) {
                loop {
                    let back = self
                        .arena
                        .get(key)
                        .kind
                        .as_parallel()
                        .unwrap()
                        .active_pool
                        .back()
                        .copied();
                    let back = match back {
                        Some(b) => b,
                        None => break,
                    };
                    if self.arena.get(back).dirty {
                        break;
                    }
                    self.arena
                        .get_mut(key)
                        .kind
                        .as_parallel_mut()
                        .unwrap()
                        .active_pool
                        .pop_back();
                    self.discard_node(back);
                }
            }
        }

        // Step 5: best-sequence rollup, starting at the dirty child.
        {
            let pool_now: Vec<NodeKey> = self
                .arena
                .get(key)
                .kind
                .as_parallel()
                .unwrap()
                .active_pool
                .iter()
                .copied()
                .collect();
            let mut found_dirty = false;
            let mut best = self.arena.get(key).best_sequence.clone();
            for &child in &pool_now {
                if self.arena.get(child).dirty {
                    found_dirty = true;
                }
                if found_dirty {
                    let candidate = self.arena.get(child).best_sequence.clone();
                    if self.comparator.right_better(&best, &candidate) {
                        best = candidate;
                    }
                }
                if self.arena.get(child).state != State::Completed {
                    break;
                }
            }
            self.arena.get_mut(key).best_sequence = best;
        }

        // Step 9: clear the processed child's dirty bit, done here (rather
        // than at the very end) because step 8's pool compaction may free
        // `dirty_key` outright if it was the completed front of the pool —
        // an arena slot, once freed, cannot have its flag touched again.
        // This node's own `dirty` stays set until a future call finds no
        // dirty child left, matching `rollout.py`'s `ParallelRollout.update`,
        // where only `dirty_node.dirty` is cleared on a successful pass.
        self.arena.get_mut(dirty_key).dirty = false;

        // Step 6/7: child-type scan, spawn, state transition.
        let (mut has_running, mut has_pending) = (false, false);
        {
            let pool_now: Vec<NodeKey> = self
                .arena
                .get(key)
                .kind
                .as_parallel()
                .unwrap()
                .active_pool
                .iter()
                .copied()
                .collect();
            for &child in &pool_now {
                match self.arena.get(child).state {
                    State::Running => has_running = true,
                    State::Pending => has_pending = true,
                    State::Completed => {}
                }
            }
        }
        if !has_pending {
            has_pending = self.add_pending_nodes(key);
        }

        if has_running {
            self.arena.get_mut(key).state = State::Running;
        } else if has_pending {
            self.arena.get_mut(key).state = State::Pending;
        } else {
            self.arena.get_mut(key).state = State::Completed;
            let data = self.arena.get(key).kind.as_parallel().unwrap();
            debug_assert_eq!(
                data.active_pool.len() as u64 + data.completed_nodes,
                self.config.iterations as u64,
                "InvariantViolation: completed node's pool + completed_nodes != iterations"
            );
        }

        // Step 8: pool compaction.
        loop {
            let front_completed = {
                let data = self.arena.get(key).kind.as_parallel().unwrap();
                if data.active_pool.len() <= 1 {
                    None
                } else {
                    data.active_pool
                        .front()
                        .copied()
                        .filter(|&c| self.arena.get(c).state == State::Completed)
                }
            };
            match front_completed {
                Some(front) => {
                    self.arena
                        .get_mut(key)
                        .kind
                        .as_parallel_mut()
                        .unwrap()
                        .active_pool
                        .pop_front();
                    self.arena
                        .get_mut(key)
                        .kind
                        .as_parallel_mut()
                        .unwrap()
                        .completed_nodes += 1;
                    self.free_completed_subtree(front);
                }
                None => break,
            }
        }
        if let Some(front) = self
            .arena
            .get(key)
            .kind
            .as_parallel()
            .unwrap()
            .active_pool
            .front()
            .copied()
        {
            self.arena.get_mut(front).sibling = None;
        }
    }

    /// Runs the tree update from the root, then clears the root's own dirty
    /// bit unconditionally — the one place `RootRollout.update` differs
    /// from the shared `ParallelRollout.update` body.
    pub fn update(&mut self) {
        self.update_node(self.root);
        self.arena.get_mut(self.root).dirty = false;
    }

    /// Iterator over a parallel node's active pool, oldest first. Empty for
    /// atomic nodes.
    pub fn children_of(&self, key: NodeKey) -> Vec<NodeKey> {
        match &self.arena.get(key).kind {
            NodeKind::Parallel(data) => data.active_pool.iter().copied().collect(),
            NodeKind::Atomic(_) => Vec::new(),
        }
    }
}
