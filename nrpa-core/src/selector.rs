//! Heuristics for picking the next pending atomic leaf to dispatch, per
//! spec.md §4.6.

use crate::policy::Policy;
use crate::tree::arena::NodeKey;
use crate::tree::node::State;
use crate::tree::RolloutTree;

/// Picks the next pending atomic leaf to schedule, or `None` if no
/// candidate exists right now.
pub trait Selector<P: Policy> {
    fn select(&self, tree: &RolloutTree<P>) -> Option<NodeKey>;
}

/// Depth-first selector: the first pending atomic leaf found in preorder.
/// Kept mainly as a simple baseline for tests; the dispatcher uses
/// [`ProbabilitySelector`].
pub struct DfsSelector;

impl<P: Policy> Selector<P> for DfsSelector {
    fn select(&self, tree: &RolloutTree<P>) -> Option<NodeKey> {
        fn visit<P: Policy>(tree: &RolloutTree<P>, key: NodeKey) -> Option<NodeKey> {
            let node = tree.node(key);
            if node.is_atomic() {
                return (node.state == State::Pending).then_some(key);
            }
            for child in tree.children_of(key) {
                if let Some(found) = visit(tree, child) {
                    return Some(found);
                }
            }
            None
        }
        visit(tree, tree.root_key())
    }
}

/// Sequence-change-probability schedule of spec.md §4.6, a function of the
/// length of a sequence.
fn sequence_change_probability(length: usize) -> f64 {
    if length >= 150 {
        0.10
    } else if length >= 140 {
        0.20
    } else if length >= 120 {
        0.30
    } else if length >= 80 {
        0.50
    } else if length >= 64 {
        0.95
    } else {
        1.00
    }
}

/// Selector that picks the pending leaf least likely to be invalidated by an
/// older sibling's result arriving first.
///
/// This mirrors `ProbabilitySelector` in the original `selector.py`
/// literally, including using `node.adapt_sequence`'s own length (not the
/// sibling's) at every step of the older-sibling walk — spec.md §4.6 step 2
/// states the rule this way and it is reproduced exactly.
#[derive(Debug, Default)]
pub struct ProbabilitySelector;

impl ProbabilitySelector {
    fn policy_change_probability<P: Policy>(
        tree: &RolloutTree<P>,
        key: NodeKey,
        parent_change_probability: f64,
    ) -> (Option<NodeKey>, f64) {
        let node = tree.node(key);
        if node.state == State::Completed {
            return (None, 1.0);
        }

        let mut my = 1.0 - parent_change_probability;
        let mut sibling = node.sibling;
        while let Some(sibling_key) = sibling {
            let sibling_node = tree.node(sibling_key);
            if sibling_node.state != State::Completed {
                my *= 1.0 - sequence_change_probability(node.adapt_sequence.len());
            }
            sibling = sibling_node.sibling;
        }

        if node.is_atomic() {
            if node.state == State::Pending {
                (Some(key), 1.0 - my)
            } else {
                (None, 1.0)
            }
        } else {
            let mut best_prob = 1.0;
            let mut best_child = None;
            for child in tree.children_of(key) {
                let (child_node, child_prob) =
                    Self::policy_change_probability(tree, child, 1.0 - my);
                if child_prob < best_prob {
                    best_prob = child_prob;
                    best_child = child_node;
                }
            }
            (best_child, best_prob)
        }
    }
}

impl<P: Policy> Selector<P> for ProbabilitySelector {
    fn select(&self, tree: &RolloutTree<P>) -> Option<NodeKey> {
        Self::policy_change_probability(tree, tree.root_key(), 0.0).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::policy::WeightTablePolicy;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            iterations: 2,
            parallel_levels: 1,
            atomic_levels: 1,
            alpha: 1.0,
            random_seed: 1,
        }
    }

    #[test]
    fn dfs_selector_returns_a_pending_atomic_leaf() {
        let tree = RolloutTree::<WeightTablePolicy>::new(config()).unwrap();
        let found = DfsSelector.select(&tree).expect("should find a candidate");
        assert!(tree.node(found).is_atomic());
        assert_eq!(tree.node(found).state, State::Pending);
    }

    #[test]
    fn probability_selector_returns_a_pending_atomic_leaf() {
        let tree = RolloutTree::<WeightTablePolicy>::new(config()).unwrap();
        let found = ProbabilitySelector.select(&tree).expect("should find a candidate");
        assert!(tree.node(found).is_atomic());
        assert_eq!(tree.node(found).state, State::Pending);
    }

    #[test]
    fn sequence_change_probability_schedule() {
        assert_eq!(sequence_change_probability(200), 0.10);
        assert_eq!(sequence_change_probability(150), 0.10);
        assert_eq!(sequence_change_probability(145), 0.20);
        assert_eq!(sequence_change_probability(125), 0.30);
        assert_eq!(sequence_change_probability(90), 0.50);
        assert_eq!(sequence_change_probability(70), 0.95);
        assert_eq!(sequence_change_probability(10), 1.00);
    }

    #[test]
    fn no_candidate_once_tree_is_fully_dispatched() {
        // iterations=1 at every level: a single atomic leaf, once it's
        // running, leaves nothing else pending.
        let cfg = SchedulerConfig {
            iterations: 1,
            parallel_levels: 1,
            atomic_levels: 1,
            alpha: 1.0,
            random_seed: 1,
        };
        let mut tree = RolloutTree::<WeightTablePolicy>::new(cfg).unwrap();
        let leaf = ProbabilitySelector.select(&tree).unwrap();
        tree.mark_running(leaf);
        assert!(ProbabilitySelector.select(&tree).is_none());
    }
}
