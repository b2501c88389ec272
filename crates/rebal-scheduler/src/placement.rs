//! Node scoring for placement decisions

use rebal_core::ScoringWeights;

use crate::node::AssignableNode;
use crate::replica::AssignableReplica;

/// How a candidate node relates to the replica in the reported current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stickiness {
    /// Node does not report the partition
    None,
    /// Node reports the partition in another state
    Partition,
    /// Node reports the partition in the replica's state
    SameState,
}

/// Strategy for ranking feasible nodes
///
/// Only called for nodes that already passed every hard constraint.
/// Higher scores win; ties are broken by instance id.
pub trait PlacementStrategy: Send + Sync {
    fn score(
        &self,
        node: &AssignableNode,
        replica: &AssignableReplica,
        stickiness: Stickiness,
    ) -> f64;
}

/// Weighted headroom / spread / stickiness scoring
#[derive(Debug, Clone, Default)]
pub struct DefaultPlacementStrategy {
    weights: ScoringWeights,
}

impl DefaultPlacementStrategy {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Mean fraction of each dimension left free after taking `replica`
    pub fn headroom(node: &AssignableNode, replica: &AssignableReplica) -> f64 {
        let mut sum = 0.0;
        let mut dims = 0usize;
        for (key, &total) in node.total_capacity_map() {
            if total == 0 {
                continue;
            }
            let after = node
                .remaining_capacity(key)
                .saturating_sub(replica.demand(key));
            sum += f64::from(after) / f64::from(total);
            dims += 1;
        }
        if dims == 0 {
            1.0
        } else {
            sum / dims as f64
        }
    }

    pub fn spread(node: &AssignableNode) -> f64 {
        1.0 / (1.0 + f64::from(node.assigned_count()))
    }

    pub fn stickiness(stickiness: Stickiness) -> f64 {
        match stickiness {
            Stickiness::None => 0.0,
            Stickiness::Partition => 0.5,
            Stickiness::SameState => 1.0,
        }
    }
}

impl PlacementStrategy for DefaultPlacementStrategy {
    fn score(
        &self,
        node: &AssignableNode,
        replica: &AssignableReplica,
        stickiness: Stickiness,
    ) -> f64 {
        self.weights.headroom * Self::headroom(node, replica)
            + self.weights.spread * Self::spread(node)
            + self.weights.stickiness * Self::stickiness(stickiness)
    }
}
