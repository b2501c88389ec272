//! Rebalance entry point

use rebal_core::{ClusterSnapshot, EngineConfig, RebalResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::algorithm::ConstraintBasedAlgorithm;
use crate::model::ClusterModel;
use crate::placement::{DefaultPlacementStrategy, PlacementStrategy};
use crate::result::AssignmentOutcome;

/// Scheduler runs rebalance computations against cluster snapshots
///
/// Holds no state between computations: every call builds a private model
/// from the snapshot it is given. Callers serialize calls per cluster.
pub struct Scheduler {
    /// Engine configuration
    config: EngineConfig,
    /// Placement strategy
    placement_strategy: Arc<dyn PlacementStrategy>,
}

impl Scheduler {
    /// Create a new scheduler with the default strategy for `config`'s weights
    pub fn new(config: EngineConfig) -> Self {
        let strategy = DefaultPlacementStrategy::new(config.scoring.clone());

        info!(
            order = %config.placement.resource_order,
            timeout_ms = ?config.placement.timeout_ms,
            headroom = config.scoring.headroom,
            spread = config.scoring.spread,
            stickiness = config.scoring.stickiness,
            "Scheduler initialized"
        );

        Self {
            config,
            placement_strategy: Arc::new(strategy),
        }
    }

    /// Replace the placement strategy
    pub fn with_strategy(mut self, strategy: Arc<dyn PlacementStrategy>) -> Self {
        self.placement_strategy = strategy;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the cluster model without placing anything
    pub fn model(&self, snapshot: &ClusterSnapshot) -> RebalResult<ClusterModel> {
        ClusterModel::from_snapshot(snapshot)
    }

    /// Compute an assignment for the snapshot
    pub fn rebalance(&self, snapshot: &ClusterSnapshot) -> RebalResult<AssignmentOutcome> {
        self.run(snapshot, None)
    }

    /// Compute an assignment, abandoning it once `token` is cancelled
    pub fn rebalance_with_cancellation(
        &self,
        snapshot: &ClusterSnapshot,
        token: CancellationToken,
    ) -> RebalResult<AssignmentOutcome> {
        self.run(snapshot, Some(token))
    }

    fn run(
        &self,
        snapshot: &ClusterSnapshot,
        token: Option<CancellationToken>,
    ) -> RebalResult<AssignmentOutcome> {
        let model = self.model(snapshot)?;

        let mut algorithm = ConstraintBasedAlgorithm::new(self.placement_strategy.clone())
            .with_order(self.config.placement.resource_order);
        if let Some(timeout_ms) = self.config.placement.timeout_ms {
            algorithm = algorithm.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(token) = token {
            algorithm = algorithm.with_cancellation(token);
        }

        match algorithm.calculate(model) {
            Ok(outcome) => {
                info!(
                    run_id = %outcome.run_id,
                    complete = outcome.is_complete(),
                    failures = outcome.failures.len(),
                    "Rebalance computed"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Rebalance failed");
                Err(e)
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
