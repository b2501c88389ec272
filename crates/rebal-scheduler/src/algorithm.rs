//! Constraint-based replica placement
//!
//! A greedy, non-backtracking placer:
//! 1. Replicas are grouped by resource, then partition, top state first.
//! 2. Resources are placed largest normalized demand first, so that small
//!    resources fill whatever headroom the large ones leave behind.
//! 3. Each replica goes to the best scoring node that passes every hard
//!    constraint (capacity, disablement, tags, one replica per node, fault
//!    zone diversity).
//! 4. A partition with an unplaceable replica is rolled back and reported;
//!    it never appears half placed in the result.
//! 5. The final result is checked against every partition's state model.

use chrono::Utc;
use rebal_core::{
    CapacityKey, FaultZoneId, PartitionId, RebalError, RebalResult, ReplicaState, ResourceId,
    ResourceOrder,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{ClusterModel, CurrentAssignment, PartitionSpec};
use crate::node::{AssignableNode, Rejection};
use crate::placement::{DefaultPlacementStrategy, PlacementStrategy};
use crate::replica::AssignableReplica;
use crate::result::{
    AssignmentOutcome, AssignmentResult, InfeasibilityKind, NodeLedger, PlacementFailure,
    ReplicaPlacement,
};

/// Replicas of one partition, top state first
#[derive(Debug)]
struct PartitionGroup {
    spec: PartitionSpec,
    replicas: Vec<AssignableReplica>,
}

/// Partitions of one resource in declared order
#[derive(Debug)]
struct ResourceGroup {
    resource_id: ResourceId,
    demand: BTreeMap<CapacityKey, u64>,
    partitions: Vec<PartitionGroup>,
}

/// Node rejections seen while looking for a home for one replica
#[derive(Debug, Default)]
struct RejectionSummary {
    nodes: usize,
    disabled: usize,
    partition_disabled: usize,
    missing_tag: usize,
    already_hosted: usize,
    partition_limit: usize,
    capacity: BTreeMap<CapacityKey, usize>,
    fault_zone: usize,
}

impl RejectionSummary {
    fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::InstanceDisabled => self.disabled += 1,
            Rejection::PartitionDisabled => self.partition_disabled += 1,
            Rejection::MissingTag(_) => self.missing_tag += 1,
            Rejection::PartitionAlreadyHosted => self.already_hosted += 1,
            Rejection::PartitionLimit(_) => self.partition_limit += 1,
            Rejection::InsufficientCapacity { key, .. } => {
                *self.capacity.entry(key.clone()).or_default() += 1
            }
        }
    }

    fn kind(&self) -> InfeasibilityKind {
        if self.fault_zone > 0 {
            InfeasibilityKind::Topology
        } else if !self.capacity.is_empty() || self.partition_limit > 0 || self.nodes == 0 {
            InfeasibilityKind::Capacity
        } else if self.already_hosted > 0 {
            InfeasibilityKind::Topology
        } else {
            InfeasibilityKind::Disablement
        }
    }

    fn detail(&self) -> String {
        let mut parts = Vec::new();
        if self.disabled > 0 {
            parts.push(format!("{} disabled", self.disabled));
        }
        if self.partition_disabled > 0 {
            parts.push(format!("{} partition disabled", self.partition_disabled));
        }
        if self.missing_tag > 0 {
            parts.push(format!("{} missing tag", self.missing_tag));
        }
        if self.already_hosted > 0 {
            parts.push(format!("{} already host the partition", self.already_hosted));
        }
        if self.partition_limit > 0 {
            parts.push(format!("{} at partition limit", self.partition_limit));
        }
        for (key, count) in &self.capacity {
            parts.push(format!("{} insufficient {}", count, key));
        }
        if self.fault_zone > 0 {
            parts.push(format!("{} in a fault zone already used", self.fault_zone));
        }
        if parts.is_empty() {
            format!("{} node(s)", self.nodes)
        } else {
            format!("{} node(s): {}", self.nodes, parts.join(", "))
        }
    }
}

/// Greedy constraint-based placement algorithm
pub struct ConstraintBasedAlgorithm {
    strategy: Arc<dyn PlacementStrategy>,
    order: ResourceOrder,
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl Default for ConstraintBasedAlgorithm {
    fn default() -> Self {
        Self::new(Arc::new(DefaultPlacementStrategy::default()))
    }
}

impl ConstraintBasedAlgorithm {
    pub fn new(strategy: Arc<dyn PlacementStrategy>) -> Self {
        Self {
            strategy,
            order: ResourceOrder::LargestFirst,
            cancel: None,
            timeout: None,
        }
    }

    pub fn with_order(mut self, order: ResourceOrder) -> Self {
        self.order = order;
        self
    }

    /// Abandon the computation once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Abandon the computation once it has run for `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Place every replica of the model
    ///
    /// Unplaceable partitions are reported in the outcome. Errors are reserved
    /// for inconsistent input, cancellation and state model violations.
    pub fn calculate(&self, model: ClusterModel) -> RebalResult<AssignmentOutcome> {
        let run_id = Uuid::new_v4();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let ClusterModel {
            cluster,
            mut nodes,
            replicas,
            partitions,
            current,
        } = model;

        nodes.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));

        info!(
            run_id = %run_id,
            nodes = nodes.len(),
            replicas = replicas.len(),
            partitions = partitions.len(),
            order = %self.order,
            topology_aware = cluster.topology_aware,
            "Starting placement"
        );

        let mut groups = group_replicas(&partitions, replicas)?;
        if self.order == ResourceOrder::LargestFirst {
            sort_largest_first(&mut groups, &nodes);
        }
        let resource_order: Vec<ResourceId> =
            groups.iter().map(|g| g.resource_id.clone()).collect();

        let mut result = AssignmentResult::default();
        let mut failures = Vec::new();

        for group in &groups {
            debug!(
                run_id = %run_id,
                resource = %group.resource_id,
                partitions = group.partitions.len(),
                "Placing resource"
            );
            for partition in &group.partitions {
                self.place_partition(
                    partition,
                    &mut nodes,
                    &current,
                    cluster.topology_aware,
                    deadline,
                    &mut result,
                    &mut failures,
                )?;
            }
        }

        verify_state_models(&partitions, &result, &failures)?;

        info!(
            run_id = %run_id,
            placed_partitions = result.partition_count(),
            placed_replicas = result.replica_count(),
            failed_partitions = failures.len(),
            "Placement finished"
        );

        Ok(AssignmentOutcome {
            run_id,
            computed_at: Utc::now(),
            resource_order,
            result,
            failures,
            nodes: nodes.iter().map(NodeLedger::from).collect(),
        })
    }

    fn check_cancelled(&self, deadline: Option<Instant>) -> RebalResult<()> {
        if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(RebalError::Cancelled("cancellation requested".to_string()));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(RebalError::Cancelled("deadline exceeded".to_string()));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn place_partition(
        &self,
        partition: &PartitionGroup,
        nodes: &mut [AssignableNode],
        current: &CurrentAssignment,
        topology_aware: bool,
        deadline: Option<Instant>,
        result: &mut AssignmentResult,
        failures: &mut Vec<PlacementFailure>,
    ) -> RebalResult<()> {
        let mut placed: Vec<(usize, &AssignableReplica)> = Vec::new();

        for replica in &partition.replicas {
            self.check_cancelled(deadline)?;

            let used_zones: BTreeSet<&FaultZoneId> = placed
                .iter()
                .map(|(idx, _)| nodes[*idx].fault_zone_id())
                .collect();

            match self.select_node(nodes, replica, current, topology_aware, &used_zones) {
                Ok(idx) => {
                    nodes[idx].assign(replica)?;
                    placed.push((idx, replica));
                }
                Err(summary) => {
                    for (idx, peer) in placed.iter().rev() {
                        nodes[*idx].release(peer)?;
                    }

                    let failure = PlacementFailure {
                        resource_id: partition.spec.resource_id.clone(),
                        partition_id: partition.spec.partition_id.clone(),
                        state: replica.state(),
                        kind: summary.kind(),
                        detail: summary.detail(),
                    };
                    warn!(
                        resource = %failure.resource_id,
                        partition = %failure.partition_id,
                        state = %failure.state,
                        kind = %failure.kind,
                        detail = %failure.detail,
                        rolled_back = placed.len(),
                        "Partition could not be placed"
                    );
                    failures.push(failure);
                    return Ok(());
                }
            }
        }

        let placements = placed
            .iter()
            .map(|(idx, replica)| ReplicaPlacement {
                instance_id: nodes[*idx].instance_id().clone(),
                state: replica.state(),
            })
            .collect();
        result.insert(
            partition.spec.resource_id.clone(),
            partition.spec.partition_id.clone(),
            placements,
        );
        Ok(())
    }

    /// Index of the best node for `replica`, or why there is none
    fn select_node(
        &self,
        nodes: &[AssignableNode],
        replica: &AssignableReplica,
        current: &CurrentAssignment,
        topology_aware: bool,
        used_zones: &BTreeSet<&FaultZoneId>,
    ) -> Result<usize, RejectionSummary> {
        let mut summary = RejectionSummary {
            nodes: nodes.len(),
            ..Default::default()
        };
        let mut best: Option<(f64, usize)> = None;

        for (idx, node) in nodes.iter().enumerate() {
            if let Err(rejection) = node.check(replica) {
                summary.record(&rejection);
                continue;
            }
            if topology_aware && used_zones.contains(node.fault_zone_id()) {
                summary.fault_zone += 1;
                continue;
            }

            let stickiness = current.stickiness(replica, node.instance_id());
            let score = self.strategy.score(node, replica, stickiness);
            // Nodes are sorted by instance id, so keeping the first of equal
            // scores breaks ties by id.
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, idx));
            }
        }

        best.map(|(_, idx)| idx).ok_or(summary)
    }
}

/// Group flat replicas by resource and partition, in declaration order
fn group_replicas(
    partitions: &[PartitionSpec],
    replicas: Vec<AssignableReplica>,
) -> RebalResult<Vec<ResourceGroup>> {
    let mut by_partition: BTreeMap<(ResourceId, PartitionId), Vec<AssignableReplica>> =
        BTreeMap::new();
    for replica in replicas {
        by_partition
            .entry((replica.resource_id().clone(), replica.partition_id().clone()))
            .or_default()
            .push(replica);
    }

    let mut groups: Vec<ResourceGroup> = Vec::new();
    for spec in partitions {
        let key = (spec.resource_id.clone(), spec.partition_id.clone());
        let mut replicas = by_partition.remove(&key).unwrap_or_default();
        replicas.sort_by_key(|r| (!r.is_top_state(), r.replica_index()));

        if groups.last().map(|g| &g.resource_id) != Some(&spec.resource_id) {
            if groups.iter().any(|g| g.resource_id == spec.resource_id) {
                return Err(RebalError::InputInconsistency(format!(
                    "partitions of resource '{}' are not contiguous",
                    spec.resource_id
                )));
            }
            groups.push(ResourceGroup {
                resource_id: spec.resource_id.clone(),
                demand: BTreeMap::new(),
                partitions: Vec::new(),
            });
        }

        // Just pushed or matched above.
        let Some(group) = groups.last_mut() else {
            continue;
        };
        for replica in &replicas {
            for (key, &amount) in replica.demand_vector() {
                *group.demand.entry(key.clone()).or_default() += u64::from(amount);
            }
        }
        group.partitions.push(PartitionGroup {
            spec: spec.clone(),
            replicas,
        });
    }

    if let Some(((resource, partition), _)) = by_partition.into_iter().next() {
        return Err(RebalError::InputInconsistency(format!(
            "replica of {}/{} belongs to no known partition",
            resource, partition
        )));
    }

    Ok(groups)
}

/// Sort resources by demand relative to total cluster capacity, largest first
fn sort_largest_first(groups: &mut [ResourceGroup], nodes: &[AssignableNode]) {
    let mut capacity: BTreeMap<&CapacityKey, u64> = BTreeMap::new();
    for node in nodes.iter().filter(|n| n.is_enabled()) {
        for (key, &total) in node.total_capacity_map() {
            *capacity.entry(key).or_default() += u64::from(total);
        }
    }

    let weight = |group: &ResourceGroup| -> f64 {
        group
            .demand
            .iter()
            .map(|(key, &demand)| match capacity.get(key) {
                Some(&total) if total > 0 => demand as f64 / total as f64,
                _ => demand as f64,
            })
            .sum()
    };

    groups.sort_by(|a, b| {
        weight(b)
            .total_cmp(&weight(a))
            .then_with(|| a.resource_id.cmp(&b.resource_id))
    });
}

/// Every partition is either fully placed per its requirement or reported failed
fn verify_state_models(
    partitions: &[PartitionSpec],
    result: &AssignmentResult,
    failures: &[PlacementFailure],
) -> RebalResult<()> {
    for spec in partitions {
        let failed = failures
            .iter()
            .any(|f| f.resource_id == spec.resource_id && f.partition_id == spec.partition_id);

        match result.placements(&spec.resource_id, &spec.partition_id) {
            Some(_) if failed => {
                return Err(RebalError::StateModelViolation(format!(
                    "{}/{} is both placed and reported failed",
                    spec.resource_id, spec.partition_id
                )));
            }
            Some(placements) => {
                let mut placed: Vec<ReplicaState> = placements.iter().map(|p| p.state).collect();
                let mut required = spec.required.clone();
                placed.sort();
                required.sort();
                if placed != required {
                    return Err(RebalError::StateModelViolation(format!(
                        "{}/{} placed as {:?}, state model requires {:?}",
                        spec.resource_id, spec.partition_id, placed, required
                    )));
                }

                let hosts: BTreeSet<_> = placements.iter().map(|p| &p.instance_id).collect();
                if hosts.len() != placements.len() {
                    return Err(RebalError::StateModelViolation(format!(
                        "{}/{} has two replicas on one instance",
                        spec.resource_id, spec.partition_id
                    )));
                }
            }
            None if failed => {}
            None => {
                return Err(RebalError::StateModelViolation(format!(
                    "{}/{} was neither placed nor reported failed",
                    spec.resource_id, spec.partition_id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rebal_core::{ClusterConfig, ClusterSnapshot, InstanceConfig, ResourceConfig};

    fn cluster(topology_aware: bool) -> ClusterConfig {
        ClusterConfig {
            capacity_keys: vec!["cpu".into()],
            topology_aware,
            ..Default::default()
        }
    }

    fn node(id: &str, zone: &str, cpu: u32) -> InstanceConfig {
        InstanceConfig::new(id)
            .with_capacity("cpu", cpu)
            .with_fault_zone(zone)
    }

    fn resource(id: &str, partitions: &[&str], replicas: u32, cpu: u32) -> ResourceConfig {
        let mut config = ResourceConfig::new(id, "MasterSlave")
            .with_replicas(replicas)
            .with_default_capacity("cpu", cpu);
        for p in partitions {
            config = config.with_partition(*p);
        }
        config
    }

    fn run(snapshot: &ClusterSnapshot) -> AssignmentOutcome {
        let model = ClusterModel::from_snapshot(snapshot).unwrap();
        ConstraintBasedAlgorithm::default().calculate(model).unwrap()
    }

    #[test]
    fn test_master_placed_before_slaves() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .live_instance(node("n2", "z2", 10), "s2")
            .resource(resource("R1", &["P1"], 2, 1))
            .build();

        let outcome = run(&snapshot);
        let placements = outcome.result.placements(&"R1".into(), &"P1".into()).unwrap();
        assert_eq!(placements[0].state, ReplicaState::Master);
        assert_eq!(placements[0].instance_id.as_str(), "n1");
        assert_eq!(placements[1].state, ReplicaState::Slave);
        assert_eq!(placements[1].instance_id.as_str(), "n2");
    }

    #[test]
    fn test_topology_failure_when_zones_short() {
        let snapshot = ClusterSnapshot::builder(cluster(true))
            .live_instance(node("n1", "z1", 10), "s1")
            .live_instance(node("n2", "z1", 10), "s2")
            .resource(resource("R1", &["P1"], 2, 1))
            .build();

        let outcome = run(&snapshot);
        assert!(outcome.result.is_empty());
        let failure = outcome.failure(&"R1".into(), &"P1".into()).unwrap();
        assert_eq!(failure.kind, InfeasibilityKind::Topology);
        assert_eq!(failure.state, ReplicaState::Slave);
        // The master was rolled back.
        assert!(outcome.nodes.iter().all(|n| n.assigned_count == 0));
    }

    #[test]
    fn test_disablement_failure() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10).with_enabled(false), "s1")
            .live_instance(node("n2", "z2", 10).with_disabled_partition("R1", "P1"), "s2")
            .resource(resource("R1", &["P1", "P2"], 1, 1))
            .build();

        let outcome = run(&snapshot);
        let failure = outcome.failure(&"R1".into(), &"P1".into()).unwrap();
        assert_eq!(failure.kind, InfeasibilityKind::Disablement);
        assert_eq!(
            outcome.result.placements(&"R1".into(), &"P2".into()).unwrap()[0]
                .instance_id
                .as_str(),
            "n2"
        );
    }

    #[test]
    fn test_cancelled_token_aborts() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .resource(resource("R1", &["P1"], 1, 1))
            .build();
        let model = ClusterModel::from_snapshot(&snapshot).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = ConstraintBasedAlgorithm::default()
            .with_cancellation(token)
            .calculate(model);
        assert!(matches!(result, Err(RebalError::Cancelled(_))));
    }

    #[test]
    fn test_zero_timeout_aborts() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .resource(resource("R1", &["P1"], 1, 1))
            .build();
        let model = ClusterModel::from_snapshot(&snapshot).unwrap();

        let result = ConstraintBasedAlgorithm::default()
            .with_timeout(Duration::ZERO)
            .calculate(model);
        assert!(matches!(result, Err(RebalError::Cancelled(_))));
    }

    #[test]
    fn test_missing_replicas_is_state_model_violation() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .live_instance(node("n2", "z2", 10), "s2")
            .resource(resource("R1", &["P1"], 2, 1))
            .build();
        let mut model = ClusterModel::from_snapshot(&snapshot).unwrap();
        model.replicas.retain(|r| r.is_top_state());

        let result = ConstraintBasedAlgorithm::default().calculate(model);
        assert!(matches!(result, Err(RebalError::StateModelViolation(_))));
    }

    #[test]
    fn test_stray_replica_is_input_inconsistency() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .resource(resource("R1", &["P1"], 1, 1))
            .build();
        let mut model = ClusterModel::from_snapshot(&snapshot).unwrap();
        model.partitions.clear();

        let result = ConstraintBasedAlgorithm::default().calculate(model);
        assert!(matches!(result, Err(RebalError::InputInconsistency(_))));
    }

    #[test]
    fn test_sticky_replica_stays_put() {
        let snapshot = ClusterSnapshot::builder(cluster(false))
            .live_instance(node("n1", "z1", 10), "s1")
            .live_instance(node("n2", "z2", 10), "s2")
            .resource(resource("R1", &["P1"], 1, 1))
            .current_state("n2", "s2", "R1", "P1", ReplicaState::Master)
            .build();

        let outcome = run(&snapshot);
        let placements = outcome.result.placements(&"R1".into(), &"P1".into()).unwrap();
        assert_eq!(placements[0].instance_id.as_str(), "n2");
    }
}
