//! Assignment results and failure reporting

use chrono::{DateTime, Utc};
use rebal_core::{
    CapacityMap, FaultZoneId, InstanceId, PartitionId, ReplicaState, ResourceId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::node::AssignableNode;

/// One replica's chosen node and role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    pub instance_id: InstanceId,
    pub state: ReplicaState,
}

/// Replica placements per resource and partition
///
/// Only fully satisfied partitions appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentResult {
    assignments: BTreeMap<ResourceId, BTreeMap<PartitionId, Vec<ReplicaPlacement>>>,
}

impl AssignmentResult {
    pub(crate) fn insert(
        &mut self,
        resource: ResourceId,
        partition: PartitionId,
        placements: Vec<ReplicaPlacement>,
    ) {
        self.assignments
            .entry(resource)
            .or_default()
            .insert(partition, placements);
    }

    /// Placements of one partition, top state first
    pub fn placements(
        &self,
        resource: &ResourceId,
        partition: &PartitionId,
    ) -> Option<&[ReplicaPlacement]> {
        self.assignments
            .get(resource)
            .and_then(|partitions| partitions.get(partition))
            .map(Vec::as_slice)
    }

    pub fn resource(
        &self,
        resource: &ResourceId,
    ) -> Option<&BTreeMap<PartitionId, Vec<ReplicaPlacement>>> {
        self.assignments.get(resource)
    }

    /// All placed partitions as (resource, partition, placements)
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&ResourceId, &PartitionId, &[ReplicaPlacement])> {
        self.assignments.iter().flat_map(|(resource, partitions)| {
            partitions
                .iter()
                .map(move |(partition, placements)| (resource, partition, placements.as_slice()))
        })
    }

    pub fn partition_count(&self) -> usize {
        self.assignments.values().map(BTreeMap::len).sum()
    }

    pub fn replica_count(&self) -> usize {
        self.iter().map(|(_, _, placements)| placements.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Replicas placed on one instance
    pub fn replicas_on(
        &self,
        instance: &InstanceId,
    ) -> Vec<(&ResourceId, &PartitionId, ReplicaState)> {
        self.iter()
            .flat_map(|(resource, partition, placements)| {
                placements
                    .iter()
                    .filter(|p| &p.instance_id == instance)
                    .map(move |p| (resource, partition, p.state))
            })
            .collect()
    }
}

/// Root cause of an unplaceable replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfeasibilityKind {
    /// No eligible node has enough remaining capacity
    Capacity,
    /// Capacity exists but fault-zone or per-node diversity cannot be met
    Topology,
    /// Every node is disabled for this replica
    Disablement,
}

impl std::fmt::Display for InfeasibilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfeasibilityKind::Capacity => write!(f, "CapacityInfeasible"),
            InfeasibilityKind::Topology => write!(f, "TopologyInfeasible"),
            InfeasibilityKind::Disablement => write!(f, "DisablementInfeasible"),
        }
    }
}

/// A partition that could not be fully placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementFailure {
    pub resource_id: ResourceId,
    pub partition_id: PartitionId,
    /// State of the first replica that found no node
    pub state: ReplicaState,
    pub kind: InfeasibilityKind,
    /// Per-node rejection summary
    pub detail: String,
}

impl std::fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{}/{}: {}",
            self.kind, self.resource_id, self.partition_id, self.state, self.detail
        )
    }
}

/// A node's ledger after the computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLedger {
    pub instance_id: InstanceId,
    pub fault_zone: FaultZoneId,
    pub enabled: bool,
    pub total: CapacityMap,
    pub remaining: CapacityMap,
    pub assigned_count: u32,
}

impl From<&AssignableNode> for NodeLedger {
    fn from(node: &AssignableNode) -> Self {
        Self {
            instance_id: node.instance_id().clone(),
            fault_zone: node.fault_zone_id().clone(),
            enabled: node.is_enabled(),
            total: node.total_capacity_map().clone(),
            remaining: node.remaining_capacity_map().clone(),
            assigned_count: node.assigned_count(),
        }
    }
}

/// Everything one rebalance computation produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentOutcome {
    /// Correlates the log lines of one computation
    pub run_id: Uuid,
    pub computed_at: DateTime<Utc>,
    /// Order in which resources were placed
    pub resource_order: Vec<ResourceId>,
    pub result: AssignmentResult,
    pub failures: Vec<PlacementFailure>,
    pub nodes: Vec<NodeLedger>,
}

impl AssignmentOutcome {
    /// Whether every partition was placed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(
        &self,
        resource: &ResourceId,
        partition: &PartitionId,
    ) -> Option<&PlacementFailure> {
        self.failures
            .iter()
            .find(|f| &f.resource_id == resource && &f.partition_id == partition)
    }

    pub fn node(&self, instance: &InstanceId) -> Option<&NodeLedger> {
        self.nodes.iter().find(|n| &n.instance_id == instance)
    }
}
