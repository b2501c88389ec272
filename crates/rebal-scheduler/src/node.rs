//! Per-instance capacity ledger

use rebal_core::{
    CapacityKey, CapacityMap, ClusterConfig, FaultZoneId, InstanceConfig, InstanceId, PartitionId,
    RebalError, RebalResult, ReplicaState, ResourceId,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::replica::AssignableReplica;

/// Why a node refused a replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Instance is disabled
    InstanceDisabled,
    /// The replica's partition is disabled on this instance
    PartitionDisabled,
    /// Instance lacks the resource's instance-group tag
    MissingTag(String),
    /// Instance already hosts a replica of this partition
    PartitionAlreadyHosted,
    /// Instance hosts the configured maximum number of replicas
    PartitionLimit(u32),
    /// Not enough remaining capacity in a dimension
    InsufficientCapacity {
        key: CapacityKey,
        remaining: u32,
        demand: u32,
    },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InstanceDisabled => write!(f, "instance disabled"),
            Rejection::PartitionDisabled => write!(f, "partition disabled on instance"),
            Rejection::MissingTag(tag) => write!(f, "missing instance group tag '{}'", tag),
            Rejection::PartitionAlreadyHosted => write!(f, "partition already hosted"),
            Rejection::PartitionLimit(max) => write!(f, "partition limit {} reached", max),
            Rejection::InsufficientCapacity {
                key,
                remaining,
                demand,
            } => write!(
                f,
                "insufficient {}: remaining {}, demand {}",
                key, remaining, demand
            ),
        }
    }
}

/// Capacity ledger of one live instance
///
/// Owned by a single computation; `assign` and `release` only touch this ledger.
#[derive(Debug, Clone)]
pub struct AssignableNode {
    instance_id: InstanceId,
    fault_zone: FaultZoneId,
    tags: BTreeSet<String>,
    enabled: bool,
    total: CapacityMap,
    remaining: CapacityMap,
    max_partitions: Option<u32>,
    disabled_partitions: BTreeMap<ResourceId, BTreeSet<PartitionId>>,
    assigned: BTreeMap<ResourceId, BTreeMap<PartitionId, ReplicaState>>,
    assigned_count: u32,
}

impl AssignableNode {
    /// Build a ledger from cluster and instance configuration
    pub fn new(cluster: &ClusterConfig, config: &InstanceConfig) -> RebalResult<Self> {
        if let Some(key) = config
            .capacity
            .keys()
            .find(|key| !cluster.has_capacity_key(key))
        {
            return Err(RebalError::InputInconsistency(format!(
                "instance '{}' declares unknown capacity dimension '{}'",
                config.instance_id, key
            )));
        }

        let mut total = CapacityMap::new();
        for key in &cluster.capacity_keys {
            let amount = config
                .capacity
                .get(key)
                .or_else(|| cluster.default_instance_capacity.get(key))
                .copied()
                .ok_or_else(|| {
                    RebalError::InputInconsistency(format!(
                        "instance '{}' has no capacity for dimension '{}' and the cluster has no default",
                        config.instance_id, key
                    ))
                })?;
            total.insert(key.clone(), amount);
        }

        let enabled = config.enabled && !cluster.disabled_instances.contains(&config.instance_id);

        Ok(Self {
            instance_id: config.instance_id.clone(),
            fault_zone: config.fault_zone_id(),
            tags: config.tags.clone(),
            enabled,
            remaining: total.clone(),
            total,
            max_partitions: cluster.max_partitions_per_instance,
            disabled_partitions: config.disabled_partitions.clone(),
            assigned: BTreeMap::new(),
            assigned_count: 0,
        })
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn fault_zone_id(&self) -> &FaultZoneId {
        &self.fault_zone
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_partitions(&self) -> Option<u32> {
        self.max_partitions
    }

    pub fn remaining_capacity(&self, key: &CapacityKey) -> u32 {
        self.remaining.get(key).copied().unwrap_or(0)
    }

    pub fn total_capacity(&self, key: &CapacityKey) -> u32 {
        self.total.get(key).copied().unwrap_or(0)
    }

    pub fn remaining_capacity_map(&self) -> &CapacityMap {
        &self.remaining
    }

    pub fn total_capacity_map(&self) -> &CapacityMap {
        &self.total
    }

    /// Number of replicas currently on this node
    pub fn assigned_count(&self) -> u32 {
        self.assigned_count
    }

    /// State in which this node hosts the partition, if it does
    pub fn hosts_partition(
        &self,
        resource: &ResourceId,
        partition: &PartitionId,
    ) -> Option<ReplicaState> {
        self.assigned
            .get(resource)
            .and_then(|partitions| partitions.get(partition))
            .copied()
    }

    /// First reason this node cannot take `replica`, if any
    pub fn check(&self, replica: &AssignableReplica) -> Result<(), Rejection> {
        if !self.enabled {
            return Err(Rejection::InstanceDisabled);
        }

        let partition_disabled = self
            .disabled_partitions
            .get(replica.resource_id())
            .is_some_and(|partitions| partitions.contains(replica.partition_id()));
        if partition_disabled {
            return Err(Rejection::PartitionDisabled);
        }

        if let Some(tag) = replica.instance_group_tag() {
            if !self.tags.contains(tag) {
                return Err(Rejection::MissingTag(tag.to_string()));
            }
        }

        if self
            .hosts_partition(replica.resource_id(), replica.partition_id())
            .is_some()
        {
            return Err(Rejection::PartitionAlreadyHosted);
        }

        if let Some(max) = self.max_partitions {
            if self.assigned_count >= max {
                return Err(Rejection::PartitionLimit(max));
            }
        }

        for (key, &demand) in replica.demand_vector() {
            let remaining = self.remaining_capacity(key);
            if demand > remaining {
                return Err(Rejection::InsufficientCapacity {
                    key: key.clone(),
                    remaining,
                    demand,
                });
            }
        }

        Ok(())
    }

    pub fn can_accommodate(&self, replica: &AssignableReplica) -> bool {
        self.check(replica).is_ok()
    }

    /// Commit a replica to this node
    pub fn assign(&mut self, replica: &AssignableReplica) -> RebalResult<()> {
        self.check(replica).map_err(|rejection| {
            RebalError::Capacity(format!(
                "instance '{}' cannot take {}: {}",
                self.instance_id, replica, rejection
            ))
        })?;

        for (key, &demand) in replica.demand_vector() {
            if let Some(remaining) = self.remaining.get_mut(key) {
                *remaining -= demand;
            }
        }

        self.assigned
            .entry(replica.resource_id().clone())
            .or_default()
            .insert(replica.partition_id().clone(), replica.state());
        self.assigned_count += 1;

        debug!(
            instance = %self.instance_id,
            replica = %replica,
            assigned = self.assigned_count,
            "Replica assigned"
        );

        Ok(())
    }

    /// Undo a previous `assign`
    pub fn release(&mut self, replica: &AssignableReplica) -> RebalResult<()> {
        let hosted = self.hosts_partition(replica.resource_id(), replica.partition_id());
        if hosted != Some(replica.state()) {
            return Err(RebalError::Capacity(format!(
                "instance '{}' does not host {}",
                self.instance_id, replica
            )));
        }

        if let Some(partitions) = self.assigned.get_mut(replica.resource_id()) {
            partitions.remove(replica.partition_id());
            if partitions.is_empty() {
                self.assigned.remove(replica.resource_id());
            }
        }
        self.assigned_count -= 1;

        for (key, &demand) in replica.demand_vector() {
            let total = self.total_capacity(key);
            if let Some(remaining) = self.remaining.get_mut(key) {
                *remaining = remaining.saturating_add(demand).min(total);
            }
        }

        debug!(
            instance = %self.instance_id,
            replica = %replica,
            "Replica released"
        );

        Ok(())
    }
}
