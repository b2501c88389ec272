//! Cluster model: the nodes, replicas and requirements of one computation
//!
//! Built from a [`ClusterSnapshot`] by pure functions; the snapshot is only
//! borrowed and the resulting model is owned by a single algorithm run.

use rebal_core::{
    ClusterConfig, ClusterSnapshot, InstanceId, PartitionId, RebalError, RebalResult,
    ReplicaState, ResourceId,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::node::AssignableNode;
use crate::placement::Stickiness;
use crate::replica::AssignableReplica;

/// Required states of one partition, top state first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub resource_id: ResourceId,
    pub partition_id: PartitionId,
    pub required: Vec<ReplicaState>,
}

/// Where each partition's replicas are reported today
#[derive(Debug, Clone, Default)]
pub struct CurrentAssignment {
    hosts: BTreeMap<ResourceId, BTreeMap<PartitionId, Vec<(InstanceId, ReplicaState)>>>,
}

impl CurrentAssignment {
    /// Collect live-session current state from a snapshot
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        let mut current = Self::default();
        for report in snapshot.live_current_states() {
            for (partition, &state) in &report.partition_states {
                current.record(
                    report.resource_id.clone(),
                    partition.clone(),
                    report.instance_id.clone(),
                    state,
                );
            }
        }
        current
    }

    pub fn record(
        &mut self,
        resource: ResourceId,
        partition: PartitionId,
        instance: InstanceId,
        state: ReplicaState,
    ) {
        self.hosts
            .entry(resource)
            .or_default()
            .entry(partition)
            .or_default()
            .push((instance, state));
    }

    pub fn hosts(
        &self,
        resource: &ResourceId,
        partition: &PartitionId,
    ) -> &[(InstanceId, ReplicaState)] {
        self.hosts
            .get(resource)
            .and_then(|partitions| partitions.get(partition))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn partitions(&self, resource: &ResourceId) -> impl Iterator<Item = &PartitionId> {
        self.hosts
            .get(resource)
            .into_iter()
            .flat_map(|partitions| partitions.keys())
    }

    /// How `instance` relates to `replica` today
    pub fn stickiness(&self, replica: &AssignableReplica, instance: &InstanceId) -> Stickiness {
        let mut result = Stickiness::None;
        for (host, state) in self.hosts(replica.resource_id(), replica.partition_id()) {
            if host != instance {
                continue;
            }
            if *state == replica.state() {
                return Stickiness::SameState;
            }
            result = Stickiness::Partition;
        }
        result
    }
}

/// Input of one [`crate::ConstraintBasedAlgorithm`] run
#[derive(Debug, Clone)]
pub struct ClusterModel {
    pub cluster: ClusterConfig,
    /// Nodes sorted by instance id
    pub nodes: Vec<AssignableNode>,
    pub replicas: Vec<AssignableReplica>,
    /// Partitions in resource declaration order, then partition order
    pub partitions: Vec<PartitionSpec>,
    pub current: CurrentAssignment,
}

impl ClusterModel {
    /// Derive the full model from a snapshot, failing fast on inconsistent input
    pub fn from_snapshot(snapshot: &ClusterSnapshot) -> RebalResult<Self> {
        let nodes = build_nodes(snapshot)?;
        let current = CurrentAssignment::from_snapshot(snapshot);
        let (replicas, partitions) = build_replicas(snapshot, &current)?;

        debug!(
            nodes = nodes.len(),
            replicas = replicas.len(),
            partitions = partitions.len(),
            "Cluster model built"
        );

        Ok(Self {
            cluster: snapshot.cluster.clone(),
            nodes,
            replicas,
            partitions,
            current,
        })
    }
}

/// One ledger per live instance that has a configuration
pub fn build_nodes(snapshot: &ClusterSnapshot) -> RebalResult<Vec<AssignableNode>> {
    let mut nodes = Vec::with_capacity(snapshot.live_instances.len());
    for instance_id in snapshot.live_instances.keys() {
        let Some(config) = snapshot.instances.get(instance_id) else {
            warn!(instance = %instance_id, "Live instance has no configuration, skipping");
            continue;
        };
        if &config.instance_id != instance_id {
            return Err(RebalError::InputInconsistency(format!(
                "instance config keyed '{}' names instance '{}'",
                instance_id, config.instance_id
            )));
        }
        nodes.push(AssignableNode::new(&snapshot.cluster, config)?);
    }
    Ok(nodes)
}

/// One replica per required (partition, state) slot of every resource
pub fn build_replicas(
    snapshot: &ClusterSnapshot,
    current: &CurrentAssignment,
) -> RebalResult<(Vec<AssignableReplica>, Vec<PartitionSpec>)> {
    let mut replicas = Vec::new();
    let mut specs = Vec::new();
    let mut seen: BTreeSet<&ResourceId> = BTreeSet::new();

    for resource in &snapshot.resources {
        if !seen.insert(&resource.resource_id) {
            return Err(RebalError::InputInconsistency(format!(
                "resource '{}' declared more than once",
                resource.resource_id
            )));
        }

        let model = snapshot.state_model(&resource.state_model).map_err(|_| {
            RebalError::InputInconsistency(format!(
                "resource '{}' references unregistered state model '{}'",
                resource.resource_id, resource.state_model
            ))
        })?;

        let mut partitions = resource.partitions.clone();
        let declared: BTreeSet<&PartitionId> = resource.partitions.iter().collect();
        if declared.len() != partitions.len() {
            return Err(RebalError::InputInconsistency(format!(
                "resource '{}' declares a partition more than once",
                resource.resource_id
            )));
        }
        let observed: BTreeSet<&PartitionId> = current
            .partitions(&resource.resource_id)
            .filter(|p| !declared.contains(p))
            .collect();
        partitions.extend(observed.into_iter().cloned());

        if partitions.is_empty() {
            warn!(resource = %resource.resource_id, "Resource has no partitions, skipping");
            continue;
        }

        let mut observed_replicas = 0u32;
        for partition in &partitions {
            let hosts = current.hosts(&resource.resource_id, partition);
            if let Some((instance, state)) = hosts.iter().find(|(_, s)| !model.knows(*s)) {
                return Err(RebalError::InputInconsistency(format!(
                    "instance '{}' reports {}/{} in state {} unknown to state model '{}'",
                    instance, resource.resource_id, partition, state, model.name
                )));
            }
            let placed = hosts
                .iter()
                .filter(|(_, s)| model.is_placed_state(*s))
                .count() as u32;
            observed_replicas = observed_replicas.max(placed);
        }

        let replica_count = resource.replicas.unwrap_or(observed_replicas.max(1));
        let required = model.requirement(replica_count).map_err(|e| match e {
            RebalError::InputInconsistency(msg) => RebalError::InputInconsistency(format!(
                "resource '{}': {}",
                resource.resource_id, msg
            )),
            other => other,
        })?;

        for partition in partitions {
            for (index, &state) in required.iter().enumerate() {
                replicas.push(AssignableReplica::new(
                    &snapshot.cluster,
                    resource,
                    partition.clone(),
                    state,
                    model.is_top_state(state),
                    index as u32,
                )?);
            }
            specs.push(PartitionSpec {
                resource_id: resource.resource_id.clone(),
                partition_id: partition,
                required: required.clone(),
            });
        }

        debug!(
            resource = %resource.resource_id,
            state_model = %model.name,
            replicas_per_partition = replica_count,
            "Replicas built"
        );
    }

    Ok((replicas, specs))
}
