//! Replicas waiting for placement

use rebal_core::{
    CapacityKey, CapacityMap, ClusterConfig, PartitionId, RebalError, RebalResult, ReplicaState,
    ResourceConfig, ResourceId,
};

/// One replica of one partition in one state, with its capacity demand
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignableReplica {
    resource_id: ResourceId,
    partition_id: PartitionId,
    state: ReplicaState,
    top_state: bool,
    /// Position within the partition's expanded requirement; 0 is the top state
    replica_index: u32,
    demand: CapacityMap,
    instance_group_tag: Option<String>,
}

impl AssignableReplica {
    /// Build a replica, resolving its demand for every cluster capacity dimension
    pub fn new(
        cluster: &ClusterConfig,
        resource: &ResourceConfig,
        partition_id: PartitionId,
        state: ReplicaState,
        top_state: bool,
        replica_index: u32,
    ) -> RebalResult<Self> {
        if let Some(key) = resource
            .referenced_capacity_keys()
            .into_iter()
            .find(|key| !cluster.has_capacity_key(key))
        {
            return Err(RebalError::InputInconsistency(format!(
                "resource '{}' declares demand for unknown capacity dimension '{}'",
                resource.resource_id, key
            )));
        }

        let demand = cluster
            .capacity_keys
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    resource.partition_weight(cluster, &partition_id, key),
                )
            })
            .collect();

        Ok(Self {
            resource_id: resource.resource_id.clone(),
            partition_id,
            state,
            top_state,
            replica_index,
            demand,
            instance_group_tag: resource.instance_group_tag.clone(),
        })
    }

    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }

    pub fn partition_id(&self) -> &PartitionId {
        &self.partition_id
    }

    pub fn state(&self) -> ReplicaState {
        self.state
    }

    pub fn is_top_state(&self) -> bool {
        self.top_state
    }

    pub fn replica_index(&self) -> u32 {
        self.replica_index
    }

    pub fn instance_group_tag(&self) -> Option<&str> {
        self.instance_group_tag.as_deref()
    }

    /// Demand in one dimension; zero for dimensions the cluster does not define
    pub fn demand(&self, key: &CapacityKey) -> u32 {
        self.demand.get(key).copied().unwrap_or(0)
    }

    pub fn demand_vector(&self) -> &CapacityMap {
        &self.demand
    }
}

impl std::fmt::Display for AssignableReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.resource_id, self.partition_id, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            capacity_keys: vec!["item1".into(), "item2".into(), "item3".into()],
            default_partition_weight: [(CapacityKey::from("item3"), 1)].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_demand_resolution() {
        let resource = ResourceConfig::new("Resource1", "MasterSlave")
            .with_default_capacity("item1", 3)
            .with_default_capacity("item2", 6)
            .with_partition_capacity("Partition2", "item1", 4);

        let p1 = AssignableReplica::new(
            &cluster(),
            &resource,
            "Partition1".into(),
            ReplicaState::Master,
            true,
            0,
        )
        .unwrap();
        assert_eq!(p1.demand(&"item1".into()), 3);
        assert_eq!(p1.demand(&"item2".into()), 6);
        assert_eq!(p1.demand(&"item3".into()), 1);
        assert!(p1.is_top_state());
        assert_eq!(p1.to_string(), "Resource1/Partition1/MASTER");

        let p2 = AssignableReplica::new(
            &cluster(),
            &resource,
            "Partition2".into(),
            ReplicaState::Slave,
            false,
            1,
        )
        .unwrap();
        assert_eq!(p2.demand(&"item1".into()), 4);
        assert_eq!(p2.demand(&"item2".into()), 6);
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let resource = ResourceConfig::new("Resource1", "MasterSlave").with_default_capacity("gpu", 1);
        let err = AssignableReplica::new(
            &cluster(),
            &resource,
            "Partition1".into(),
            ReplicaState::Master,
            true,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, RebalError::InputInconsistency(_)));
    }
}
