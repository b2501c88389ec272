//! Point-in-time view of the cluster handed to the placement engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    BuiltInStateModel, ClusterConfig, InstanceConfig, InstanceId, PartitionId, RebalError,
    RebalResult, ReplicaState, ResourceConfig, ResourceId, SessionId, StateModelDefinition,
};

/// States one instance reports for the partitions of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    pub instance_id: InstanceId,
    /// Session the report was written under
    pub session_id: SessionId,
    pub resource_id: ResourceId,
    pub partition_states: BTreeMap<PartitionId, ReplicaState>,
}

/// Immutable cluster snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, InstanceConfig>,
    /// Live instances and their current session
    #[serde(default)]
    pub live_instances: BTreeMap<InstanceId, SessionId>,
    #[serde(default)]
    pub current_states: Vec<CurrentState>,
    /// Resources in declaration order
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Registered state models by name
    #[serde(default)]
    pub state_models: BTreeMap<String, StateModelDefinition>,
}

impl ClusterSnapshot {
    /// Start building a snapshot
    pub fn builder(cluster: ClusterConfig) -> SnapshotBuilder {
        SnapshotBuilder::new(cluster)
    }

    /// Parse a JSON snapshot
    pub fn from_json(content: &str) -> RebalResult<Self> {
        Ok(serde_json::from_str::<Self>(content)?.with_builtin_state_models())
    }

    /// Parse a TOML snapshot
    pub fn from_toml(content: &str) -> RebalResult<Self> {
        Ok(toml::from_str::<Self>(content)?.with_builtin_state_models())
    }

    /// Load a snapshot file; `.toml` files are TOML, anything else JSON
    pub fn from_file(path: &std::path::Path) -> RebalResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    fn with_builtin_state_models(mut self) -> Self {
        for model in BuiltInStateModel::ALL {
            self.state_models
                .entry(model.name().to_string())
                .or_insert_with(|| model.definition());
        }
        self
    }

    pub fn resource(&self, id: &ResourceId) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| &r.resource_id == id)
    }

    pub fn state_model(&self, name: &str) -> RebalResult<&StateModelDefinition> {
        self.state_models.get(name).ok_or_else(|| {
            RebalError::InputInconsistency(format!("no state model registered as '{}'", name))
        })
    }

    /// Whether a current-state report belongs to the instance's live session
    pub fn is_live_report(&self, report: &CurrentState) -> bool {
        self.live_instances.get(&report.instance_id) == Some(&report.session_id)
    }

    /// Current-state reports written under a live session
    pub fn live_current_states(&self) -> impl Iterator<Item = &CurrentState> {
        self.current_states
            .iter()
            .filter(move |report| self.is_live_report(report))
    }
}

/// Builds a [`ClusterSnapshot`] in one step
///
/// Setters consume and return the builder; the snapshot only exists once
/// [`SnapshotBuilder::build`] is called.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    snapshot: ClusterSnapshot,
}

impl SnapshotBuilder {
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            snapshot: ClusterSnapshot {
                cluster,
                instances: BTreeMap::new(),
                live_instances: BTreeMap::new(),
                current_states: Vec::new(),
                resources: Vec::new(),
                state_models: BTreeMap::new(),
            },
        }
    }

    /// Add an instance configuration
    pub fn instance(mut self, config: InstanceConfig) -> Self {
        self.snapshot
            .instances
            .insert(config.instance_id.clone(), config);
        self
    }

    /// Mark an instance live under a session
    pub fn live(mut self, instance: impl Into<InstanceId>, session: impl Into<SessionId>) -> Self {
        self.snapshot
            .live_instances
            .insert(instance.into(), session.into());
        self
    }

    /// Add an instance configuration and mark it live
    pub fn live_instance(self, config: InstanceConfig, session: impl Into<SessionId>) -> Self {
        let id = config.instance_id.clone();
        self.instance(config).live(id, session)
    }

    /// Declare a resource; declaration order is preserved
    pub fn resource(mut self, config: ResourceConfig) -> Self {
        self.snapshot
            .resources
            .retain(|r| r.resource_id != config.resource_id);
        self.snapshot.resources.push(config);
        self
    }

    /// Record the state an instance reports for one partition
    pub fn current_state(
        mut self,
        instance: impl Into<InstanceId>,
        session: impl Into<SessionId>,
        resource: impl Into<ResourceId>,
        partition: impl Into<PartitionId>,
        state: ReplicaState,
    ) -> Self {
        let instance = instance.into();
        let session = session.into();
        let resource = resource.into();

        let existing = self.snapshot.current_states.iter_mut().find(|cs| {
            cs.instance_id == instance && cs.session_id == session && cs.resource_id == resource
        });
        match existing {
            Some(report) => {
                report.partition_states.insert(partition.into(), state);
            }
            None => self.snapshot.current_states.push(CurrentState {
                instance_id: instance,
                session_id: session,
                resource_id: resource,
                partition_states: [(partition.into(), state)].into_iter().collect(),
            }),
        }
        self
    }

    /// Register a custom state model definition
    pub fn state_model(mut self, definition: StateModelDefinition) -> Self {
        self.snapshot
            .state_models
            .insert(definition.name.clone(), definition);
        self
    }

    pub fn build(self) -> ClusterSnapshot {
        let snapshot = self.snapshot.with_builtin_state_models();
        debug!(
            instances = snapshot.instances.len(),
            live = snapshot.live_instances.len(),
            resources = snapshot.resources.len(),
            "Snapshot built"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            capacity_keys: vec!["item1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_builder_registers_builtin_models() {
        let snapshot = ClusterSnapshot::builder(cluster()).build();
        assert!(snapshot.state_model("MasterSlave").is_ok());
        assert!(snapshot.state_model("LeaderStandby").is_ok());
        assert!(matches!(
            snapshot.state_model("Unknown"),
            Err(RebalError::InputInconsistency(_))
        ));
    }

    #[test]
    fn test_current_state_groups_by_instance_session_resource() {
        let snapshot = ClusterSnapshot::builder(cluster())
            .live_instance(InstanceConfig::new("node-1"), "s1")
            .current_state("node-1", "s1", "Resource1", "P1", ReplicaState::Master)
            .current_state("node-1", "s1", "Resource1", "P2", ReplicaState::Slave)
            .current_state("node-1", "s0", "Resource1", "P3", ReplicaState::Slave)
            .build();

        assert_eq!(snapshot.current_states.len(), 2);
        let live: Vec<_> = snapshot.live_current_states().collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].partition_states.len(), 2);
    }

    #[test]
    fn test_resource_redeclaration_replaces() {
        let snapshot = ClusterSnapshot::builder(cluster())
            .resource(ResourceConfig::new("A", "MasterSlave"))
            .resource(ResourceConfig::new("B", "MasterSlave"))
            .resource(ResourceConfig::new("A", "LeaderStandby"))
            .build();

        let names: Vec<_> = snapshot
            .resources
            .iter()
            .map(|r| r.resource_id.as_str())
            .collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(
            snapshot.resource(&ResourceId::from("A")).unwrap().state_model,
            "LeaderStandby"
        );
    }

    #[test]
    fn test_snapshot_from_json() {
        let json = r#"{
            "cluster": { "capacity_keys": ["item1"], "topology_aware": true },
            "instances": {
                "node-1": { "instance_id": "node-1", "capacity": { "item1": 10 } }
            },
            "live_instances": { "node-1": "s1" },
            "resources": [
                { "resource_id": "R1", "state_model": "MasterSlave", "partitions": ["P1"] }
            ]
        }"#;
        let snapshot = ClusterSnapshot::from_json(json).unwrap();
        assert!(snapshot.cluster.topology_aware);
        assert_eq!(snapshot.resources.len(), 1);
        assert!(snapshot.state_model("MasterSlave").is_ok());
    }

    #[test]
    fn test_snapshot_from_toml() {
        let toml_str = r#"
[cluster]
capacity_keys = ["item1"]
max_partitions_per_instance = 5

[instances.node-1]
instance_id = "node-1"
capacity = { item1 = 20 }

[live_instances]
node-1 = "s1"

[[resources]]
resource_id = "R1"
state_model = "LeaderStandby"
partitions = ["P1", "P2"]
replicas = 2
default_capacity = { item1 = 3 }
"#;
        let snapshot = ClusterSnapshot::from_toml(toml_str).unwrap();
        assert_eq!(snapshot.cluster.max_partitions_per_instance, Some(5));
        assert_eq!(snapshot.resources[0].replicas, Some(2));
    }
}
