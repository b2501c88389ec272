//! Configuration types for rebal
//!
//! Cluster, instance and resource configuration describe the cluster being
//! balanced and arrive inside a [`crate::ClusterSnapshot`]. [`EngineConfig`]
//! tunes the engine itself and is read from a TOML file.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{CapacityKey, FaultZoneId, InstanceId, PartitionId, ResourceId};

/// Amount per capacity dimension
pub type CapacityMap = BTreeMap<CapacityKey, u32>;

/// Cluster-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Capacity dimensions, in order; every node and replica map is keyed by a subset
    pub capacity_keys: Vec<CapacityKey>,
    /// Partition weight used when a resource does not state one for a dimension
    #[serde(default)]
    pub default_partition_weight: CapacityMap,
    /// Instance capacity used when an instance does not state one for a dimension
    #[serde(default)]
    pub default_instance_capacity: CapacityMap,
    /// Maximum replicas a single instance may host (unlimited when absent)
    #[serde(default)]
    pub max_partitions_per_instance: Option<u32>,
    /// Instances that accept no new assignments
    #[serde(default)]
    pub disabled_instances: BTreeSet<InstanceId>,
    /// Keep replicas of a partition in distinct fault zones
    #[serde(default)]
    pub topology_aware: bool,
}

impl ClusterConfig {
    /// Whether `key` is one of the configured capacity dimensions
    pub fn has_capacity_key(&self, key: &CapacityKey) -> bool {
        self.capacity_keys.contains(key)
    }
}

/// Per-instance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: InstanceId,
    /// Total capacity per dimension
    #[serde(default)]
    pub capacity: CapacityMap,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Fault zone; the instance id stands in when unset
    #[serde(default)]
    pub fault_zone: Option<FaultZoneId>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Partitions this instance must not host, per resource
    #[serde(default)]
    pub disabled_partitions: BTreeMap<ResourceId, BTreeSet<PartitionId>>,
}

fn default_true() -> bool {
    true
}

impl InstanceConfig {
    /// Create an enabled instance with no capacity, tags or zone
    pub fn new(instance_id: impl Into<InstanceId>) -> Self {
        Self {
            instance_id: instance_id.into(),
            capacity: CapacityMap::new(),
            tags: BTreeSet::new(),
            fault_zone: None,
            enabled: true,
            disabled_partitions: BTreeMap::new(),
        }
    }

    pub fn with_capacity(mut self, key: impl Into<CapacityKey>, amount: u32) -> Self {
        self.capacity.insert(key.into(), amount);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_fault_zone(mut self, zone: impl Into<FaultZoneId>) -> Self {
        self.fault_zone = Some(zone.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_disabled_partition(
        mut self,
        resource: impl Into<ResourceId>,
        partition: impl Into<PartitionId>,
    ) -> Self {
        self.disabled_partitions
            .entry(resource.into())
            .or_default()
            .insert(partition.into());
        self
    }

    /// Effective fault zone
    pub fn fault_zone_id(&self) -> FaultZoneId {
        self.fault_zone
            .clone()
            .unwrap_or_else(|| FaultZoneId::new(self.instance_id.as_str()))
    }
}

/// Per-resource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub resource_id: ResourceId,
    /// Name of the state model definition
    pub state_model: String,
    /// Declared partitions, in placement order
    #[serde(default)]
    pub partitions: Vec<PartitionId>,
    /// Replicas per partition; inferred from current state when absent
    #[serde(default)]
    pub replicas: Option<u32>,
    /// Only instances carrying this tag may host the resource
    #[serde(default)]
    pub instance_group_tag: Option<String>,
    /// Demand of any partition without its own entry
    #[serde(default)]
    pub default_capacity: Option<CapacityMap>,
    /// Demand of specific partitions
    #[serde(default)]
    pub partition_capacity: BTreeMap<PartitionId, CapacityMap>,
}

impl ResourceConfig {
    pub fn new(resource_id: impl Into<ResourceId>, state_model: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            state_model: state_model.into(),
            partitions: Vec::new(),
            replicas: None,
            instance_group_tag: None,
            default_capacity: None,
            partition_capacity: BTreeMap::new(),
        }
    }

    pub fn with_partition(mut self, partition: impl Into<PartitionId>) -> Self {
        self.partitions.push(partition.into());
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = Some(replicas);
        self
    }

    pub fn with_instance_group_tag(mut self, tag: impl Into<String>) -> Self {
        self.instance_group_tag = Some(tag.into());
        self
    }

    pub fn with_default_capacity(mut self, key: impl Into<CapacityKey>, amount: u32) -> Self {
        self.default_capacity
            .get_or_insert_with(CapacityMap::new)
            .insert(key.into(), amount);
        self
    }

    pub fn with_partition_capacity(
        mut self,
        partition: impl Into<PartitionId>,
        key: impl Into<CapacityKey>,
        amount: u32,
    ) -> Self {
        self.partition_capacity
            .entry(partition.into())
            .or_default()
            .insert(key.into(), amount);
        self
    }

    /// Demand of one partition in one dimension.
    ///
    /// Resolution order: the partition's own entry, the resource default,
    /// the cluster default weight, zero.
    pub fn partition_weight(
        &self,
        cluster: &ClusterConfig,
        partition: &PartitionId,
        key: &CapacityKey,
    ) -> u32 {
        self.partition_capacity
            .get(partition)
            .and_then(|m| m.get(key))
            .or_else(|| self.default_capacity.as_ref().and_then(|m| m.get(key)))
            .or_else(|| cluster.default_partition_weight.get(key))
            .copied()
            .unwrap_or(0)
    }

    /// Every capacity key this resource mentions
    pub fn referenced_capacity_keys(&self) -> BTreeSet<&CapacityKey> {
        self.partition_capacity
            .values()
            .chain(self.default_capacity.iter())
            .flat_map(|m| m.keys())
            .collect()
    }
}

/// Engine configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Placement configuration
    #[serde(default)]
    pub placement: PlacementConfig,
    /// Scoring weights
    #[serde(default)]
    pub scoring: ScoringWeights,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::RebalError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::RebalError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::RebalError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Placement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Order in which resources are placed
    pub resource_order: ResourceOrder,
    /// Abandon a computation that runs longer than this
    pub timeout_ms: Option<u64>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            resource_order: ResourceOrder::LargestFirst,
            timeout_ms: None,
        }
    }
}

/// Resource ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceOrder {
    /// Largest normalized total demand first
    LargestFirst,
    /// Snapshot declaration order
    Declared,
}

impl std::fmt::Display for ResourceOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceOrder::LargestFirst => write!(f, "largest-first"),
            ResourceOrder::Declared => write!(f, "declared"),
        }
    }
}

impl std::str::FromStr for ResourceOrder {
    type Err = crate::RebalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "largest-first" => Ok(ResourceOrder::LargestFirst),
            "declared" => Ok(ResourceOrder::Declared),
            other => Err(crate::RebalError::Config(format!(
                "unknown resource order '{}'",
                other
            ))),
        }
    }
}

/// Weights for node scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    /// Remaining headroom after the hypothetical assignment
    pub headroom: f64,
    /// Fewer replicas already on the node
    pub spread: f64,
    /// Node already reports the replica
    pub stickiness: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            headroom: 1.0,
            spread: 0.5,
            stickiness: 0.25,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
