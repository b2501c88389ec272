//! Property tests over randomly generated clusters

use proptest::prelude::*;
use rebal_core::{
    CapacityKey, ClusterConfig, ClusterSnapshot, InstanceConfig, ReplicaState, ResourceConfig,
};
use rebal_scheduler::{AssignmentOutcome, Scheduler};
use std::collections::{BTreeMap, BTreeSet};

const KEYS: [&str; 2] = ["cpu", "mem"];

#[derive(Debug, Clone)]
struct NodeParams {
    cpu: u32,
    mem: u32,
    zone: u8,
    enabled: bool,
    disabled_partition: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
struct ResourceParams {
    partitions: usize,
    replicas: u32,
    cpu: u32,
    mem: u32,
}

fn node_strategy() -> impl Strategy<Value = NodeParams> {
    (
        0u32..=20,
        0u32..=20,
        0u8..3,
        prop::bool::weighted(0.85),
        prop::option::of((0usize..4, 0usize..4)),
    )
        .prop_map(|(cpu, mem, zone, enabled, disabled_partition)| NodeParams {
            cpu,
            mem,
            zone,
            enabled,
            disabled_partition,
        })
}

fn resource_strategy() -> impl Strategy<Value = ResourceParams> {
    (1usize..=4, 1u32..=3, 0u32..=5, 0u32..=5).prop_map(|(partitions, replicas, cpu, mem)| {
        ResourceParams {
            partitions,
            replicas,
            cpu,
            mem,
        }
    })
}

fn snapshot_strategy() -> impl Strategy<Value = (ClusterSnapshot, Vec<ResourceParams>)> {
    (
        proptest::collection::vec(node_strategy(), 1..=5),
        proptest::collection::vec(resource_strategy(), 1..=4),
        any::<bool>(),
    )
        .prop_map(|(nodes, resources, topology_aware)| {
            let cluster = ClusterConfig {
                capacity_keys: KEYS.iter().map(|k| CapacityKey::from(*k)).collect(),
                topology_aware,
                ..Default::default()
            };
            let mut builder = ClusterSnapshot::builder(cluster);

            for (i, node) in nodes.iter().enumerate() {
                let mut config = InstanceConfig::new(format!("node-{}", i))
                    .with_capacity("cpu", node.cpu)
                    .with_capacity("mem", node.mem)
                    .with_fault_zone(format!("zone-{}", node.zone))
                    .with_enabled(node.enabled);
                if let Some((r, p)) = node.disabled_partition {
                    config = config.with_disabled_partition(resource_id(r), partition_id(r, p));
                }
                builder = builder.live_instance(config, format!("session-{}", i));
            }

            for (r, params) in resources.iter().enumerate() {
                let mut resource = ResourceConfig::new(resource_id(r), "MasterSlave")
                    .with_replicas(params.replicas)
                    .with_default_capacity("cpu", params.cpu)
                    .with_default_capacity("mem", params.mem);
                for p in 0..params.partitions {
                    resource = resource.with_partition(partition_id(r, p));
                }
                builder = builder.resource(resource);
            }

            (builder.build(), resources)
        })
}

fn resource_id(r: usize) -> String {
    format!("resource-{}", r)
}

fn partition_id(r: usize, p: usize) -> String {
    format!("resource-{}_p{}", r, p)
}

fn rebalance(snapshot: &ClusterSnapshot) -> AssignmentOutcome {
    Scheduler::default().rebalance(snapshot).unwrap()
}

proptest! {
    #[test]
    fn test_proptest_capacity_conservation((snapshot, resources) in snapshot_strategy()) {
        let outcome = rebalance(&snapshot);

        let mut used: BTreeMap<&str, [u32; 2]> = BTreeMap::new();
        for (r, params) in resources.iter().enumerate() {
            let Some(partitions) = outcome.result.resource(&resource_id(r).into()) else {
                continue;
            };
            for placements in partitions.values() {
                for placement in placements {
                    let entry = used.entry(placement.instance_id.as_str()).or_default();
                    entry[0] += params.cpu;
                    entry[1] += params.mem;
                }
            }
        }

        for ledger in &outcome.nodes {
            let usage = used.get(ledger.instance_id.as_str()).copied().unwrap_or_default();
            for (i, key) in KEYS.iter().enumerate() {
                let key = CapacityKey::from(*key);
                let total = ledger.total[&key];
                prop_assert!(usage[i] <= total);
                prop_assert_eq!(ledger.remaining[&key], total - usage[i]);
            }
        }
    }

    #[test]
    fn test_proptest_state_counts((snapshot, resources) in snapshot_strategy()) {
        let outcome = rebalance(&snapshot);

        for (r, params) in resources.iter().enumerate() {
            for p in 0..params.partitions {
                let resource = resource_id(r).into();
                let partition = partition_id(r, p).into();
                let placed = outcome.result.placements(&resource, &partition);
                let failed = outcome.failure(&resource, &partition);

                match (placed, failed) {
                    (Some(placements), None) => {
                        prop_assert_eq!(placements.len() as u32, params.replicas);
                        let masters = placements
                            .iter()
                            .filter(|pl| pl.state == ReplicaState::Master)
                            .count();
                        prop_assert_eq!(masters, 1);
                        prop_assert_eq!(placements[0].state, ReplicaState::Master);
                        let hosts: BTreeSet<_> =
                            placements.iter().map(|pl| &pl.instance_id).collect();
                        prop_assert_eq!(hosts.len(), placements.len());
                    }
                    (None, Some(_)) => {}
                    other => prop_assert!(false, "partition {} reported as {:?}", p, other),
                }
            }
        }
    }

    #[test]
    fn test_proptest_disablement_respected((snapshot, _) in snapshot_strategy()) {
        let outcome = rebalance(&snapshot);

        for (resource, partition, placements) in outcome.result.iter() {
            for placement in placements {
                let config = &snapshot.instances[&placement.instance_id];
                prop_assert!(config.enabled);
                let disabled = config
                    .disabled_partitions
                    .get(resource)
                    .is_some_and(|partitions| partitions.contains(partition));
                prop_assert!(!disabled);
            }
        }
    }

    #[test]
    fn test_proptest_zone_diversity((snapshot, _) in snapshot_strategy()) {
        let outcome = rebalance(&snapshot);
        if !snapshot.cluster.topology_aware {
            return Ok(());
        }

        for (_, _, placements) in outcome.result.iter() {
            let zones: BTreeSet<_> = placements
                .iter()
                .map(|pl| snapshot.instances[&pl.instance_id].fault_zone_id())
                .collect();
            prop_assert_eq!(zones.len(), placements.len());
        }
    }

    #[test]
    fn test_proptest_deterministic((snapshot, _) in snapshot_strategy()) {
        let first = rebalance(&snapshot);
        let second = rebalance(&snapshot);
        prop_assert_eq!(first.result, second.result);
        prop_assert_eq!(first.failures, second.failures);
    }
}
