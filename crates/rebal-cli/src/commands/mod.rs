//! CLI commands implementation

use anyhow::{Context, Result};
use rebal_core::{CapacityMap, ClusterSnapshot, EngineConfig};
use rebal_scheduler::{AssignmentOutcome, Scheduler};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn load_snapshot(path: &Path) -> Result<ClusterSnapshot> {
    ClusterSnapshot::from_file(path)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))
}

/// Compute and print an assignment
pub async fn assign(config: EngineConfig, snapshot_path: PathBuf, json: bool) -> Result<()> {
    let snapshot = load_snapshot(&snapshot_path)?;
    let scheduler = Scheduler::new(config);

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling rebalance");
            ctrl_c.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        scheduler.rebalance_with_cancellation(&snapshot, token)
    })
    .await
    .context("Rebalance task panicked")??;
    watcher.abort();

    info!(run_id = %outcome.run_id, "Printing outcome");

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

/// Build the cluster model and report what it contains
pub fn validate(config: EngineConfig, snapshot_path: &Path) -> Result<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    let model = Scheduler::new(config).model(&snapshot)?;

    println!("Snapshot OK: {}", snapshot_path.display());
    println!("  Live nodes: {}", model.nodes.len());
    println!("  Resources: {}", snapshot.resources.len());
    println!("  Partitions: {}", model.partitions.len());
    println!("  Replicas: {}", model.replicas.len());

    let disabled = model.nodes.iter().filter(|n| !n.is_enabled()).count();
    if disabled > 0 {
        println!("  Disabled nodes: {}", disabled);
    }

    if !model.partitions.is_empty() {
        println!();
        println!("{:<24} {:<24} {}", "RESOURCE", "PARTITION", "REQUIRED");
        println!("{}", "-".repeat(80));
        for spec in &model.partitions {
            let required: Vec<String> = spec.required.iter().map(|s| s.to_string()).collect();
            println!(
                "{:<24} {:<24} {}",
                spec.resource_id,
                spec.partition_id,
                required.join(",")
            );
        }
    }

    Ok(())
}

/// Show every live node's capacity
pub fn nodes(config: EngineConfig, snapshot_path: &Path) -> Result<()> {
    let snapshot = load_snapshot(snapshot_path)?;
    let model = Scheduler::new(config).model(&snapshot)?;

    if model.nodes.is_empty() {
        println!("No live nodes found");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<9} {:<30} {:<14} {}",
        "INSTANCE", "ZONE", "ENABLED", "CAPACITY", "MAX REPLICAS", "TAGS"
    );
    println!("{}", "-".repeat(110));
    for node in &model.nodes {
        let tags: Vec<&str> = node.tags().iter().map(String::as_str).collect();
        let max = node
            .max_partitions()
            .map_or_else(|| "-".to_string(), |max| max.to_string());
        println!(
            "{:<20} {:<16} {:<9} {:<30} {:<14} {}",
            node.instance_id(),
            node.fault_zone_id(),
            if node.is_enabled() { "yes" } else { "no" },
            format_capacity(node.total_capacity_map()),
            max,
            tags.join(",")
        );
    }

    Ok(())
}

fn print_outcome(outcome: &AssignmentOutcome) {
    println!("Run: {}", outcome.run_id);
    println!("Computed at: {}", outcome.computed_at.to_rfc3339());
    let order: Vec<&str> = outcome.resource_order.iter().map(|r| r.as_str()).collect();
    println!("Resource order: {}", order.join(", "));
    println!();

    if outcome.result.is_empty() {
        println!("No partitions placed");
    } else {
        println!(
            "{:<24} {:<24} {:<20} {:<10}",
            "RESOURCE", "PARTITION", "INSTANCE", "STATE"
        );
        println!("{}", "-".repeat(80));
        for (resource, partition, placements) in outcome.result.iter() {
            for placement in placements {
                println!(
                    "{:<24} {:<24} {:<20} {:<10}",
                    resource, partition, placement.instance_id, placement.state
                );
            }
        }
    }

    if !outcome.failures.is_empty() {
        println!("\nUnplaced partitions:");
        for failure in &outcome.failures {
            println!("  {}", failure);
        }
    }

    println!("\nNodes:");
    for node in &outcome.nodes {
        let used = remaining_of_total(&node.remaining, &node.total);
        println!(
            "  {} ({}) - {} replica(s) - {}{}",
            node.instance_id,
            node.fault_zone,
            node.assigned_count,
            used,
            if node.enabled { "" } else { " - disabled" }
        );
    }

    println!(
        "\n{} partition(s) placed, {} replica(s), {} unplaced",
        outcome.result.partition_count(),
        outcome.result.replica_count(),
        outcome.failures.len()
    );
}

fn format_capacity(capacity: &CapacityMap) -> String {
    let parts: Vec<String> = capacity
        .iter()
        .map(|(key, amount)| format!("{}={}", key, amount))
        .collect();
    parts.join(" ")
}

fn remaining_of_total(remaining: &CapacityMap, total: &CapacityMap) -> String {
    let parts: Vec<String> = total
        .iter()
        .map(|(key, amount)| {
            let left = remaining.get(key).copied().unwrap_or(0);
            format!("{}={}/{}", key, left, amount)
        })
        .collect();
    parts.join(" ")
}
