//! rebal-scheduler: Capacity-aware replica placement engine
//!
//! This crate turns a [`rebal_core::ClusterSnapshot`] into a replica-to-node assignment:
//! - Per-node capacity ledgers and per-replica demand vectors
//! - Builders that derive both from the snapshot
//! - A greedy, largest-first constraint-based placement algorithm
//! - Structured results that name every partition that could not be placed

pub mod algorithm;
pub mod model;
pub mod node;
pub mod placement;
pub mod replica;
pub mod result;
pub mod scheduler;

pub use algorithm::ConstraintBasedAlgorithm;
pub use model::{ClusterModel, CurrentAssignment, PartitionSpec};
pub use node::{AssignableNode, Rejection};
pub use placement::{DefaultPlacementStrategy, PlacementStrategy, Stickiness};
pub use replica::AssignableReplica;
pub use result::{
    AssignmentOutcome, AssignmentResult, InfeasibilityKind, NodeLedger, PlacementFailure,
    ReplicaPlacement,
};
pub use scheduler::Scheduler;
