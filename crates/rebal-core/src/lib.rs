//! rebal-core: Core types for the rebal replica placement engine
//!
//! This crate provides the data the placement engine consumes:
//! - Typed identifiers for instances, resources, partitions and capacity dimensions
//! - Cluster, instance and resource configuration
//! - State model definitions
//! - The read-only cluster snapshot and its builder
//! - Engine configuration and error handling

pub mod config;
pub mod error;
pub mod ids;
pub mod snapshot;
pub mod state_model;

pub use config::*;
pub use error::*;
pub use ids::*;
pub use snapshot::*;
pub use state_model::*;
