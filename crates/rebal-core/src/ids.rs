//! Typed identifiers
//!
//! Every name that flows through the engine gets its own newtype so an
//! instance id can never be passed where a partition id is expected.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a cluster instance (a node that can host replicas)
    InstanceId
);
string_id!(
    /// Identifier of a partitioned resource
    ResourceId
);
string_id!(
    /// Identifier of one partition of a resource
    PartitionId
);
string_id!(
    /// Name of a capacity dimension (e.g. "cpu", "disk")
    CapacityKey
);
string_id!(
    /// Topology grouping used to diversify replicas (rack, zone)
    FaultZoneId
);
string_id!(
    /// Session of a live instance; current state from other sessions is stale
    SessionId
);
