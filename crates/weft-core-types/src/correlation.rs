//! Correlation identifiers
//!
//! Every transaction, every scope and every inbound request gets its own
//! identifier so that log lines emitted by the coordinator and by the
//! repositories it drives can be stitched back together.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh identifier (UUIDv7, time ordered)
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Get the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Wrap an existing identifier, e.g. one received from a caller
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of one inbound request or unit of application work
    RequestId
);

define_id!(
    /// Trace identifier propagated from an upstream caller
    TraceId
);

define_id!(
    /// Identifier of one cross-repository transaction
    TransactionId
);

define_id!(
    /// Identifier of one query or mutation scope
    ScopeId
);
