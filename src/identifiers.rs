//! Type-safe identifiers for connections and tunnels.
//!
//! Newtype wrappers prevent mixing a connection ID with a tunnel ID.
//! Both are random UUIDs, used mostly as structured log fields.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Macros
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

uuid_id!(
    /// Identifies one [`WebSocket`](crate::WebSocket) instance.
    ConnectionId
);

uuid_id!(
    /// Identifies one [`TunnelProxy`](crate::TunnelProxy) instance.
    TunnelId
);

// ============================================================================
// Tests
// ============================================================================
