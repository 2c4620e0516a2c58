//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time: a
//! [`SessionId`] can never be passed where a [`FrameId`] is expected even
//! though both are strings on the wire.
//!
//! # Identifier Types
//!
//! | Type | Wire form | Assigned by |
//! |------|-----------|-------------|
//! | [`CallId`] | integer | Local end, per connection |
//! | [`SessionId`] | string | Browser (`Target.attachedToTarget`) |
//! | [`TargetId`] | string | Browser |
//! | [`FrameId`] | string | Browser (context id) |
//! | [`NetworkId`] | string | Browser (shared by a redirect chain) |
//! | [`NavigationId`] | string | Browser (one per navigation) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// CallId
// ============================================================================

/// Identifier of one outgoing command, used for response correlation.
///
/// Ids are positive and strictly increasing within one [`IdGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(u64);

impl CallId {
    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// IdGenerator
// ============================================================================

/// Monotonic call-id counter owned by one connection.
///
/// Cloning shares the counter, so a connection and all of its sessions draw
/// from the same sequence.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    next: Arc<AtomicU64>,
}

impl IdGenerator {
    /// Creates a fresh counter starting at 1.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id.
    #[inline]
    pub fn next_id(&self) -> CallId {
        CallId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

// ============================================================================
// String Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Creates an identifier from any string-like value.
            #[inline]
            #[must_use]
            pub fn new(id: impl AsRef<str>) -> Self {
                Self(Arc::from(id.as_ref()))
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(Arc::from(id))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }
    };
}

string_id! {
    /// Older-dialect session identifier; the sole routing key of scoped messages.
    SessionId
}

string_id! {
    /// Browser target identifier.
    TargetId
}

string_id! {
    /// Browsing context (frame) identifier.
    FrameId
}

string_id! {
    /// Network request identifier, shared by every hop of a redirect chain.
    NetworkId
}

string_id! {
    /// Navigation identifier, assigned when a navigation starts.
    NavigationId
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_is_monotonic() {
        let ids = IdGenerator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first, CallId::new(1));
        assert!(second > first);
    }

    #[test]
    fn test_id_generator_clones_share_counter() {
        let ids = IdGenerator::new();
        let clone = ids.clone();
        assert_eq!(ids.next_id().as_u64(), 1);
        assert_eq!(clone.next_id().as_u64(), 2);
    }

    #[test]
    fn test_independent_generators_do_not_collide() {
        let a = IdGenerator::new();
        let b = IdGenerator::new();
        assert_eq!(a.next_id(), b.next_id());
    }

    #[test]
    fn test_string_id_serde() {
        let id = SessionId::from("ABCD");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"ABCD\"");

        let back: SessionId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
        assert_eq!(back.to_string(), "ABCD");
    }
}
