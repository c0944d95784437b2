//! Strongly-typed identifiers.
//!
//! Scopes, gates, subscriptions and locks each carry an identifier so log
//! lines from concurrent operations can be correlated. Each identifier type
//! is a thin wrapper around a UUID with a phantom type parameter, so a
//! `ScopeId` can never be passed where a `SubscriptionId` is expected.
//!
//! # Examples
//!
//! ```
//! use baton_core::id::{ScopeId, SubscriptionId};
//! use std::str::FromStr;
//!
//! let scope_id = ScopeId::new();
//! let subscription_id = SubscriptionId::new();
//! assert_ne!(scope_id.to_string(), subscription_id.to_string());
//!
//! let id_str = "550e8400-e29b-41d4-a716-446655440000";
//! let scope_id = ScopeId::from_str(id_str).unwrap();
//! assert_eq!(scope_id.to_string(), id_str);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Create a nil (all zeros) identifier.
    pub const fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    /// Check if this is a nil identifier.
    pub fn is_nil(&self) -> bool {
        self.uuid.is_nil()
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for cancellation scopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeMarker;
/// Identifier for a cancellation scope.
pub type ScopeId = Id<ScopeMarker>;

/// Marker type for resume gates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateMarker;
/// Identifier for a single-resume gate.
pub type GateId = Id<GateMarker>;

/// Marker type for event subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionMarker;
/// Identifier for an event subscription.
pub type SubscriptionId = Id<SubscriptionMarker>;

/// Marker type for locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockMarker;
/// Identifier for a mutex.
pub type LockId = Id<LockMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_new() {
        let id1 = ScopeId::new();
        let id2 = ScopeId::new();
        assert_ne!(id1, id2, "Generated IDs should be unique");
    }

    #[test]
    fn test_id_from_str() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = SubscriptionId::from_str(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
        assert!(GateId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_id_nil() {
        let nil_id = LockId::nil();
        assert_eq!(nil_id.to_string(), "00000000-0000-0000-0000-000000000000");
        assert!(nil_id.is_nil());
        assert!(!LockId::new().is_nil());
    }

    #[test]
    fn test_id_serde() {
        let id = ScopeId::new();
        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: ScopeId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }
}
