//! Eventchain core: the hierarchical chain subsystem.
//!
//! Events reference an optional parent and an optional chain (the tree group
//! they belong to). Nothing about the hierarchy is persisted as an object —
//! only those two scalars live on each event, and a tree plus its
//! ancestor/descendant index is rebuilt on demand from a freshly queried
//! member list, used for one validation, and discarded.
//!
//! Key design points:
//! 1. **Dense slots**: placed events are interned to `u32` slots so ancestor
//!    chains are small vectors and descendant closures are Roaring bitmaps
//!    with O(1) membership.
//! 2. **Work-list construction**: tree placement uses an explicit stack, so
//!    depth is bounded by heap and malformed (even cyclic) input cannot
//!    recurse unboundedly.
//! 3. **Pure validation**: [`validate_attach`] computes over pre-fetched
//!    member lists; all I/O lives in the service layer.

pub mod tree;
pub mod validate;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use tree::{ChainTree, PathEntry, PathIndex, TreeError};
pub use validate::{validate_attach, CycleConflict, CycleConflictError, ValidateError};

/// Hard cap on the number of children a single attach request may carry.
pub const MAX_ATTACH_CANDIDATES: usize = 5;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of an event record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of a chain: the tree group a set of events shares.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(Uuid);

impl ChainId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the user owning a set of events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(raw: Uuid) -> Self {
        Self(raw)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Event Record
// ============================================================================

/// An event record, as far as the chain subsystem cares about it.
///
/// `version` is the optimistic-concurrency token: every write to an event
/// checks and increments it, so a validation performed against a stale read
/// fails at commit time instead of interleaving silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub parent_id: Option<EventId>,
    pub chain_id: Option<ChainId>,
    pub owner: OwnerId,
    pub title: String,
    pub version: u64,
}

impl Event {
    pub fn new(owner: OwnerId, title: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            parent_id: None,
            chain_id: None,
            owner,
            title: title.into(),
            version: 0,
        }
    }
}
