//! Eventchain storage boundary.
//!
//! The chain subsystem treats persistence as an external collaborator
//! exposing query/update primitives: ownership-filtered point loads, chain
//! member queries, chain allocation, one atomic attach mutation, and the
//! audit history. [`ChainStorage`] is that collaborator; [`MemoryStore`] is
//! the reference implementation backing tests and the CLI.
//!
//! The attach mutation is deliberately a single [`AttachPlan`] applied
//! atomically with per-event version checks, rather than two independent
//! update passes — a partial failure leaves nothing half-tagged, and a plan
//! computed against a stale read fails with
//! [`StoreError::VersionConflict`] instead of losing a concurrent update.

pub mod memory;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use eventchain_core::{ChainId, Event, EventId, OwnerId};

pub use memory::MemoryStore;

// ============================================================================
// Records
// ============================================================================

/// Chain allocation record: created once when a chain-less target first
/// gains children, reused (never mutated) afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    pub owner: OwnerId,
    pub created_at: DateTime<Utc>,
}

impl Chain {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            id: ChainId::new(),
            owner,
            created_at: Utc::now(),
        }
    }
}

/// One audit-history entry, pinned to the event it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub event_id: EventId,
    pub kind: HistoryKind,
}

impl HistoryEntry {
    pub fn new(event_id: EventId, kind: HistoryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            event_id,
            kind,
        }
    }
}

/// What happened. The history collection in the source system carries many
/// unrelated entry types; the chain maintenance reset removes exactly the
/// chain-insertion and chain-removal kinds, so the classifier lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    /// Recorded on the target: these children were inserted under it.
    ChildrenAttached { children: Vec<EventId> },
    /// Recorded on a moved child: it now hangs under `parent`.
    ParentAssigned { parent: EventId },
    /// Recorded on the parent that lost `child` to the attach.
    ChildDetached { child: EventId },
}

impl HistoryKind {
    /// Chain-insertion or chain-removal entry (the reset filter).
    pub fn is_chain_entry(&self) -> bool {
        matches!(
            self,
            HistoryKind::ChildrenAttached { .. }
                | HistoryKind::ParentAssigned { .. }
                | HistoryKind::ChildDetached { .. }
        )
    }
}

// ============================================================================
// Mutation Plan
// ============================================================================

/// Everything one validated attach writes, applied as a unit.
///
/// `retag` is the broad pass (every event whose `chain_id` becomes
/// `chain_id`, target included); `children` is the narrow pass (only the
/// directly requested events re-point `parent_id` at `parent`). Versions in
/// `expected_versions` are checked before anything is touched and every
/// touched event gets its version bumped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachPlan {
    pub chain_id: ChainId,
    /// The attach target; children re-point here.
    pub parent: EventId,
    pub retag: Vec<EventId>,
    pub children: Vec<EventId>,
    pub expected_versions: BTreeMap<EventId, u64>,
}

/// What a maintenance reset removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSummary {
    /// Events that had a parent or chain tag cleared.
    pub events_cleared: usize,
    pub chains_deleted: usize,
    pub history_deleted: usize,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The event changed between the read the plan was computed from and
    /// the commit. Nothing was applied.
    #[error("event {id} is at version {found}, plan expected {expected}")]
    VersionConflict {
        id: EventId,
        expected: u64,
        found: u64,
    },
    /// A plan referenced an event that is no longer stored.
    #[error("event {0} missing from storage")]
    EventMissing(EventId),
    /// A plan referenced a chain that was never allocated.
    #[error("chain {0} missing from storage")]
    ChainMissing(ChainId),
}

// ============================================================================
// Storage Collaborator
// ============================================================================

/// Query/update primitives the chain subsystem consumes. All calls are
/// awaited sequentially by the service; implementations must make
/// [`apply_attach`](ChainStorage::apply_attach) atomic.
#[async_trait]
pub trait ChainStorage: Send + Sync {
    /// Point-load events by id under the requester's ownership filter.
    /// Missing or foreign-owned ids are simply absent from the result.
    async fn load_owned(
        &self,
        owner: OwnerId,
        ids: &[EventId],
    ) -> Result<Vec<Event>, StoreError>;

    /// Every event tagged with `chain`, in stored order.
    async fn chain_members(&self, chain: ChainId) -> Result<Vec<Event>, StoreError>;

    /// Allocate a new chain record for `owner`.
    async fn create_chain(&self, owner: OwnerId) -> Result<Chain, StoreError>;

    /// Commit one attach plan: version checks first, then the chain retag
    /// and parent re-pointing, all-or-nothing.
    async fn apply_attach(&self, plan: &AttachPlan) -> Result<(), StoreError>;

    async fn append_history(&self, entries: Vec<HistoryEntry>) -> Result<(), StoreError>;

    async fn history_for(&self, event: EventId) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Maintenance/ops only: clear `parent_id`/`chain_id` on every event,
    /// drop all chain allocations, and delete chain-tagged history.
    async fn reset_chains(&self) -> Result<ResetSummary, StoreError>;
}
