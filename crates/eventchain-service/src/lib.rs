//! Attach orchestration.
//!
//! [`ChainService`] sequences one attach request end to end:
//!
//! 1. Shape validation (bounds, duplicates, self-reference) — before any I/O
//! 2. Ownership-filtered loads of target and candidates
//! 3. Pure cycle validation over pre-fetched chain member lists
//! 4. Chain id resolution (reuse the target's, or allocate)
//! 5. One atomic mutation plan: broad chain retag + narrow parent re-point
//! 6. Audit-history emission
//!
//! Any failure up to step 4 terminates before anything is mutated. A history
//! failure after the commit is reported as a storage error without rollback
//! — the mutation stands, and nothing here retries.

pub mod protocol;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use eventchain_core::{
    validate_attach, ChainId, ChainTree, CycleConflictError, Event, EventId, OwnerId,
    TreeError, ValidateError, MAX_ATTACH_CANDIDATES,
};
use eventchain_store::{
    AttachPlan, ChainStorage, HistoryEntry, HistoryKind, ResetSummary, StoreError,
};

use serde::Serialize;

// ============================================================================
// Errors
// ============================================================================

/// Malformed request, caught before any record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("no children given")]
    Empty,
    #[error("{0} children requested, limit is {MAX_ATTACH_CANDIDATES}")]
    TooMany(usize),
    #[error("child id {0} requested twice")]
    DuplicateChild(EventId),
    #[error("an event cannot be attached under itself")]
    SelfReference,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Input(#[from] InputError),
    /// Target or candidates unresolvable under the requester's owner filter.
    #[error("event(s) not found: {missing:?}")]
    NotFound { missing: Vec<EventId> },
    #[error(transparent)]
    Cycle(#[from] CycleConflictError),
    /// A persisted chain failed to rebuild (single-root invariant broken).
    #[error("stored chain is malformed: {0}")]
    CorruptChain(#[from] TreeError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ValidateError> for ChainError {
    fn from(err: ValidateError) -> Self {
        match err {
            ValidateError::Cycle(conflicts) => ChainError::Cycle(conflicts),
            ValidateError::Tree(tree) => ChainError::CorruptChain(tree),
        }
    }
}

// ============================================================================
// Chain Allocation
// ============================================================================

/// Resolve-or-create for the destination chain id. Allocation happens after
/// validation succeeds and before any mutation, so a failed allocation
/// aborts a still-untouched operation.
pub struct ChainAllocator<S> {
    store: Arc<S>,
}

impl<S: ChainStorage> ChainAllocator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, target: &Event) -> Result<ChainId, StoreError> {
        match target.chain_id {
            Some(existing) => Ok(existing),
            None => Ok(self.store.create_chain(target.owner).await?.id),
        }
    }
}

// ============================================================================
// Chain View
// ============================================================================

/// One event's chain rendered for callers: the root plus every placed node
/// with its ancestry and direct children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainView {
    pub chain_id: Option<ChainId>,
    pub root: Option<EventId>,
    pub nodes: Vec<ChainNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainNode {
    pub id: EventId,
    pub title: String,
    pub parent: Option<EventId>,
    pub ancestors: Vec<EventId>,
    pub children: Vec<EventId>,
}

// ============================================================================
// Service
// ============================================================================

pub struct ChainService<S> {
    store: Arc<S>,
    allocator: ChainAllocator<S>,
}

impl<S: ChainStorage> ChainService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            allocator: ChainAllocator::new(Arc::clone(&store)),
            store,
        }
    }

    /// Attach existing events as children of `target`, merging their
    /// subtrees into the target's chain.
    pub async fn attach_children(
        &self,
        owner: OwnerId,
        target: EventId,
        children: &[EventId],
    ) -> Result<(), ChainError> {
        validate_shape(target, children)?;

        // Load everything the request names under the owner filter.
        let mut wanted: Vec<EventId> = Vec::with_capacity(children.len() + 1);
        wanted.push(target);
        wanted.extend_from_slice(children);
        let loaded = self.store.load_owned(owner, &wanted).await?;
        let by_id: HashMap<EventId, Event> =
            loaded.into_iter().map(|event| (event.id, event)).collect();
        let missing: Vec<EventId> = wanted
            .iter()
            .copied()
            .filter(|id| !by_id.contains_key(id))
            .collect();
        if !missing.is_empty() {
            return Err(ChainError::NotFound { missing });
        }
        let target_event = by_id[&target].clone();
        let candidates: Vec<Event> =
            children.iter().map(|id| by_id[id].clone()).collect();

        // Pre-fetch member lists for every chain validation will rebuild.
        let mut chains: BTreeSet<ChainId> =
            candidates.iter().filter_map(|c| c.chain_id).collect();
        chains.extend(target_event.chain_id);
        let mut members_by_chain: HashMap<ChainId, Vec<Event>> = HashMap::new();
        for chain in chains {
            members_by_chain.insert(chain, self.store.chain_members(chain).await?);
        }

        debug!(%target, children = children.len(), "validating attach");
        let retag = validate_attach(&target_event, &candidates, &members_by_chain)?;

        let chain_id = self.allocator.resolve(&target_event).await?;

        // Version tokens come from the same snapshots validation saw.
        let mut versions: BTreeMap<EventId, u64> = BTreeMap::new();
        for event in by_id.values() {
            versions.insert(event.id, event.version);
        }
        for members in members_by_chain.values() {
            for event in members {
                versions.insert(event.id, event.version);
            }
        }

        let mut retag_all: BTreeSet<EventId> = retag;
        retag_all.insert(target);
        let expected_versions: BTreeMap<EventId, u64> = retag_all
            .iter()
            .filter_map(|id| versions.get(id).map(|&v| (*id, v)))
            .collect();

        let plan = AttachPlan {
            chain_id,
            parent: target,
            retag: retag_all.into_iter().collect(),
            children: children.to_vec(),
            expected_versions,
        };
        info!(
            %target,
            chain = %chain_id,
            retagged = plan.retag.len(),
            "committing attach"
        );
        self.store.apply_attach(&plan).await?;

        self.store
            .append_history(attach_history(target, &candidates))
            .await?;
        debug!(%target, "attach recorded");
        Ok(())
    }

    /// Render the chain containing `event`. A chain-less event is its own
    /// single-node view.
    pub async fn chain_of(
        &self,
        owner: OwnerId,
        event: EventId,
    ) -> Result<ChainView, ChainError> {
        let loaded = self.store.load_owned(owner, &[event]).await?;
        let Some(record) = loaded.into_iter().next() else {
            return Err(ChainError::NotFound {
                missing: vec![event],
            });
        };
        let Some(chain) = record.chain_id else {
            return Ok(ChainView {
                chain_id: None,
                root: Some(record.id),
                nodes: vec![ChainNode {
                    id: record.id,
                    title: record.title,
                    parent: None,
                    ancestors: Vec::new(),
                    children: Vec::new(),
                }],
            });
        };

        let members = self.store.chain_members(chain).await?;
        let tree = ChainTree::build(&members)?;
        let titles: HashMap<EventId, &str> = members
            .iter()
            .map(|m| (m.id, m.title.as_str()))
            .collect();

        let entries = tree.index.entries();
        let mut children_of: BTreeMap<EventId, Vec<EventId>> = BTreeMap::new();
        for (&id, entry) in &entries {
            if let Some(&parent) = entry.ancestors.last() {
                children_of.entry(parent).or_default().push(id);
            }
        }
        let nodes = entries
            .iter()
            .map(|(&id, entry)| ChainNode {
                id,
                title: titles.get(&id).copied().unwrap_or_default().to_string(),
                parent: entry.ancestors.last().copied(),
                ancestors: entry.ancestors.clone(),
                children: children_of.remove(&id).unwrap_or_default(),
            })
            .collect();

        Ok(ChainView {
            chain_id: Some(chain),
            root: tree.root,
            nodes,
        })
    }

    /// Maintenance/ops: wipe all chain state (parents, chain tags, chain
    /// allocations, chain history).
    pub async fn reset_chains(&self) -> Result<ResetSummary, ChainError> {
        let summary = self.store.reset_chains().await?;
        info!(
            events = summary.events_cleared,
            chains = summary.chains_deleted,
            "chain state reset"
        );
        Ok(summary)
    }
}

fn validate_shape(target: EventId, children: &[EventId]) -> Result<(), InputError> {
    if children.is_empty() {
        return Err(InputError::Empty);
    }
    if children.len() > MAX_ATTACH_CANDIDATES {
        return Err(InputError::TooMany(children.len()));
    }
    let mut seen = BTreeSet::new();
    for &child in children {
        if child == target {
            return Err(InputError::SelfReference);
        }
        if !seen.insert(child) {
            return Err(InputError::DuplicateChild(child));
        }
    }
    Ok(())
}

/// One entry per moved child, one on the target, one per parent that lost a
/// child to the attach.
fn attach_history(target: EventId, candidates: &[Event]) -> Vec<HistoryEntry> {
    let mut entries = vec![HistoryEntry::new(
        target,
        HistoryKind::ChildrenAttached {
            children: candidates.iter().map(|c| c.id).collect(),
        },
    )];
    for candidate in candidates {
        entries.push(HistoryEntry::new(
            candidate.id,
            HistoryKind::ParentAssigned { parent: target },
        ));
        if let Some(previous) = candidate.parent_id {
            if previous != target {
                entries.push(HistoryEntry::new(
                    previous,
                    HistoryKind::ChildDetached {
                        child: candidate.id,
                    },
                ));
            }
        }
    }
    entries
}
