//! In-memory reference store.
//!
//! Plain maps behind one `parking_lot::RwLock`; taking the write guard for
//! the whole of `apply_attach`/`reset_chains` is what makes those calls
//! atomic here. Real deployments put a database behind [`ChainStorage`]
//! instead; this implementation backs the test suites and the CLI.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

use eventchain_core::{ChainId, Event, EventId, OwnerId};

use crate::{
    AttachPlan, Chain, ChainStorage, HistoryEntry, ResetSummary, StoreError,
};

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<EventId, Event>,
    chains: BTreeMap<ChainId, Chain>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a flat event set. Chain tags already present on the seeded
    /// events get their allocation records backfilled, since a tag without
    /// its allocation is unrepresentable in the real store.
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for event in events {
                if let Some(chain_id) = event.chain_id {
                    inner.chains.entry(chain_id).or_insert_with(|| Chain {
                        id: chain_id,
                        owner: event.owner,
                        created_at: chrono::Utc::now(),
                    });
                }
                inner.events.insert(event.id, event);
            }
        }
        store
    }

    pub fn insert_event(&self, event: Event) {
        self.inner.write().events.insert(event.id, event);
    }

    /// Current state of one event, if stored.
    pub fn event(&self, id: EventId) -> Option<Event> {
        self.inner.read().events.get(&id).cloned()
    }

    /// All events, ordered by id. Used for write-back and snapshot
    /// comparisons in tests.
    pub fn events_snapshot(&self) -> Vec<Event> {
        self.inner.read().events.values().cloned().collect()
    }

    pub fn chains_snapshot(&self) -> Vec<Chain> {
        self.inner.read().chains.values().cloned().collect()
    }

    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.inner.read().history.clone()
    }
}

#[async_trait]
impl ChainStorage for MemoryStore {
    async fn load_owned(
        &self,
        owner: OwnerId,
        ids: &[EventId],
    ) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.events.get(id))
            .filter(|event| event.owner == owner)
            .cloned()
            .collect())
    }

    async fn chain_members(&self, chain: ChainId) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .values()
            .filter(|event| event.chain_id == Some(chain))
            .cloned()
            .collect())
    }

    async fn create_chain(&self, owner: OwnerId) -> Result<Chain, StoreError> {
        let chain = Chain::new(owner);
        self.inner.write().chains.insert(chain.id, chain.clone());
        debug!(chain = %chain.id, "allocated chain");
        Ok(chain)
    }

    async fn apply_attach(&self, plan: &AttachPlan) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        // Validate the whole plan before touching anything.
        if !inner.chains.contains_key(&plan.chain_id) {
            return Err(StoreError::ChainMissing(plan.chain_id));
        }
        for id in plan.retag.iter().chain(plan.children.iter()) {
            let event = inner
                .events
                .get(id)
                .ok_or(StoreError::EventMissing(*id))?;
            if let Some(&expected) = plan.expected_versions.get(id) {
                if event.version != expected {
                    return Err(StoreError::VersionConflict {
                        id: *id,
                        expected,
                        found: event.version,
                    });
                }
            }
        }

        let mut touched: Vec<EventId> = Vec::new();
        for id in &plan.retag {
            // Presence checked above.
            if let Some(event) = inner.events.get_mut(id) {
                event.chain_id = Some(plan.chain_id);
                touched.push(*id);
            }
        }
        for id in &plan.children {
            if let Some(event) = inner.events.get_mut(id) {
                event.parent_id = Some(plan.parent);
                if !touched.contains(id) {
                    touched.push(*id);
                }
            }
        }
        for id in &touched {
            if let Some(event) = inner.events.get_mut(id) {
                event.version += 1;
            }
        }

        debug!(
            chain = %plan.chain_id,
            retagged = plan.retag.len(),
            children = plan.children.len(),
            "applied attach plan"
        );
        Ok(())
    }

    async fn append_history(&self, entries: Vec<HistoryEntry>) -> Result<(), StoreError> {
        self.inner.write().history.extend(entries);
        Ok(())
    }

    async fn history_for(&self, event: EventId) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .history
            .iter()
            .filter(|entry| entry.event_id == event)
            .cloned()
            .collect())
    }

    async fn reset_chains(&self) -> Result<ResetSummary, StoreError> {
        let mut inner = self.inner.write();
        let mut summary = ResetSummary::default();

        for event in inner.events.values_mut() {
            if event.parent_id.is_some() || event.chain_id.is_some() {
                event.parent_id = None;
                event.chain_id = None;
                event.version += 1;
                summary.events_cleared += 1;
            }
        }
        summary.chains_deleted = inner.chains.len();
        inner.chains.clear();

        let before = inner.history.len();
        inner.history.retain(|entry| !entry.kind.is_chain_entry());
        summary.history_deleted = before - inner.history.len();

        debug!(
            events = summary.events_cleared,
            chains = summary.chains_deleted,
            history = summary.history_deleted,
            "reset chain state"
        );
        Ok(summary)
    }
}
