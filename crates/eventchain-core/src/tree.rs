//! Tree reconstruction and the path index.
//!
//! A chain is stored flat: each event carries only `parent_id` and
//! `chain_id`. [`ChainTree::build`] turns one freshly queried member list
//! back into a rooted tree together with a [`PathIndex`] giving every placed
//! event its ordered ancestor chain (root → parent) and its full descendant
//! closure.
//!
//! Construction is best-effort by design: events whose `parent_id` matches
//! nothing in the input are never reached by the traversal and silently fall
//! out of the index. The same applies to cyclic `parent_id` clusters — they
//! are unreachable from the root, so the work-list never visits them.
//! Preventing cycles from being *written* is the validator's job.

use ahash::AHashMap;
use roaring::RoaringBitmap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::{Event, EventId};

#[derive(Debug, Clone, Error)]
pub enum TreeError {
    /// A chain member list contained more than one rootless event. The
    /// persisted single-root invariant is violated; surface it instead of
    /// picking a winner.
    #[error("chain holds {} rootless events, expected one", .roots.len())]
    MultipleRoots { roots: Vec<EventId> },
}

// ============================================================================
// Path Index
// ============================================================================

/// Snapshot of one event's place in the tree. Keyed containers of these are
/// what tests compare; the index itself never hands out object references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathEntry {
    /// Ancestor chain ordered root → parent, excluding the event itself.
    pub ancestors: Vec<EventId>,
    /// Every event transitively reachable through child links.
    pub descendants: BTreeSet<EventId>,
}

/// Per-event ancestor chains and descendant closures over dense slots.
///
/// Placed events are interned to consecutive `u32` slots; ancestor chains are
/// slot vectors and descendant closures are Roaring bitmaps, which keeps the
/// O(depth) fan-out during construction cheap and membership tests O(1).
#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    /// slot → event id
    ids: Vec<EventId>,
    /// event id → slot
    slots: AHashMap<EventId, u32>,
    /// slot → ancestor slots, root first
    ancestors: Vec<Vec<u32>>,
    /// slot → descendant closure
    descendants: Vec<RoaringBitmap>,
}

impl PathIndex {
    /// Number of events actually placed in the tree.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the event was reached during construction.
    pub fn contains(&self, id: EventId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Ordered ancestor chain (root → parent) of a placed event.
    pub fn ancestors_of(&self, id: EventId) -> Option<Vec<EventId>> {
        let slot = *self.slots.get(&id)?;
        Some(
            self.ancestors[slot as usize]
                .iter()
                .map(|&s| self.ids[s as usize])
                .collect(),
        )
    }

    /// Descendant closure of a placed event, exclusive of the event itself.
    pub fn descendants_of(&self, id: EventId) -> Option<BTreeSet<EventId>> {
        let slot = *self.slots.get(&id)?;
        Some(
            self.descendants[slot as usize]
                .iter()
                .map(|s| self.ids[s as usize])
                .collect(),
        )
    }

    /// O(1) test: is `ancestor` strictly above `id`?
    pub fn is_ancestor_of(&self, ancestor: EventId, id: EventId) -> bool {
        match (self.slots.get(&ancestor), self.slots.get(&id)) {
            (Some(&a), Some(&d)) => self.descendants[a as usize].contains(d),
            _ => false,
        }
    }

    /// Full id-keyed snapshot, for equality checks and serialization in
    /// tests. Slot numbering is an internal detail and never leaks.
    pub fn entries(&self) -> BTreeMap<EventId, PathEntry> {
        self.ids
            .iter()
            .map(|&id| {
                let slot = self.slots[&id] as usize;
                let entry = PathEntry {
                    ancestors: self.ancestors[slot]
                        .iter()
                        .map(|&s| self.ids[s as usize])
                        .collect(),
                    descendants: self.descendants[slot]
                        .iter()
                        .map(|s| self.ids[s as usize])
                        .collect(),
                };
                (id, entry)
            })
            .collect()
    }

    fn place(&mut self, id: EventId) -> u32 {
        let slot = self.ids.len() as u32;
        self.ids.push(id);
        self.slots.insert(id, slot);
        self.ancestors.push(Vec::new());
        self.descendants.push(RoaringBitmap::new());
        slot
    }
}

// ============================================================================
// Tree Construction
// ============================================================================

/// A reconstructed chain: the root (if any event was placeable) plus the
/// path index over everything reachable from it.
#[derive(Debug, Clone, Default)]
pub struct ChainTree {
    pub root: Option<EventId>,
    pub index: PathIndex,
}

impl ChainTree {
    /// Rebuild the tree for one chain from its flat member list.
    ///
    /// Empty input yields an empty tree. Exactly one rootless event becomes
    /// the root; zero rootless events means nothing is reachable and the
    /// tree comes back empty. Placement is depth-first over an explicit
    /// work-list: a child's ancestors are its parent's ancestors plus the
    /// parent, and the child is inserted into the descendant bitmap of every
    /// slot on that chain.
    ///
    /// Pure function: identical input always produces an identical
    /// [`PathIndex::entries`] snapshot.
    pub fn build(events: &[Event]) -> Result<Self, TreeError> {
        if events.is_empty() {
            return Ok(Self::default());
        }

        // Forward adjacency over input positions, plus root candidates.
        let mut children: AHashMap<EventId, Vec<usize>> = AHashMap::new();
        let mut roots: Vec<usize> = Vec::new();
        for (pos, event) in events.iter().enumerate() {
            match event.parent_id {
                Some(parent) => children.entry(parent).or_default().push(pos),
                None => roots.push(pos),
            }
        }

        if roots.len() > 1 {
            return Err(TreeError::MultipleRoots {
                roots: roots.iter().map(|&pos| events[pos].id).collect(),
            });
        }
        let Some(&root_pos) = roots.first() else {
            // Every member claims a parent; nothing is reachable.
            return Ok(Self::default());
        };

        let mut index = PathIndex::default();
        let root_id = events[root_pos].id;
        let root_slot = index.place(root_id);

        let mut stack: Vec<(usize, u32)> = vec![(root_pos, root_slot)];
        while let Some((pos, slot)) = stack.pop() {
            let Some(kids) = children.get(&events[pos].id) else {
                continue;
            };
            for &kid_pos in kids {
                let kid_slot = index.place(events[kid_pos].id);
                let mut chain = index.ancestors[slot as usize].clone();
                chain.push(slot);
                for &ancestor in &chain {
                    index.descendants[ancestor as usize].insert(kid_slot);
                }
                index.ancestors[kid_slot as usize] = chain;
                stack.push((kid_pos, kid_slot));
            }
        }

        Ok(Self {
            root: Some(root_id),
            index,
        })
    }
}
