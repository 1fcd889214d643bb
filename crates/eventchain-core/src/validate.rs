//! Attach validation: cycle detection and the retag set.
//!
//! Attaching existing events under a new parent merges their subtrees into
//! the target's chain. Merging *disjoint* chains can never create a cycle,
//! so the expensive ancestor/descendant cross-check only runs when a
//! candidate already lives in the target's own chain. Validation is
//! all-or-nothing: every conflicting event is reported in one error, never
//! just the first one found.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::tree::{ChainTree, TreeError};
use crate::{ChainId, Event, EventId};

/// One event that would end up an ancestor of itself, together with the
/// requested child that drags it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CycleConflict {
    /// The event already above the target that the attach would also pull
    /// underneath it.
    pub id: EventId,
    /// The requested child whose subtree contains `id`.
    pub req_node_id: EventId,
}

/// The full conflict set for a rejected attach.
#[derive(Debug, Clone, Error)]
#[error("attach would create a cycle through {} event(s)", .conflicts.len())]
pub struct CycleConflictError {
    /// Sorted, deduplicated.
    pub conflicts: Vec<CycleConflict>,
}

#[derive(Debug, Error)]
pub enum ValidateError {
    /// A persisted chain violated the single-root invariant while being
    /// rebuilt for validation.
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Cycle(#[from] CycleConflictError),
}

/// Validate attaching `candidates` as children of `target` and compute the
/// retag set: every event id that must move into the target's chain.
///
/// `members_by_chain` must hold the freshly queried member list for the
/// target's chain and for every distinct chain among the candidates; the
/// caller (the service layer) does that I/O up front so this stays a pure
/// computation.
///
/// Preconditions enforced by the caller: 1..=[`crate::MAX_ATTACH_CANDIDATES`]
/// candidates, no duplicates, target not among them, everything loaded under
/// the requester's owner filter.
///
/// The returned set contains the candidates plus all their pre-existing
/// descendants. Only the candidates themselves later get a new `parent_id`;
/// inherited descendants keep theirs and change only `chain_id`, which
/// preserves the internal structure of each moved subtree.
pub fn validate_attach(
    target: &Event,
    candidates: &[Event],
    members_by_chain: &HashMap<ChainId, Vec<Event>>,
) -> Result<BTreeSet<EventId>, ValidateError> {
    let mut result: BTreeSet<EventId> = candidates.iter().map(|c| c.id).collect();

    // Ancestors of the target inside its own chain. A target that its own
    // tree build dropped (orphan quirk) simply has none.
    let target_ancestors: BTreeSet<EventId> = match target.chain_id {
        Some(chain) => {
            let members = members_by_chain
                .get(&chain)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let tree = ChainTree::build(members)?;
            tree.index
                .ancestors_of(target.id)
                .map(|chain| chain.into_iter().collect())
                .unwrap_or_default()
        }
        None => BTreeSet::new(),
    };

    // Chain-less candidates carry no subtree beyond themselves and are
    // already covered by the seed.
    let mut by_chain: HashMap<ChainId, Vec<&Event>> = HashMap::new();
    for candidate in candidates {
        if let Some(chain) = candidate.chain_id {
            by_chain.entry(chain).or_default().push(candidate);
        }
    }

    let mut conflicts: BTreeSet<CycleConflict> = BTreeSet::new();
    for (&chain, group) in &by_chain {
        let members = members_by_chain
            .get(&chain)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let tree = ChainTree::build(members)?;
        let shares_target_chain = target.chain_id == Some(chain);

        for candidate in group {
            let mut subtree: Vec<EventId> = vec![candidate.id];
            if let Some(descendants) = tree.index.descendants_of(candidate.id) {
                subtree.extend(descendants);
            }
            for id in subtree {
                if shares_target_chain && target_ancestors.contains(&id) {
                    conflicts.insert(CycleConflict {
                        id,
                        req_node_id: candidate.id,
                    });
                } else {
                    result.insert(id);
                }
            }
        }
    }

    if !conflicts.is_empty() {
        return Err(CycleConflictError {
            conflicts: conflicts.into_iter().collect(),
        }
        .into());
    }
    Ok(result)
}
