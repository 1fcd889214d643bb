//! Property tests for the §-free universals: index correctness on arbitrary
//! well-formed trees, build determinism, and the no-cycle guarantee of
//! accepted attaches.

use std::collections::{BTreeSet, HashMap};

use eventchain_core::{
    validate_attach, ChainId, ChainTree, Event, EventId, OwnerId, ValidateError,
};
use proptest::prelude::*;
use uuid::Uuid;

const MAX_NODES: usize = 32;

fn id(n: u128) -> EventId {
    EventId::from_uuid(Uuid::from_u128(n))
}

fn owner() -> OwnerId {
    OwnerId::from_uuid(Uuid::from_u128(0xA11CE))
}

fn the_chain() -> ChainId {
    ChainId::from_uuid(Uuid::from_u128(0xC0FFEE))
}

fn ev(n: u128, parent: Option<u128>, tagged: bool) -> Event {
    let mut event = Event::new(owner(), format!("event-{n}"));
    event.id = id(n);
    event.parent_id = parent.map(id);
    event.chain_id = tagged.then(the_chain);
    event
}

/// A well-formed tree: node 0 is the root, every later node picks an
/// earlier parent, and the whole list is then shuffled.
fn tree_strategy(tagged: bool) -> impl Strategy<Value = Vec<Event>> {
    (1..MAX_NODES)
        .prop_flat_map(move |n| {
            prop::collection::vec(any::<prop::sample::Index>(), n - 1).prop_map(
                move |choices| {
                    let mut events = vec![ev(0, None, tagged)];
                    for (i, choice) in choices.iter().enumerate() {
                        let parent = choice.index(i + 1) as u128;
                        events.push(ev((i + 1) as u128, Some(parent), tagged));
                    }
                    events
                },
            )
        })
        .prop_shuffle()
}

/// Walk `parent_id` links from `start`; `None` when the walk escapes the
/// set or exceeds `limit` hops (cycle).
fn walk_to_root(
    parents: &HashMap<EventId, Option<EventId>>,
    start: EventId,
    limit: usize,
) -> Option<Vec<EventId>> {
    let mut seen = vec![start];
    let mut current = start;
    for _ in 0..limit {
        match parents.get(&current)? {
            Some(parent) => {
                seen.push(*parent);
                current = *parent;
            }
            None => return Some(seen),
        }
    }
    None
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn index_matches_parent_links(events in tree_strategy(false)) {
        let tree = ChainTree::build(&events).unwrap();
        let entries = tree.index.entries();
        prop_assert_eq!(entries.len(), events.len());

        let parents: HashMap<EventId, Option<EventId>> =
            events.iter().map(|e| (e.id, e.parent_id)).collect();

        for event in &events {
            let entry = &entries[&event.id];
            // The chain ends with the true parent and mirrors the walk to
            // the root, reversed.
            prop_assert_eq!(entry.ancestors.last().copied(), event.parent_id);
            let walked = walk_to_root(&parents, event.id, events.len()).unwrap();
            let mut expected: Vec<EventId> = walked[1..].to_vec();
            expected.reverse();
            prop_assert_eq!(&entry.ancestors, &expected);
        }

        // Descendants are exactly the events whose parent walk passes
        // through this one.
        for a in &events {
            let expected: BTreeSet<EventId> = events
                .iter()
                .filter(|b| b.id != a.id)
                .filter(|b| {
                    walk_to_root(&parents, b.id, events.len())
                        .unwrap()
                        .contains(&a.id)
                })
                .map(|b| b.id)
                .collect();
            prop_assert_eq!(&entries[&a.id].descendants, &expected);
        }
    }

    #[test]
    fn rebuild_is_pure(events in tree_strategy(false)) {
        let first = ChainTree::build(&events).unwrap();
        let second = ChainTree::build(&events).unwrap();
        prop_assert_eq!(first.root, second.root);
        prop_assert_eq!(first.index.entries(), second.index.entries());
    }

    /// Same-chain attaches either get rejected, or the simulated mutation
    /// leaves every parent walk terminating — nobody becomes their own
    /// ancestor.
    #[test]
    fn accepted_attaches_never_create_cycles(
        (events, target_pick, candidate_picks) in tree_strategy(true).prop_flat_map(|events| {
            let n = events.len();
            (
                Just(events),
                0..n,
                prop::collection::vec(any::<prop::sample::Index>(), 1..=3),
            )
        })
    ) {
        let target = events[target_pick].clone();
        let mut candidate_ids = BTreeSet::new();
        let mut candidates: Vec<Event> = Vec::new();
        for pick in candidate_picks {
            let event = &events[pick.index(events.len())];
            if event.id != target.id && candidate_ids.insert(event.id) {
                candidates.push(event.clone());
            }
        }
        prop_assume!(!candidates.is_empty());

        let mut members = HashMap::new();
        members.insert(the_chain(), events.clone());
        let tree = ChainTree::build(&events).unwrap();

        match validate_attach(&target, &candidates, &members) {
            Ok(retag) => {
                // Retag covers each candidate and its full closure.
                for candidate in &candidates {
                    prop_assert!(retag.contains(&candidate.id));
                    for descendant in tree.index.descendants_of(candidate.id).unwrap() {
                        prop_assert!(retag.contains(&descendant));
                    }
                }
                // Simulate: candidates re-point at the target, everything
                // else keeps its parent.
                let parents: HashMap<EventId, Option<EventId>> = events
                    .iter()
                    .map(|e| {
                        let parent = if candidate_ids.contains(&e.id) {
                            Some(target.id)
                        } else {
                            e.parent_id
                        };
                        (e.id, parent)
                    })
                    .collect();
                for event in &events {
                    prop_assert!(
                        walk_to_root(&parents, event.id, events.len()).is_some(),
                        "parent walk from {} no longer terminates",
                        event.id
                    );
                }
            }
            Err(ValidateError::Cycle(conflict)) => {
                // Rejection happens exactly when some candidate's closure
                // intersects the target's ancestor chain.
                let target_ancestors: BTreeSet<EventId> = tree
                    .index
                    .ancestors_of(target.id)
                    .unwrap()
                    .into_iter()
                    .collect();
                prop_assert!(!conflict.conflicts.is_empty());
                let intersects = candidates.iter().any(|candidate| {
                    let mut closure = vec![candidate.id];
                    closure.extend(tree.index.descendants_of(candidate.id).unwrap());
                    closure.iter().any(|id| target_ancestors.contains(id))
                });
                prop_assert!(intersects);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
        }
    }
}
