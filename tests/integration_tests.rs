//! Workspace integration: core, store, and service working one story
//! end to end — grow a chain, merge another into it, inspect, reset.

use std::sync::Arc;

use eventchain_core::{Event, EventId, OwnerId};
use eventchain_service::protocol::ApiResponse;
use eventchain_service::{ChainError, ChainService};
use eventchain_store::MemoryStore;
use uuid::Uuid;

fn id(n: u128) -> EventId {
    EventId::from_uuid(Uuid::from_u128(n))
}

fn owner() -> OwnerId {
    OwnerId::from_uuid(Uuid::from_u128(0xA11CE))
}

fn ev(n: u128, title: &str) -> Event {
    let mut event = Event::new(owner(), title);
    event.id = id(n);
    event
}

#[tokio::test]
async fn a_chain_grows_merges_and_resets() {
    // Six loose events: a release plan and a separate incident thread.
    let store = Arc::new(MemoryStore::with_events([
        ev(1, "release 2.4"),
        ev(2, "cut branch"),
        ev(3, "deploy staging"),
        ev(4, "incident 812"),
        ev(5, "rollback"),
        ev(6, "postmortem"),
    ]));
    let service = ChainService::new(Arc::clone(&store));

    // Grow the release chain: 1 -> {2, 3}.
    service
        .attach_children(owner(), id(1), &[id(2), id(3)])
        .await
        .unwrap();
    // Build the incident thread: 4 -> 5 -> 6.
    service.attach_children(owner(), id(4), &[id(5)]).await.unwrap();
    service.attach_children(owner(), id(5), &[id(6)]).await.unwrap();
    assert_eq!(store.chains_snapshot().len(), 2);

    // Merge the incident thread under the staging deploy.
    service.attach_children(owner(), id(3), &[id(4)]).await.unwrap();

    // One chain remains in use; the whole thread moved over intact.
    let release_chain = store.event(id(1)).unwrap().chain_id.unwrap();
    for n in 1..=6 {
        assert_eq!(store.event(id(n)).unwrap().chain_id, Some(release_chain));
    }
    assert_eq!(store.event(id(4)).unwrap().parent_id, Some(id(3)));
    assert_eq!(store.event(id(6)).unwrap().parent_id, Some(id(5)));

    // The view sees the merged tree from any member.
    let view = service.chain_of(owner(), id(6)).await.unwrap();
    assert_eq!(view.root, Some(id(1)));
    assert_eq!(view.nodes.len(), 6);
    let postmortem = view.nodes.iter().find(|n| n.id == id(6)).unwrap();
    assert_eq!(postmortem.ancestors, vec![id(1), id(3), id(4), id(5)]);

    // Re-attaching an ancestor under its descendant is refused with the
    // protocol payload, and nothing changes.
    let before = store.events_snapshot();
    let result = service.attach_children(owner(), id(6), &[id(1)]).await;
    assert!(matches!(result, Err(ChainError::Cycle(_))));
    let response = ApiResponse::from_result(&result);
    assert_eq!(response.status, 400);
    let body = response.body.unwrap();
    assert!(body["problemEventIds"]
        .as_object()
        .unwrap()
        .contains_key(&id(1).to_string()));
    assert_eq!(store.events_snapshot(), before);

    // Ops reset: back to six loose events.
    let summary = service.reset_chains().await.unwrap();
    assert_eq!(summary.events_cleared, 6);
    assert_eq!(summary.chains_deleted, 2);
    for n in 1..=6 {
        let event = store.event(id(n)).unwrap();
        assert_eq!(event.parent_id, None);
        assert_eq!(event.chain_id, None);
    }
    assert!(store.history_snapshot().is_empty());
}
