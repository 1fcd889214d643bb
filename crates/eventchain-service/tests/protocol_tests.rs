//! Response mapping: status codes and the conflict payload shape.

use eventchain_core::{CycleConflict, CycleConflictError, EventId, TreeError};
use eventchain_service::protocol::ApiResponse;
use eventchain_service::{ChainError, InputError};
use eventchain_store::StoreError;
use uuid::Uuid;

fn id(n: u128) -> EventId {
    EventId::from_uuid(Uuid::from_u128(n))
}

#[test]
fn success_is_200_with_no_body() {
    let response = ApiResponse::from_result(&Ok(()));
    assert_eq!(response.status, 200);
    assert!(response.body.is_none());
}

#[test]
fn input_errors_are_400() {
    let response = ApiResponse::from_error(&ChainError::Input(InputError::TooMany(6)));
    assert_eq!(response.status, 400);
    let body = response.body.unwrap();
    assert!(body["error"].as_str().unwrap().contains("limit is 5"));
}

#[test]
fn not_found_is_404_and_names_the_missing_ids() {
    let response = ApiResponse::from_error(&ChainError::NotFound {
        missing: vec![id(7)],
    });
    assert_eq!(response.status, 404);
    let body = response.body.unwrap();
    assert_eq!(body["missing"][0].as_str().unwrap(), id(7).to_string());
}

#[test]
fn cycle_rejection_carries_one_entry_per_conflict() {
    let err = ChainError::Cycle(CycleConflictError {
        conflicts: vec![
            CycleConflict { id: id(1), req_node_id: id(1) },
            CycleConflict { id: id(2), req_node_id: id(1) },
        ],
    });
    let response = ApiResponse::from_error(&err);
    assert_eq!(response.status, 400);

    let body = response.body.unwrap();
    let problems = body["problemEventIds"].as_object().unwrap();
    assert_eq!(problems.len(), 2);

    let entry = &problems[&id(2).to_string()];
    assert_eq!(entry["_id"].as_str().unwrap(), id(2).to_string());
    assert_eq!(entry["reqNodeId"].as_str().unwrap(), id(1).to_string());
    assert!(entry["description"].as_str().unwrap().contains("cycle"));
}

#[test]
fn version_conflict_is_409_other_storage_is_500() {
    let conflict = ChainError::Storage(StoreError::VersionConflict {
        id: id(3),
        expected: 1,
        found: 2,
    });
    assert_eq!(ApiResponse::from_error(&conflict).status, 409);

    let missing = ChainError::Storage(StoreError::EventMissing(id(3)));
    assert_eq!(ApiResponse::from_error(&missing).status, 500);
}

#[test]
fn corrupt_chain_is_500() {
    let err = ChainError::CorruptChain(TreeError::MultipleRoots {
        roots: vec![id(1), id(2)],
    });
    assert_eq!(ApiResponse::from_error(&err).status, 500);
}
