//! Response mapping: structured status + JSON bodies for service outcomes.
//!
//! The service sits behind an HTTP-style boundary owned by someone else;
//! this module is the contract. Every error is recovered here and turned
//! into a response — cycle rejections carry the **full** conflict set keyed
//! by event id, so a caller can fix every problem in one correction pass.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use eventchain_core::{CycleConflictError, EventId};
use eventchain_store::StoreError;

use crate::ChainError;

/// One entry of the `problemEventIds` conflict payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemEvent {
    #[serde(rename = "_id")]
    pub id: EventId,
    /// The requested child whose subtree dragged `id` into the cycle.
    #[serde(rename = "reqNodeId")]
    pub req_node_id: EventId,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictBody {
    #[serde(rename = "problemEventIds")]
    pub problem_event_ids: BTreeMap<String, ProblemEvent>,
}

impl ConflictBody {
    pub fn from_conflicts(err: &CycleConflictError) -> Self {
        let problem_event_ids = err
            .conflicts
            .iter()
            .map(|conflict| {
                (
                    conflict.id.to_string(),
                    ProblemEvent {
                        id: conflict.id,
                        req_node_id: conflict.req_node_id,
                        description: format!(
                            "cycle: {} is an ancestor of the attach target",
                            conflict.id
                        ),
                    },
                )
            })
            .collect();
        Self { problem_event_ids }
    }
}

/// Status plus optional JSON body, ready for whatever transport hosts the
/// service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    pub fn from_error(err: &ChainError) -> Self {
        match err {
            ChainError::Input(input) => Self {
                status: 400,
                body: Some(error_body(input)),
            },
            ChainError::NotFound { missing } => Self {
                status: 404,
                body: Some(serde_json::json!({
                    "error": "not found",
                    "missing": missing,
                })),
            },
            ChainError::Cycle(conflicts) => Self {
                status: 400,
                body: serde_json::to_value(ConflictBody::from_conflicts(conflicts)).ok(),
            },
            ChainError::CorruptChain(tree) => Self {
                status: 500,
                body: Some(error_body(tree)),
            },
            ChainError::Storage(StoreError::VersionConflict { .. }) => Self {
                status: 409,
                body: Some(error_body(err)),
            },
            ChainError::Storage(_) => Self {
                status: 500,
                body: Some(error_body(err)),
            },
        }
    }

    pub fn from_result(result: &Result<(), ChainError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(err) => Self::from_error(err),
        }
    }
}

fn error_body(err: &dyn std::fmt::Display) -> Value {
    serde_json::json!({ "error": format!("{err}") })
}
