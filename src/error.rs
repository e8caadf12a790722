use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::model::Id;

/// Closed error taxonomy surfaced to clients. Every component returns these
/// as values; translation to a wire response happens exactly once, in
/// `IntoResponse` below.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Parse or shape failure, always local to the request.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// Policy rejection; the whole batch is refused before any write.
    #[error("permission denied for {entity_type} (operation {op_index})")]
    PermissionDenied { entity_type: String, op_index: usize },

    /// Optimistic-version mismatch. The client must re-fetch and resubmit;
    /// the server never retries on its own.
    #[error("conflicting concurrent modification of {entity_type} {id}")]
    EntityConflict { entity_type: String, id: Id },

    /// Anything unexpected. Logged in full server-side, reported to the
    /// client as a generic message only.
    #[error("unclassified error")]
    Unclassified(#[from] anyhow::Error),
}

impl SyncError {
    pub fn malformed(message: impl Into<String>) -> Self {
        SyncError::MalformedRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SyncError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::PermissionDenied { .. } => StatusCode::UNAUTHORIZED,
            SyncError::EntityConflict { .. } => StatusCode::CONFLICT,
            SyncError::Unclassified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for the wire. Unclassified failures keep their
    /// detail out of the response body.
    pub fn client_message(&self) -> String {
        match self {
            SyncError::Unclassified(_) => "Unclassified error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<crate::store::traits::StoreError> for SyncError {
    /// Single translation point from repository failures to the closed
    /// taxonomy. A write against an entity a concurrent committer already
    /// removed surfaces as a conflict, like any other lost race.
    fn from(err: crate::store::traits::StoreError) -> Self {
        use crate::store::traits::StoreError;
        match err {
            StoreError::VersionConflict { entity_type, id }
            | StoreError::UnknownEntity { entity_type, id } => {
                SyncError::EntityConflict { entity_type, id }
            }
            StoreError::UnknownType(entity_type) => {
                SyncError::malformed(format!("unknown entity type {entity_type}"))
            }
            StoreError::Backend(cause) => SyncError::Unclassified(cause),
        }
    }
}

impl IntoResponse for SyncError {
    /// Error payloads use the bare serialization mode: a single message
    /// field, none of the augmentation metadata normal responses carry. The
    /// originating cause is logged here before it is dropped.
    fn into_response(self) -> Response {
        match &self {
            SyncError::Unclassified(cause) => {
                log::error!("unclassified failure: {cause:#}");
            }
            other => {
                log::error!("request failed: {other}");
            }
        }
        let body = crate::logic::refresh::bare_message(&self.client_message());
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            SyncError::malformed("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SyncError::PermissionDenied {
                entity_type: "Person".to_string(),
                op_index: 0
            }
            .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SyncError::EntityConflict {
                entity_type: "Person".to_string(),
                id: "7".to_string()
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SyncError::Unclassified(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unclassified_detail_stays_out_of_client_message() {
        let err = SyncError::Unclassified(anyhow::anyhow!("connection pool exhausted"));
        assert_eq!(err.client_message(), "Unclassified error");

        let conflict = SyncError::EntityConflict {
            entity_type: "Person".to_string(),
            id: "7".to_string(),
        };
        assert!(conflict.client_message().contains("Person"));
    }
}
