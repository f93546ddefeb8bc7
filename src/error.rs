use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::GateError;
use crate::store::StoreError;

/// Errors returned by every decision engine operation.
///
/// `AlreadyVoted` and `Tie` can be retried with different input;
/// `NotFound` cannot.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("A poll already exists for this event")]
    PollExists { poll_id: Uuid },

    #[error("You have already voted in this poll")]
    AlreadyVoted,

    #[error("Poll ended in a tie")]
    Tie { tied_option_ids: Vec<Uuid> },

    #[error("{0}")]
    InvalidState(&'static str),

    #[error("{0}")]
    InvalidArgument(&'static str),

    #[error("Member is not an accepted participant of this event")]
    NotAccepted,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PollError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::PollExists { .. } | PollError::AlreadyVoted | PollError::Tie { .. } => {
                StatusCode::CONFLICT
            }
            PollError::InvalidState(_) => StatusCode::CONFLICT,
            PollError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            PollError::NotAccepted => StatusCode::FORBIDDEN,
            PollError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for PollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PollNotOpen => PollError::InvalidState("Poll is closed"),
            StoreError::PollMissing => PollError::NotFound("Poll"),
            StoreError::OrderOutOfRange => PollError::InvalidArgument("Option order out of range"),
            other => PollError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<GateError> for PollError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotAccepted => PollError::NotAccepted,
            GateError::Lookup(e) => PollError::Internal(e),
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            PollError::PollExists { poll_id } => json!({
                "error": self.to_string(),
                "pollId": poll_id,
            }),
            PollError::Tie { tied_option_ids } => json!({
                "error": self.to_string(),
                "tiedOptionIds": tied_option_ids,
            }),
            PollError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                json!({ "error": "Internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
