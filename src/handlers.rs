// handlers.rs
use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use http::StatusCode;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::engine::DecisionEngine;
use crate::error::PollError;
use crate::models::{
    AddOptionRequest, ClosePollRequest, CreatePollRequest, PollOption, PollWithOptions,
    VoteReceipt, VoteRequest,
};
use crate::notifier::BroadcastNotifier;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: DecisionEngine,
    pub notifier: BroadcastNotifier,
    /// `None` when running on the in-memory store.
    pub db_pool: Option<PgPool>,
}

/// Create the poll for an event
pub async fn create_poll(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollWithOptions>), PollError> {
    let poll = state
        .engine
        .create_poll(event_id, req.options, req.closes_at)
        .await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// Get the current poll state
pub async fn get_poll(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<PollWithOptions>, PollError> {
    Ok(Json(state.engine.get_poll(event_id).await?))
}

/// Vote for an option
pub async fn vote(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<VoteReceipt>, PollError> {
    let receipt = state
        .engine
        .submit_vote(event_id, req.option_id, req.voter_id)
        .await?;
    Ok(Json(receipt))
}

/// Add an option to an open poll
pub async fn add_option(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Json(req): Json<AddOptionRequest>,
) -> Result<(StatusCode, Json<PollOption>), PollError> {
    let option = state
        .engine
        .add_option(event_id, req.label, req.order, req.member_id)
        .await?;
    Ok((StatusCode::CREATED, Json(option)))
}

/// Close the poll, optionally forcing the winner
pub async fn close_poll(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<PollWithOptions>, PollError> {
    // The body is optional; an empty one means "no override".
    let req: ClosePollRequest = if body.is_empty() {
        ClosePollRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|_| PollError::InvalidArgument("Invalid close request body"))?
    };
    let poll = state
        .engine
        .close_poll(event_id, req.final_option_id)
        .await?;
    Ok(Json(poll))
}

/// Live poll updates for one event as server-sent events
pub async fn stream_poll(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe();

    let connected =
        stream::once(async { Ok::<_, Infallible>(Event::default().event("connected").data("ok")) });

    let events = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.event_id() == event_id => Event::default()
                .event(event.name())
                .json_data(&event)
                .ok()
                .map(Ok),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(n)) => Event::default()
                .event("lagged")
                .json_data(json!({ "missed": n }))
                .ok()
                .map(Ok),
        }
    });

    Sse::new(connected.chain(events)).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: String,
}

/// Health check: 200 when the database answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let Some(pool) = &state.db_pool else {
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "in-memory".to_string(),
            }),
        );
    };

    match tokio::time::timeout(
        Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(pool),
    )
    .await
    {
        Ok(Ok(_)) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok".to_string(),
            }),
        ),
        Ok(Err(e)) => {
            warn!(error = %e, "health check query failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "error",
                    database: "Query failed".to_string(),
                }),
            )
        }
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "error",
                database: "Query timeout (>5s)".to_string(),
            }),
        ),
    }
}
