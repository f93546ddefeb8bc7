// routes.rs
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, AppState};

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/events/{event_id}/poll",
            post(handlers::create_poll).get(handlers::get_poll),
        )
        .route("/events/{event_id}/poll/votes", post(handlers::vote))
        .route("/events/{event_id}/poll/options", post(handlers::add_option))
        .route("/events/{event_id}/poll/close", post(handlers::close_poll))
        .route("/events/{event_id}/poll/stream", get(handlers::stream_poll))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
