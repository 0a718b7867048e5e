//! API layer -- axum routes, handlers, and middleware.

mod error;
mod routes;
pub mod state;

use self::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Build the application router with all API routes.
///
/// Task endpoints live under `/api/v1`; screenshots are served directly at
/// `/screenshots/{filename}` because stored result records reference them
/// by that path.
pub fn router(state: AppState) -> Router {
    let screenshots = ServeDir::new(state.registry.screenshots_dir());
    Router::new()
        .route("/", get(routes::banner))
        .nest("/api/v1", routes::api_routes())
        .nest_service("/screenshots", screenshots)
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
