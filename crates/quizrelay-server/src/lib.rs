pub mod config;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod ws;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
///
/// `/ws` carries the relay protocol, `/health` answers the probe, and
/// everything else is a 404. Browser clients connect cross-origin
/// during development, hence the permissive CORS layer.
pub fn build_app(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .layer(cors)
        .with_state(state.clone());

    (app, state)
}
