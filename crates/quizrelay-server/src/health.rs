use axum::extract::State;

use crate::state::AppState;

/// Liveness probe: a bare 200 with body `ok`. Room and connection
/// counts go to the log so the probe response stays byte-stable for
/// the load balancer.
pub async fn health_check(State(state): State<AppState>) -> &'static str {
    let (rooms, players) = {
        let registry = state.registry.read().await;
        registry.stats()
    };
    tracing::debug!(
        connections = state
            .ws_connection_count
            .load(std::sync::atomic::Ordering::Relaxed),
        rooms,
        players,
        "Health check"
    );
    "ok"
}
