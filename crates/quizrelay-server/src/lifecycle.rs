//! Room lifetime management: expiry, host-disconnect grace, shutdown.
//!
//! Timers are plain tokio tasks that capture `(code, instance)` and
//! re-check both under the registry write lock before acting, so a
//! timer armed for a room that has since died (and whose code may have
//! been re-minted) is a no-op.

use std::time::Duration;

use tokio::task::JoinHandle;

use quizrelay_core::protocol::ServerFrame;

use crate::registry::RoomRegistry;
use crate::state::AppState;

/// Tear a room down: `quiz_terminated` to everyone, timers aborted,
/// entry removed. `reason` only affects logging.
pub fn terminate_room(registry: &mut RoomRegistry, code: &str, reason: &str) {
    let Some(room) = registry.remove(code) else {
        return;
    };
    room.broadcast_to_players(&ServerFrame::QuizTerminated);
    room.notify_host(&ServerFrame::QuizTerminated);
    tracing::info!(
        room = %code,
        reason,
        players = room.players.len(),
        "Room terminated"
    );
}

/// Arm the room-expiry timer (2 h by default). Fires once; the
/// instance check guards against the code having been re-minted.
pub fn arm_expiry_timer(state: &AppState, code: String, instance: u64) -> JoinHandle<()> {
    let state = state.clone();
    let max_age = Duration::from_secs(state.config.limits.room_max_age_secs);
    tokio::spawn(async move {
        tokio::time::sleep(max_age).await;
        let mut registry = state.registry.write().await;
        if registry.get(&code).is_some_and(|r| r.instance == instance) {
            terminate_room(&mut registry, &code, "max age reached");
        }
    })
}

/// Arm the host-disconnect grace timer (5 min by default). A successful
/// `reconnect_host` aborts it; if it fires with the host still gone,
/// the room is terminated.
pub fn arm_grace_timer(state: &AppState, code: String, instance: u64) -> JoinHandle<()> {
    let state = state.clone();
    let grace = Duration::from_secs(state.config.limits.host_disconnect_grace_secs);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let mut registry = state.registry.write().await;
        if registry
            .get(&code)
            .is_some_and(|r| r.instance == instance && r.host.is_none())
        {
            terminate_room(&mut registry, &code, "host disconnect grace elapsed");
        }
    })
}

/// Graceful-shutdown fan-out: every room gets `quiz_terminated` and is
/// removed; connection teardown follows via the shutdown token.
pub async fn shutdown_all_rooms(state: &AppState) {
    let mut registry = state.registry.write().await;
    let codes = registry.codes();
    let count = codes.len();
    for code in codes {
        terminate_room(&mut registry, &code, "server shutdown");
    }
    if count > 0 {
        tracing::info!(rooms = count, "All rooms terminated for shutdown");
    }
}
