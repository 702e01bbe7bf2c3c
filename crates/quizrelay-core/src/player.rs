use serde::{Deserialize, Serialize};

/// A quiz participant as tracked by the relay. The same shape ships in
/// `host_reconnected` player lists, so the host sees exactly what the
/// server holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub session_id: String,
    pub name: String,
    /// Authoritative value lives on the host; mirrored here so
    /// reconnecting players and hosts get their standings back.
    pub score: f64,
    pub is_connected: bool,
}

impl Player {
    /// A freshly joined player: zero score, connected.
    pub fn new(session_id: String, name: String) -> Self {
        Self {
            session_id,
            name,
            score: 0.0,
            is_connected: true,
        }
    }
}
