//! Process-wide room registry and per-room state.
//!
//! The whole registry lives behind one `RwLock` (see [`crate::state`]),
//! so room lookup, creation and deletion are atomic with respect to
//! each other and two handlers never interleave on the same room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use quizrelay_core::player::Player;
use quizrelay_core::protocol::{ServerFrame, encode_server_frame};
use quizrelay_core::room::generate_room_code;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ROOM_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Outbound handle for one WebSocket connection.
///
/// Frames are enqueued with `try_send` so no handler ever blocks on a
/// slow consumer. A consumer whose queue is full gets disconnected
/// instead of back-pressuring the room.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    /// Process-unique id; disconnect cleanup compares it so a stale
    /// socket can never detach its successor.
    pub conn_id: u64,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::Sender<Message>, cancel: CancellationToken) -> Self {
        Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            cancel,
        }
    }

    /// Enqueue a protocol frame.
    pub fn send(&self, frame: &ServerFrame) {
        match encode_server_frame(frame) {
            Ok(json) => self.send_raw(Message::Text(json.into())),
            Err(e) => tracing::error!(error = %e, "Failed to encode outbound frame"),
        }
    }

    /// Enqueue a pre-built WebSocket message.
    pub fn send_raw(&self, msg: Message) {
        match self.tx.try_send(msg) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = self.conn_id,
                    "Outbound queue full, closing slow connection"
                );
                self.cancel.cancel();
            },
            // Receiver already gone; the connection is on its way out.
            Err(mpsc::error::TrySendError::Closed(_)) => {},
        }
    }

    /// Force-close the underlying connection.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// One live quiz room. Mutated only under the registry write lock.
pub struct Room {
    pub code: String,
    /// Structural identity. Timers capture `(code, instance)` and check
    /// it before acting, so a timer armed for a dead room can never
    /// kill a successor that reuses the code.
    pub instance: u64,
    /// Immutable for the room's lifetime; the host credential.
    pub host_session_id: String,
    pub host: Option<ChannelHandle>,
    /// sessionId → participant. Players are never removed while the
    /// room lives; disconnects only flip `is_connected`.
    pub players: HashMap<String, Player>,
    pub player_channels: HashMap<String, ChannelHandle>,
    /// Wall-clock millis of the current question broadcast, absent
    /// between questions. Server-set; clients cannot influence it.
    pub question_start: Option<u64>,
    pub current_question_index: u32,
    pub expiry_task: Option<JoinHandle<()>>,
    pub grace_task: Option<JoinHandle<()>>,
}

impl Room {
    pub fn new(code: String, host_session_id: String, host: ChannelHandle) -> Self {
        Self {
            code,
            instance: NEXT_ROOM_INSTANCE.fetch_add(1, Ordering::Relaxed),
            host_session_id,
            host: Some(host),
            players: HashMap::new(),
            player_channels: HashMap::new(),
            question_start: None,
            current_question_index: 0,
            expiry_task: None,
            grace_task: None,
        }
    }

    /// Broadcast to every connected player. The frame is encoded once;
    /// the text payload is cheaply cloned across channels.
    pub fn broadcast_to_players(&self, frame: &ServerFrame) {
        match encode_server_frame(frame) {
            Ok(json) => {
                let msg = Message::Text(json.into());
                for ch in self.player_channels.values() {
                    ch.send_raw(msg.clone());
                }
            },
            Err(e) => tracing::error!(room = %self.code, error = %e, "Failed to encode broadcast"),
        }
    }

    /// Send to the host, if one is attached.
    pub fn notify_host(&self, frame: &ServerFrame) {
        if let Some(host) = &self.host {
            host.send(frame);
        }
    }

    /// Snapshot of the player table for `host_reconnected` responses.
    pub fn player_list(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }
}

/// `roomCode → Room` for every live room in the process.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a code no live room uses and insert the room built from it.
    /// Returns the code. Collisions retry; with 36^4 codes against a
    /// few hundred rooms the loop terminates fast.
    pub fn insert_with_fresh_code(&mut self, build: impl FnOnce(String) -> Room) -> String {
        let code = loop {
            let candidate = generate_room_code();
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        self.rooms.insert(code.clone(), build(code.clone()));
        code
    }

    /// Insert a room under its own code. The caller must hold the write
    /// lock across the free-check and this call.
    pub fn insert(&mut self, room: Room) {
        self.rooms.insert(room.code.clone(), room);
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Remove and return the room, aborting its timers.
    pub fn remove(&mut self, code: &str) -> Option<Room> {
        let room = self.rooms.remove(code)?;
        if let Some(task) = &room.expiry_task {
            task.abort();
        }
        if let Some(task) = &room.grace_task {
            task.abort();
        }
        Some(room)
    }

    pub fn codes(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    /// (rooms, players) for logging.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.rooms.len(),
            self.rooms.values().map(|r| r.players.len()).sum(),
        )
    }
}
