//! The JSON wire protocol between relay, host and players.
//!
//! Every frame is a JSON object whose `type` field selects the variant.
//! Inbound decoding is the single choke point where malformed frames
//! are rejected; handlers never see raw JSON except for the fields that
//! are deliberately lenient (`answerData`, question timing fields).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::player::Player;

/// Maximum size of a single inbound frame in bytes. Larger frames are
/// dropped by the connection layer without dispatch.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// The `type` tags a client may send. Used to tell "unknown verb"
/// (logged, dropped) apart from "known verb, broken fields" (error
/// frame to the sender).
const CLIENT_FRAME_TYPES: &[&str] = &[
    "create_room",
    "reconnect_host",
    "restore_room",
    "join",
    "submit_answer",
    "start_question",
    "send_results",
    "terminate",
];

#[derive(Debug)]
pub enum ProtocolError {
    /// Frame is not a JSON object.
    NotAnObject,
    /// Frame has no string `type` field.
    MissingType,
    /// `type` is a string the protocol does not know.
    UnknownType(String),
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::MissingType => write!(f, "frame has no \"type\" field"),
            Self::UnknownType(t) => write!(f, "unknown message type: {t:?}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// One player entry inside a `restore_room` snapshot. The score stays
/// raw JSON here; the restore handler validates and defaults it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPlayer {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: Value,
}

/// A leaderboard row as supplied by the host and echoed to players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: f64,
}

/// Frames sent by clients (host or player).
///
/// Fields default individually so that per-field junk degrades inside
/// the verb's own validation instead of killing the whole frame; the
/// fields typed as [`Value`] are the ones the handlers coerce or drop
/// silently rather than reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    CreateRoom,
    ReconnectHost {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        session_id: String,
    },
    RestoreRoom {
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        session_id: String,
        #[serde(default)]
        players: Vec<SnapshotPlayer>,
    },
    Join {
        #[serde(default)]
        room_code: String,
        #[serde(default)]
        player_name: String,
        #[serde(default)]
        session_id: Option<String>,
    },
    SubmitAnswer {
        #[serde(default)]
        answer_data: Value,
    },
    StartQuestion {
        #[serde(default)]
        question: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default)]
        index: Value,
        #[serde(default)]
        total: Value,
        #[serde(default)]
        duration: Value,
    },
    SendResults {
        #[serde(default)]
        correct: Vec<i64>,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        player_scores: HashMap<String, f64>,
        #[serde(default)]
        leaderboard: Option<Vec<LeaderboardEntry>>,
    },
    Terminate,
}

/// Frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    RoomCreated {
        room_id: String,
        session_id: String,
    },
    HostReconnected {
        room_id: String,
        players: Vec<Player>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_restored: Option<bool>,
    },
    RoomNotFoundTryRestore {
        room_id: String,
        session_id: String,
    },
    Joined {
        session_id: String,
        score: f64,
        player_name: String,
        is_reconnect: bool,
    },
    PlayerJoined {
        session_id: String,
        name: String,
        player_count: usize,
    },
    PlayerReconnected {
        session_id: String,
        name: String,
        score: f64,
        player_count: usize,
    },
    PlayerLeft {
        session_id: String,
        name: String,
        player_count: usize,
    },
    PlayerAnswered {
        session_id: String,
        name: String,
        answer_data: Value,
        answer_time: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    Question {
        question: String,
        options: Vec<String>,
        index: u32,
        total: u32,
        start_time: u64,
        duration: u32,
    },
    Result {
        correct: Vec<i64>,
        is_final: bool,
        question_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leaderboard: Option<Vec<LeaderboardEntry>>,
        player_score: f64,
    },
    QuizTerminated,
    Error {
        message: String,
    },
}

impl ServerFrame {
    /// The standard error frame for a recoverable protocol error.
    pub fn error(kind: ErrorKind) -> Self {
        Self::Error {
            message: kind.message().to_string(),
        }
    }
}

/// Decode one inbound text frame.
///
/// Unparseable JSON, non-objects and missing `type` come back as
/// errors the dispatcher reports to the sender; [`ProtocolError::UnknownType`]
/// is the one case the dispatcher logs and drops instead.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    let ty = value
        .as_object()
        .ok_or(ProtocolError::NotAnObject)?
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !CLIENT_FRAME_TYPES.contains(&ty) {
        return Err(ProtocolError::UnknownType(ty.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Encode an outbound frame to its wire JSON.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}
