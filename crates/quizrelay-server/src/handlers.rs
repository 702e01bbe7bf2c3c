//! The eight protocol verbs.
//!
//! Each handler acquires the registry lock, finishes its room mutation
//! and enqueues every outbound frame before yielding (sends are
//! `try_send`, never awaited), so observed room state never reflects a
//! partial handler.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use quizrelay_core::error::ErrorKind;
use quizrelay_core::player::Player;
use quizrelay_core::protocol::{ClientFrame, LeaderboardEntry, ServerFrame, SnapshotPlayer};
use quizrelay_core::room::MAX_PLAYERS_PER_ROOM;
use quizrelay_core::sanitize::{
    MAX_ANSWER_OPTIONS, MAX_OPTION_CHARS, MAX_QUESTION_CHARS, coerce_duration, coerce_index,
    coerce_total, is_valid_answer_data, is_valid_score, normalize_room_code, sanitize_name,
};
use quizrelay_core::session::{is_valid_session_id, mint_session_id};
use quizrelay_core::time::now_millis;

use crate::lifecycle;
use crate::registry::{ChannelHandle, Room, RoomRegistry};
use crate::state::AppState;

/// What a connection is currently bound to. A channel earns its role
/// through `create_room`/`reconnect_host`/`restore_room` (host) or
/// `join` (player); the dispatcher checks it on every stateful verb.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    None,
    Host {
        room_code: String,
        session_id: String,
    },
    Player {
        room_code: String,
        session_id: String,
    },
}

/// Per-connection dispatcher state.
pub struct ConnCtx {
    pub handle: ChannelHandle,
    pub binding: Binding,
    last_restore: Option<Instant>,
}

impl ConnCtx {
    pub fn new(handle: ChannelHandle) -> Self {
        Self {
            handle,
            binding: Binding::None,
            last_restore: None,
        }
    }

    fn send_error(&self, kind: ErrorKind) {
        self.handle.send(&ServerFrame::error(kind));
    }
}

/// Route one decoded frame to its handler.
pub async fn dispatch(state: &AppState, conn: &mut ConnCtx, frame: ClientFrame) {
    match frame {
        ClientFrame::CreateRoom => create_room(state, conn).await,
        ClientFrame::ReconnectHost {
            room_id,
            session_id,
        } => reconnect_host(state, conn, room_id, session_id).await,
        ClientFrame::RestoreRoom {
            room_id,
            session_id,
            players,
        } => restore_room(state, conn, room_id, session_id, players).await,
        ClientFrame::Join {
            room_code,
            player_name,
            session_id,
        } => join(state, conn, room_code, player_name, session_id).await,
        ClientFrame::SubmitAnswer { answer_data } => submit_answer(state, conn, answer_data).await,
        ClientFrame::StartQuestion {
            question,
            options,
            index,
            total,
            duration,
        } => start_question(state, conn, question, options, index, total, duration).await,
        ClientFrame::SendResults {
            correct,
            is_final,
            player_scores,
            leaderboard,
        } => send_results(state, conn, correct, is_final, player_scores, leaderboard).await,
        ClientFrame::Terminate => terminate(state, conn).await,
    }
}

/// Attach `conn` as the room's host: cancel any pending grace timer,
/// displace a stale host channel and answer with the player table.
fn attach_host(room: &mut Room, conn: &mut ConnCtx, is_restored: Option<bool>) {
    if let Some(task) = room.grace_task.take() {
        task.abort();
    }
    if let Some(old) = room.host.replace(conn.handle.clone())
        && old.conn_id != conn.handle.conn_id
    {
        old.close();
    }
    conn.binding = Binding::Host {
        room_code: room.code.clone(),
        session_id: room.host_session_id.clone(),
    };
    conn.handle.send(&ServerFrame::HostReconnected {
        room_id: room.code.clone(),
        players: room.player_list(),
        is_restored,
    });
}

/// Resolve the room for a host-only verb. Returns `None` (the caller
/// stays silent) unless the sender is bound as host of a live room and
/// its credential still matches.
fn host_room<'a>(registry: &'a mut RoomRegistry, conn: &ConnCtx) -> Option<&'a mut Room> {
    let Binding::Host {
        room_code,
        session_id,
    } = &conn.binding
    else {
        return None;
    };
    let room = registry.get_mut(room_code)?;
    (room.host_session_id == *session_id).then_some(room)
}

async fn create_room(state: &AppState, conn: &mut ConnCtx) {
    if conn.binding != Binding::None {
        conn.send_error(ErrorKind::AlreadyHostingRoom);
        return;
    }

    let session_id = mint_session_id();
    let mut registry = state.registry.write().await;
    let code = registry.insert_with_fresh_code(|code| {
        Room::new(code, session_id.clone(), conn.handle.clone())
    });
    if let Some(room) = registry.get_mut(&code) {
        room.expiry_task = Some(lifecycle::arm_expiry_timer(state, code.clone(), room.instance));
    }
    drop(registry);

    conn.binding = Binding::Host {
        room_code: code.clone(),
        session_id: session_id.clone(),
    };
    conn.handle.send(&ServerFrame::RoomCreated {
        room_id: code.clone(),
        session_id,
    });
    tracing::info!(room = %code, conn_id = conn.handle.conn_id, "Room created");
}

async fn reconnect_host(state: &AppState, conn: &mut ConnCtx, room_id: String, session_id: String) {
    let code = normalize_room_code(&room_id);
    let mut registry = state.registry.write().await;
    let room = code.as_deref().and_then(|c| registry.get_mut(c));

    match room {
        None => {
            drop(registry);
            if is_valid_session_id(&session_id) {
                // Cue the client to rebuild the room from its snapshot.
                conn.handle.send(&ServerFrame::RoomNotFoundTryRestore {
                    room_id,
                    session_id,
                });
            } else {
                conn.send_error(ErrorKind::RoomNotFound);
            }
        },
        Some(room) if room.host_session_id != session_id => {
            drop(registry);
            conn.send_error(ErrorKind::InvalidSession);
        },
        Some(room) => {
            attach_host(room, conn, None);
            tracing::info!(room = %room.code, "Host reconnected");
        },
    }
}

async fn restore_room(
    state: &AppState,
    conn: &mut ConnCtx,
    room_id: String,
    session_id: String,
    snapshot: Vec<SnapshotPlayer>,
) {
    let min_interval =
        std::time::Duration::from_secs(state.config.limits.restore_min_interval_secs);
    if let Some(last) = conn.last_restore
        && last.elapsed() < min_interval
    {
        conn.send_error(ErrorKind::RestoreRateLimited);
        return;
    }
    conn.last_restore = Some(Instant::now());

    if !is_valid_session_id(&session_id) {
        conn.send_error(ErrorKind::InvalidSession);
        return;
    }

    let requested = normalize_room_code(&room_id);
    let mut registry = state.registry.write().await;

    // The room survived after all (or came back between the host's
    // retries): a matching credential degenerates to a plain reconnect,
    // a foreign one means the code now belongs to someone else and we
    // mint a fresh one below.
    if let Some(code) = &requested
        && let Some(room) = registry.get_mut(code)
    {
        if room.host_session_id == session_id {
            attach_host(room, conn, None);
            tracing::info!(room = %code, "Restore degenerated to host reconnect");
            return;
        }
        tracing::warn!(room = %code, "Restore hit a foreign room, minting a fresh code");
    }

    let mut players: HashMap<String, Player> = HashMap::new();
    for entry in snapshot.into_iter().take(MAX_PLAYERS_PER_ROOM) {
        if !is_valid_session_id(&entry.id) {
            continue;
        }
        let score = entry
            .score
            .as_f64()
            .filter(|s| is_valid_score(*s))
            .unwrap_or(0.0);
        players.insert(
            entry.id.clone(),
            Player {
                session_id: entry.id,
                name: sanitize_name(&entry.name),
                score,
                is_connected: false,
            },
        );
    }
    let restored_count = players.len();

    let build = |code: String| {
        let mut room = Room::new(code, session_id.clone(), conn.handle.clone());
        room.players = players;
        room
    };
    let code = match requested {
        Some(code) if !registry.contains(&code) => {
            registry.insert(build(code.clone()));
            code
        },
        _ => registry.insert_with_fresh_code(build),
    };
    if let Some(room) = registry.get_mut(&code) {
        room.expiry_task = Some(lifecycle::arm_expiry_timer(state, code.clone(), room.instance));
        attach_host(room, conn, Some(true));
    }
    drop(registry);

    tracing::info!(
        room = %code,
        players = restored_count,
        "Room restored from host snapshot"
    );
}

async fn join(
    state: &AppState,
    conn: &mut ConnCtx,
    room_code: String,
    player_name: String,
    session_id: Option<String>,
) {
    if matches!(conn.binding, Binding::Host { .. }) {
        conn.send_error(ErrorKind::AlreadyHostingRoom);
        return;
    }

    let Some(code) = normalize_room_code(&room_code) else {
        conn.send_error(ErrorKind::RoomNotFound);
        return;
    };

    let mut registry = state.registry.write().await;

    // A channel hopping rooms first leaves its old one.
    if let Binding::Player {
        room_code: old_code,
        session_id: old_sid,
    } = conn.binding.clone()
    {
        detach_player(&mut registry, conn, &old_code, &old_sid);
        conn.binding = Binding::None;
    }

    let Some(room) = registry.get_mut(&code) else {
        drop(registry);
        conn.send_error(ErrorKind::RoomNotFound);
        return;
    };

    // Reconnect path: a well-formed session id that maps to a player of
    // this room rebinds the channel to that player.
    let existing = session_id.filter(|s| is_valid_session_id(s));
    if let Some(sid) = existing
        && let Some(player) = room.players.get_mut(&sid)
    {
        player.is_connected = true;
        let name = player.name.clone();
        let score = player.score;
        if let Some(old) = room.player_channels.insert(sid.clone(), conn.handle.clone())
            && old.conn_id != conn.handle.conn_id
        {
            old.close();
        }
        let player_count = room.players.len();
        conn.handle.send(&ServerFrame::Joined {
            session_id: sid.clone(),
            score,
            player_name: name.clone(),
            is_reconnect: true,
        });
        room.notify_host(&ServerFrame::PlayerReconnected {
            session_id: sid.clone(),
            name,
            score,
            player_count,
        });
        conn.binding = Binding::Player {
            room_code: code.clone(),
            session_id: sid,
        };
        tracing::debug!(room = %code, "Player reconnected");
        return;
    }

    // New player.
    if room.players.len() >= MAX_PLAYERS_PER_ROOM {
        drop(registry);
        conn.send_error(ErrorKind::RoomFull);
        return;
    }
    let sid = mint_session_id();
    let name = sanitize_name(&player_name);
    room.players
        .insert(sid.clone(), Player::new(sid.clone(), name.clone()));
    room.player_channels.insert(sid.clone(), conn.handle.clone());
    let player_count = room.players.len();
    conn.handle.send(&ServerFrame::Joined {
        session_id: sid.clone(),
        score: 0.0,
        player_name: name.clone(),
        is_reconnect: false,
    });
    room.notify_host(&ServerFrame::PlayerJoined {
        session_id: sid.clone(),
        name,
        player_count,
    });
    conn.binding = Binding::Player {
        room_code: code.clone(),
        session_id: sid,
    };
    tracing::debug!(room = %code, player_count, "Player joined");
}

async fn submit_answer(state: &AppState, conn: &mut ConnCtx, answer_data: Value) {
    let Binding::Player {
        room_code,
        session_id,
    } = conn.binding.clone()
    else {
        conn.send_error(ErrorKind::RoomNotActive);
        return;
    };

    if !is_valid_answer_data(&answer_data) {
        tracing::debug!(room = %room_code, "Dropping invalid answerData");
        return;
    }

    let registry = state.registry.read().await;
    let Some(room) = registry.get(&room_code) else {
        drop(registry);
        conn.send_error(ErrorKind::RoomNotActive);
        return;
    };
    let Some(player) = room.players.get(&session_id) else {
        drop(registry);
        conn.send_error(ErrorKind::PlayerNotFound);
        return;
    };

    // The server clock is authoritative; any client-supplied timing is
    // ignored so answers cannot be backdated.
    let answer_time = now_millis();
    let elapsed_ms = room
        .question_start
        .map(|start| answer_time.saturating_sub(start));
    room.notify_host(&ServerFrame::PlayerAnswered {
        session_id,
        name: player.name.clone(),
        answer_data,
        answer_time,
        elapsed_ms,
    });
}

async fn start_question(
    state: &AppState,
    conn: &mut ConnCtx,
    question: String,
    options: Vec<String>,
    index: Value,
    total: Value,
    duration: Value,
) {
    // Overlength payloads drop the whole message without state change.
    if question.chars().count() > MAX_QUESTION_CHARS
        || options.len() > MAX_ANSWER_OPTIONS
        || options.iter().any(|o| o.chars().count() > MAX_OPTION_CHARS)
    {
        tracing::debug!("Dropping oversized start_question");
        return;
    }
    let index = coerce_index(&index);
    let total = coerce_total(&total);
    let duration = coerce_duration(&duration);

    let mut registry = state.registry.write().await;
    let Some(room) = host_room(&mut registry, conn) else {
        return;
    };

    let start_time = now_millis();
    room.question_start = Some(start_time);
    room.current_question_index = index;
    room.broadcast_to_players(&ServerFrame::Question {
        question,
        options,
        index,
        total,
        start_time,
        duration,
    });
    tracing::debug!(room = %room.code, index, duration, "Question broadcast");
}

async fn send_results(
    state: &AppState,
    conn: &mut ConnCtx,
    correct: Vec<i64>,
    is_final: bool,
    player_scores: HashMap<String, f64>,
    leaderboard: Option<Vec<LeaderboardEntry>>,
) {
    let mut registry = state.registry.write().await;
    let Some(room) = host_room(&mut registry, conn) else {
        return;
    };

    for (sid, score) in &player_scores {
        if is_valid_score(*score)
            && let Some(player) = room.players.get_mut(sid)
        {
            player.score = *score;
        }
    }

    let leaderboard = leaderboard.map(|entries| {
        entries
            .into_iter()
            .take(MAX_PLAYERS_PER_ROOM)
            .map(|e| LeaderboardEntry {
                name: sanitize_name(&e.name),
                score: if is_valid_score(e.score) { e.score } else { 0.0 },
            })
            .collect::<Vec<_>>()
    });

    let question_index = room.current_question_index;
    for (sid, channel) in &room.player_channels {
        let Some(player) = room.players.get(sid) else {
            continue;
        };
        channel.send(&ServerFrame::Result {
            correct: correct.clone(),
            is_final,
            question_index,
            leaderboard: leaderboard.clone(),
            player_score: player.score,
        });
    }
    // The round is over; answers submitted from here on carry no elapsed time.
    room.question_start = None;
}

async fn terminate(state: &AppState, conn: &mut ConnCtx) {
    let mut registry = state.registry.write().await;
    let Some(code) = host_room(&mut registry, conn).map(|room| room.code.clone()) else {
        return;
    };
    lifecycle::terminate_room(&mut registry, &code, "host terminated");
    drop(registry);
    // The channel may start over with a fresh room.
    conn.binding = Binding::None;
}

/// Connection teardown, invoked by the connection layer once the read
/// loop ends. Hosts get a grace period; players are only marked
/// disconnected.
pub async fn handle_disconnect(state: &AppState, conn: &ConnCtx) {
    match &conn.binding {
        Binding::None => {},
        Binding::Host { room_code, .. } => {
            let mut registry = state.registry.write().await;
            if let Some(room) = registry.get_mut(room_code)
                && room
                    .host
                    .as_ref()
                    .is_some_and(|h| h.conn_id == conn.handle.conn_id)
            {
                room.host = None;
                room.grace_task = Some(lifecycle::arm_grace_timer(
                    state,
                    room_code.clone(),
                    room.instance,
                ));
                tracing::info!(room = %room_code, "Host disconnected, grace timer armed");
            }
        },
        Binding::Player {
            room_code,
            session_id,
        } => {
            let mut registry = state.registry.write().await;
            detach_player(&mut registry, conn, room_code, session_id);
        },
    }
}

fn detach_player(registry: &mut RoomRegistry, conn: &ConnCtx, room_code: &str, session_id: &str) {
    let Some(room) = registry.get_mut(room_code) else {
        return;
    };
    // Only detach our own channel; a reconnect may already have
    // replaced it with a newer socket.
    if !room
        .player_channels
        .get(session_id)
        .is_some_and(|c| c.conn_id == conn.handle.conn_id)
    {
        return;
    }
    room.player_channels.remove(session_id);
    let name = match room.players.get_mut(session_id) {
        Some(player) => {
            player.is_connected = false;
            player.name.clone()
        },
        None => String::new(),
    };
    let player_count = room.players.len();
    room.notify_host(&ServerFrame::PlayerLeft {
        session_id: session_id.to_string(),
        name,
        player_count,
    });
    tracing::debug!(room = %room_code, "Player disconnected");
}
