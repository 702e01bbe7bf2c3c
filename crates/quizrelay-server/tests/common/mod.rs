use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use quizrelay_server::build_app;
use quizrelay_server::config::{LimitsConfig, ServerConfig};
use quizrelay_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with production limits.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    /// Start a test server with custom limits (tests shrink the timers).
    pub async fn with_limits(limits: LimitsConfig) -> Self {
        Self::from_config(ServerConfig {
            limits,
            ..ServerConfig::default()
        })
        .await
    }

    async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _server: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send one JSON frame.
pub async fn send_json(stream: &mut WsStream, frame: Value) {
    stream.send(Message::text(frame.to_string())).await.unwrap();
}

/// Send a raw text frame (for malformed payloads).
pub async fn send_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::text(text)).await.unwrap();
}

/// Read the next JSON frame (5 s timeout).
pub async fn read_json(stream: &mut WsStream) -> Value {
    try_read_json(stream, 5000)
        .await
        .expect("Timed out waiting for WebSocket frame")
}

/// Try to read the next JSON frame, returning `None` on timeout.
/// Pings and pongs are skipped.
pub async fn try_read_json(stream: &mut WsStream, timeout_ms: u64) -> Option<Value> {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("Frame is not JSON");
                },
                Some(Ok(Message::Close(_))) | None => panic!("WebSocket closed unexpectedly"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
            }
        }
    })
    .await
    .ok()
}

/// Read until the server closes the stream. Returns `true` if it closed
/// within the timeout.
pub async fn wait_for_close(stream: &mut WsStream, timeout_ms: u64) -> bool {
    tokio::time::timeout(Duration::from_millis(timeout_ms), async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}

/// Create a room. Returns `(roomId, hostSessionId)`.
pub async fn create_room(host: &mut WsStream) -> (String, String) {
    send_json(host, json!({"type": "create_room"})).await;
    let frame = read_json(host).await;
    assert_eq!(frame["type"], "room_created", "unexpected frame: {frame}");
    (
        frame["roomId"].as_str().unwrap().to_string(),
        frame["sessionId"].as_str().unwrap().to_string(),
    )
}

/// Join a room as a new player. Returns the `joined` frame.
pub async fn join_room(player: &mut WsStream, code: &str, name: &str) -> Value {
    send_json(
        player,
        json!({"type": "join", "roomCode": code, "playerName": name}),
    )
    .await;
    let frame = read_json(player).await;
    assert_eq!(frame["type"], "joined", "unexpected frame: {frame}");
    frame
}
