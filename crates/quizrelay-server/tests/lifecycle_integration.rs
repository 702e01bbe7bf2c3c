#[allow(dead_code)]
mod common;

use serde_json::json;

use quizrelay_server::config::LimitsConfig;
use quizrelay_server::lifecycle;

use common::{
    TestServer, create_room, join_room, read_json, send_json, send_text, try_read_json,
    wait_for_close, ws_connect,
};

#[tokio::test]
async fn room_expires_after_max_age() {
    let server = TestServer::with_limits(LimitsConfig {
        room_max_age_secs: 1,
        ..LimitsConfig::default()
    })
    .await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (room_id, _) = create_room(&mut host).await;
    let mut player = ws_connect(&server.ws_url()).await;
    join_room(&mut player, &room_id, "Eve").await;
    let _ = read_json(&mut host).await;

    let frame = try_read_json(&mut player, 4000)
        .await
        .expect("player should see the expiry");
    assert_eq!(frame["type"], "quiz_terminated");
    let frame = try_read_json(&mut host, 4000)
        .await
        .expect("host should see the expiry");
    assert_eq!(frame["type"], "quiz_terminated");

    let registry = server.state.registry.read().await;
    assert!(!registry.contains(&room_id));
}

#[tokio::test]
async fn host_terminate_ends_the_quiz() {
    let server = TestServer::new().await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (room_id, _) = create_room(&mut host).await;
    let mut player = ws_connect(&server.ws_url()).await;
    join_room(&mut player, &room_id, "Eve").await;
    let _ = read_json(&mut host).await;

    send_json(&mut host, json!({"type": "terminate"})).await;

    let frame = read_json(&mut player).await;
    assert_eq!(frame["type"], "quiz_terminated");

    // The code is gone; a late joiner gets the not-found error.
    let mut late = ws_connect(&server.ws_url()).await;
    send_json(
        &mut late,
        json!({"type": "join", "roomCode": room_id, "playerName": "Late"}),
    )
    .await;
    let frame = read_json(&mut late).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "Raum nicht gefunden.");
}

#[tokio::test]
async fn shutdown_fans_out_to_every_room() {
    let server = TestServer::new().await;

    let mut host_a = ws_connect(&server.ws_url()).await;
    let (room_a, _) = create_room(&mut host_a).await;
    let mut player_a = ws_connect(&server.ws_url()).await;
    join_room(&mut player_a, &room_a, "Eve").await;
    let _ = read_json(&mut host_a).await;

    let mut host_b = ws_connect(&server.ws_url()).await;
    let (_room_b, _) = create_room(&mut host_b).await;

    lifecycle::shutdown_all_rooms(&server.state).await;

    for stream in [&mut host_a, &mut player_a, &mut host_b] {
        let frame = read_json(stream).await;
        assert_eq!(frame["type"], "quiz_terminated");
    }

    let registry = server.state.registry.read().await;
    assert_eq!(registry.stats().0, 0);
}

#[tokio::test]
async fn rate_limit_warns_then_closes() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    // One burst of unknown-type frames, normally pure silence. The
    // 21st in the window breaches the limit and elicits exactly one
    // error; the 61st closes the channel for good.
    for _ in 0..70 {
        send_text(&mut stream, r#"{"type": "noop"}"#).await;
    }
    let frame = read_json(&mut stream).await;
    assert_eq!(frame["type"], "error");
    assert!(
        frame["message"]
            .as_str()
            .unwrap()
            .starts_with("Zu viele Nachrichten")
    );
    assert!(wait_for_close(&mut stream, 3000).await, "expected close");
}

#[tokio::test]
async fn unresponsive_connection_is_reaped_by_heartbeat() {
    let server = TestServer::with_limits(LimitsConfig {
        heartbeat_interval_secs: 1,
        ..LimitsConfig::default()
    })
    .await;

    let mut stream = ws_connect(&server.ws_url()).await;
    // Not reading means the client library never answers the pings.
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert!(
        wait_for_close(&mut stream, 2000).await,
        "server should close a connection that never pongs"
    );
}

#[tokio::test]
async fn responsive_connection_survives_heartbeat() {
    let server = TestServer::with_limits(LimitsConfig {
        heartbeat_interval_secs: 1,
        ..LimitsConfig::default()
    })
    .await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (room_id, _) = create_room(&mut host).await;

    // Polling the stream lets the client answer pings, so several
    // sweeps later the connection and the room are still there.
    assert!(try_read_json(&mut host, 3500).await.is_none());

    let registry = server.state.registry.read().await;
    assert!(registry.get(&room_id).unwrap().host.is_some());
}
