//! WebSocket push channel over a real socket.

mod common;

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";

fn ws_url(server: &common::TestServer, game_id: &str, nick: &str) -> String {
    let base = server.base_url.replacen("http://", "ws://", 1);
    format!("{base}/api/games/{game_id}/ws?nick={nick}")
}

async fn open(server: &common::TestServer, game_id: &str, nick: &str) -> Socket {
    let (socket, _) = connect_async(ws_url(server, game_id, nick))
        .await
        .expect("WebSocket handshake failed");
    socket
}

async fn recv(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("No frame within 2s")
            .expect("Socket closed")
            .expect("Socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("Frame is not JSON");
        }
    }
}

/// Skip frames until one of type `kind` that satisfies `accept`.
async fn recv_until(socket: &mut Socket, kind: &str, accept: impl Fn(&Value) -> bool) -> Value {
    loop {
        let msg = recv(socket).await;
        if msg["type"] == kind && accept(&msg) {
            return msg;
        }
    }
}

async fn send(socket: &mut Socket, msg: Value) {
    socket
        .send(Message::text(msg.to_string()))
        .await
        .expect("Failed to send frame");
}

async fn active_game(server: &common::TestServer) -> String {
    let s = server
        .store
        .create("Alice".into(), 0, chess_server::store::TimeControl::Unlimited)
        .await
        .unwrap();
    server.store.join(&s.id, "Bob".into(), 0).await.unwrap();
    s.id
}

#[tokio::test]
async fn test_socket_pushes_moves_to_the_opponent() {
    let server = common::spawn_server().await;
    let id = active_game(&server).await;

    let mut alice = open(&server, &id, "Alice").await;
    let mut bob = open(&server, &id, "Bob").await;

    let hello = recv(&mut alice).await;
    assert_eq!(hello["type"], "snapshot");
    assert_eq!(hello["session"]["fen"], chess_core::STARTING_FEN);
    assert_eq!(recv(&mut bob).await["type"], "snapshot");

    send(&mut alice, json!({ "type": "move", "move": "e2e4" })).await;
    let accepted = recv_until(&mut alice, "move_accepted", |_| true).await;
    assert_eq!(accepted["session"]["fen"], AFTER_E4);

    let pushed = recv_until(&mut bob, "snapshot", |m| m["session"]["fen"] == AFTER_E4).await;
    assert_eq!(pushed["session"]["last_move"], "e2e4");

    // Trailing space: a parse error, not an illegal move
    send(&mut bob, json!({ "type": "move", "move": "e7e5 " })).await;
    let err = recv_until(&mut bob, "error", |_| true).await;
    assert_eq!(err["kind"], "parse");

    send(&mut bob, json!({ "type": "move", "move": "e7e6" })).await;
    recv_until(&mut bob, "move_accepted", |_| true).await;
    let seen = recv_until(&mut alice, "snapshot", |m| m["session"]["ply"] == 2).await;
    assert_eq!(seen["session"]["last_move"], "e7e6");
}

#[tokio::test]
async fn test_socket_turn_and_spectator_errors() {
    let server = common::spawn_server().await;
    let id = active_game(&server).await;

    let mut bob = open(&server, &id, "Bob").await;
    recv(&mut bob).await;
    send(&mut bob, json!({ "type": "move", "move": "e7e5" })).await;
    assert_eq!(recv_until(&mut bob, "error", |_| true).await["kind"], "not_your_turn");

    let mut carol = open(&server, &id, "Carol").await;
    let hello = recv(&mut carol).await;
    assert_eq!(hello["type"], "snapshot");
    send(&mut carol, json!({ "type": "chat", "text": "hi" })).await;
    assert_eq!(recv_until(&mut carol, "error", |_| true).await["kind"], "forbidden");
}

#[tokio::test]
async fn test_socket_chat_reaches_both_sides() {
    let server = common::spawn_server().await;
    let id = active_game(&server).await;

    let mut alice = open(&server, &id, "Alice").await;
    let mut bob = open(&server, &id, "Bob").await;
    recv(&mut alice).await;
    recv(&mut bob).await;

    send(&mut alice, json!({ "type": "chat", "text": "  good luck " })).await;
    for socket in [&mut alice, &mut bob] {
        let msg = recv_until(socket, "snapshot", |m| m["session"]["chat"][0].is_object()).await;
        assert_eq!(msg["session"]["chat"][0]["author"], "Alice");
        assert_eq!(msg["session"]["chat"][0]["text"], "good luck");
    }
}

#[tokio::test]
async fn test_unknown_game_is_rejected_before_upgrade() {
    let server = common::spawn_server().await;

    match connect_async(ws_url(&server, "does-not-exist", "Alice")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("Expected an HTTP rejection, got {other}"),
        Ok(_) => panic!("Upgrade should have been refused"),
    }
}

#[tokio::test]
async fn test_missing_nick_is_bad_request() {
    let server = common::spawn_server().await;
    let id = active_game(&server).await;
    let base = server.base_url.replacen("http://", "ws://", 1);

    match connect_async(format!("{base}/api/games/{id}/ws")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 400),
        Err(other) => panic!("Expected an HTTP rejection, got {other}"),
        Ok(_) => panic!("Upgrade should have been refused"),
    }
}
