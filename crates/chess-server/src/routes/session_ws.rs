/// WebSocket push channel for one game session.
///
/// Each connection owns a `Synchronizer`. Snapshots from the store are pushed
/// as they arrive; moves, chat and resignations from the client go through
/// the synchronizer, which enforces seat and turn ownership before the store
/// gets the final say.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::Path,
    response::IntoResponse,
    Extension,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppError;
use crate::profile::ProfileBook;
use crate::routes::extract::ApiQuery;
use crate::routes::{validate_chat, validate_nick};
use crate::store::{GameSession, SessionStore};
use crate::sync::{SyncEvent, Synchronizer};

// ---- Message types ----

/// Server → Client messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { session: GameSession },
    MoveAccepted { session: GameSession },
    Error { kind: String, message: String },
    Reconnecting { attempt: u32, retry_in_ms: u64 },
    Gone,
}

/// Client → Server messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Move {
        #[serde(rename = "move")]
        mv: String,
    },
    Chat {
        text: String,
    },
    Resign,
}

#[derive(Deserialize)]
pub struct WsQuery {
    pub nick: String,
}

impl From<AppError> for ServerMessage {
    fn from(e: AppError) -> Self {
        ServerMessage::Error {
            kind: e.kind().to_string(),
            message: e.public_message(),
        }
    }
}

// ---- WebSocket handler ----

/// GET /api/games/{game_id}/ws?nick=...
///
/// The session is read before upgrading so an unknown game is a plain 404.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(game_id): Path<String>,
    ApiQuery(q): ApiQuery<WsQuery>,
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Extension(profiles): Extension<Arc<ProfileBook>>,
) -> Result<impl IntoResponse, AppError> {
    validate_nick(&q.nick)?;
    let sync = Synchronizer::connect(store, profiles, &game_id, &q.nick).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, sync)))
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(msg)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, mut sync: Synchronizer) {
    let (mut sender, mut receiver) = socket.split();
    let game_id = sync.context().game_id.clone();
    let nick = sync.context().nick.clone();

    let hello = ServerMessage::Snapshot {
        session: sync.session().clone(),
    };
    if send(&mut sender, &hello).await.is_err() {
        return;
    }

    loop {
        let reply = tokio::select! {
            event = sync.next_event() => match event {
                SyncEvent::Updated(session) => Some(ServerMessage::Snapshot { session }),
                SyncEvent::Reconnecting { attempt, retry_in } => Some(ServerMessage::Reconnecting {
                    attempt,
                    retry_in_ms: retry_in.as_millis() as u64,
                }),
                SyncEvent::Gone => {
                    let _ = send(&mut sender, &ServerMessage::Gone).await;
                    break;
                }
            },
            incoming = receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                handle_client_message(&mut sync, &text).await
            }
        };

        if let Some(msg) = reply {
            if send(&mut sender, &msg).await.is_err() {
                break;
            }
        }
    }

    info!(game_id = %game_id, nick = %nick, "Client disconnected");
}

/// Apply one client frame. Chat has no direct reply: it comes back to every
/// client, sender included, as the next snapshot.
async fn handle_client_message(sync: &mut Synchronizer, text: &str) -> Option<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return Some(AppError::BadRequest(format!("Invalid message: {e}")).into());
        }
    };
    debug!(game_id = %sync.context().game_id, ?msg, "Client message");

    let result = match msg {
        ClientMessage::Move { mv } => sync
            .submit_move(&mv)
            .await
            .map(|session| Some(ServerMessage::MoveAccepted { session }))
            .map_err(AppError::from),
        ClientMessage::Chat { text } => match validate_chat(&text) {
            Ok(text) => sync.send_chat(&text).await.map(|()| None).map_err(AppError::from),
            Err(e) => Err(e),
        },
        ClientMessage::Resign => sync
            .resign()
            .await
            .map(|session| Some(ServerMessage::Snapshot { session }))
            .map_err(AppError::from),
    };

    result.unwrap_or_else(|e| Some(e.into()))
}
