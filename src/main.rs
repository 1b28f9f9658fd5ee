mod buzzer;
mod config;
mod error;
mod game;
mod impostor;
mod lifecycle;
mod registry;
mod room;
mod type_answer;
mod types;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::error::RoomError;
use crate::game::{GameEvent, RoomCommand};
use crate::registry::{Registry, RoomHandle};
use crate::types::*;

/// Messages a socket may have queued before it counts as too slow.
const OUTBOX_CAPACITY: usize = 64;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
}

// ─── Routes ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    format!("ok rooms={}", state.registry.room_count())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let max = state.config.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forward the room's events meant for this connection into its outbox.
///
/// Broadcasts are only forwarded once the connection is a member; a join
/// refusal ends the forwarder. A full outbox fires `overflow` so the socket
/// gets closed.
fn spawn_forwarder(
    handle: &RoomHandle,
    connection_id: String,
    out_tx: mpsc::Sender<ServerMsg>,
    overflow: Arc<Notify>,
    mut joined: bool,
) -> JoinHandle<()> {
    let mut event_rx = handle.event_tx.subscribe();
    let code = handle.code.clone();

    tokio::spawn(async move {
        loop {
            let event = match event_rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Connection {} lagged {} events in room {}", connection_id, skipped, code);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };

            let msg = match event {
                GameEvent::SendTo { connection_id: target, msg } if target == connection_id => msg,
                GameEvent::Broadcast { msg } if joined => msg,
                GameEvent::BroadcastExcept { exclude, msg } if joined && exclude != connection_id => msg,
                _ => continue,
            };

            let refused = !joined && matches!(msg, ServerMsg::RoomError { .. });
            if matches!(msg, ServerMsg::RoomJoined { .. }) {
                joined = true;
            }
            match out_tx.try_send(msg) {
                Ok(()) if refused => return,
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Outbox full for {} in room {}, dropping connection", connection_id, code);
                    overflow.notify_one();
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let connection_id = uuid::Uuid::new_v4().to_string();
    tracing::info!("WebSocket connected: {}", connection_id);

    // Everything bound for this socket goes through one outbox.
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(OUTBOX_CAPACITY);
    let overflow = Arc::new(Notify::new());
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::error!("Failed to encode message: {}", e),
            }
        }
    });

    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();
    // Rooms this connection asked to enter; each gets a Leave on disconnect.
    let mut entered: Vec<RoomHandle> = Vec::new();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = overflow.notified() => break,
        };
        let Some(Ok(msg)) = next else { break };
        let Message::Text(text) = msg else { continue };
        let received_at = Instant::now();

        let client_msg: ClientMsg = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Invalid message from {}: {}", connection_id, e);
                continue;
            }
        };

        forwarders.retain(|f| !f.is_finished());

        match client_msg {
            ClientMsg::CreateRoom { player_name, mode } => {
                match game::create_room(
                    state.registry.clone(),
                    &connection_id,
                    &player_name,
                    mode,
                    state.config.impostor,
                ) {
                    Ok((handle, participant)) => {
                        forwarders.push(spawn_forwarder(
                            &handle,
                            connection_id.clone(),
                            out_tx.clone(),
                            overflow.clone(),
                            true,
                        ));
                        let _ = out_tx.try_send(ServerMsg::RoomCreated {
                            room_code: handle.code.clone(),
                            participant,
                            state: GameState::Waiting,
                            mode,
                        });
                        entered.push(handle);
                    }
                    Err(err) => send_error(&out_tx, &err),
                }
            }

            ClientMsg::JoinRoom { room_code, player_name, role } => {
                if state.registry.room_of(&connection_id).is_some() {
                    send_error(&out_tx, &RoomError::AlreadyInRoom);
                    continue;
                }
                let Some(handle) = state.registry.get_room(room_code.trim()) else {
                    send_error(&out_tx, &RoomError::RoomNotFound);
                    continue;
                };

                tracing::info!("{} joining room {} ({})", connection_id, handle.code, handle.mode);

                // Subscribe before joining so the snapshot can't be missed.
                let forwarder =
                    spawn_forwarder(&handle, connection_id.clone(), out_tx.clone(), overflow.clone(), false);
                let sent = handle
                    .cmd_tx
                    .send(RoomCommand::Join {
                        connection_id: connection_id.clone(),
                        name: player_name,
                        role,
                    })
                    .await;
                if sent.is_err() {
                    forwarder.abort();
                    send_error(&out_tx, &RoomError::RoomNotFound);
                    continue;
                }
                forwarders.push(forwarder);
                entered.push(handle);
            }

            other => {
                let Some((room_code, cmd)) = RoomCommand::from_client(other, &connection_id, received_at) else {
                    continue;
                };
                if let Some(handle) = state.registry.get_room(&room_code) {
                    let _ = handle.cmd_tx.send(cmd).await;
                } else {
                    tracing::debug!("Command for unknown room {} from {}", room_code, connection_id);
                }
            }
        }
    }

    // Socket disconnected
    tracing::info!("WebSocket disconnected: {}", connection_id);
    for forwarder in forwarders {
        forwarder.abort();
    }
    writer.abort();

    for handle in entered {
        let _ = handle
            .cmd_tx
            .send(RoomCommand::Leave {
                connection_id: connection_id.clone(),
            })
            .await;
    }
}

fn send_error(out_tx: &mpsc::Sender<ServerMsg>, err: &RoomError) {
    let _ = out_tx.try_send(ServerMsg::RoomError {
        message: err.to_string(),
    });
}

// ─── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    config::init()?;
    let config = config::load()?;

    let cors = CorsLayer::new()
        .allow_origin(config.client_url.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST]);

    let port = config.port;
    let state = AppState {
        registry: Registry::new(),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    tracing::info!("Party quiz server running on port {}", port);
    tracing::info!("CORS enabled for origin: {}", state.config.client_url);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn handle() -> RoomHandle {
        let (cmd_tx, _cmd_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(16);
        RoomHandle {
            code: "123456".into(),
            mode: RoomMode::Buzzer,
            cmd_tx,
            event_tx,
        }
    }

    #[tokio::test]
    async fn slow_socket_trips_overflow() {
        let handle = handle();
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let overflow = Arc::new(Notify::new());
        let forwarder = spawn_forwarder(&handle, "bob".into(), out_tx, overflow.clone(), true);

        handle.event_tx.send(GameEvent::Broadcast { msg: ServerMsg::BuzzersReset }).unwrap();
        handle.event_tx.send(GameEvent::Broadcast { msg: ServerMsg::BuzzersReset }).unwrap();

        tokio::time::timeout(Duration::from_secs(1), overflow.notified())
            .await
            .expect("overflow never fired");
        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .expect("forwarder kept running")
            .unwrap();
        assert!(matches!(out_rx.recv().await, Some(ServerMsg::BuzzersReset)));
    }

    #[tokio::test]
    async fn refused_join_ends_forwarder() {
        let handle = handle();
        let (out_tx, mut out_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let forwarder = spawn_forwarder(&handle, "bob".into(), out_tx, Arc::new(Notify::new()), false);

        handle.event_tx.send(GameEvent::Broadcast { msg: ServerMsg::BuzzersReset }).unwrap();
        handle
            .event_tx
            .send(GameEvent::SendTo {
                connection_id: "bob".into(),
                msg: ServerMsg::RoomError { message: "Name already taken in this room".into() },
            })
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .expect("forwarder kept running")
            .unwrap();
        assert!(matches!(out_rx.recv().await, Some(ServerMsg::RoomError { .. })));
        assert!(out_rx.recv().await.is_none());
    }
}
