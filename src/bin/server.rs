use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use cabbage_chase::constants::{CATCH_DURATION_MS, DEFAULT_PORT};
use cabbage_chase::protocol::{parse_client_message, ClientMessage};
use cabbage_chase::registry::{CatchGrant, SessionRegistry};
use cabbage_chase::relay::{current_players_message, welcome_message, ServerEvent};
use cabbage_chase::server_utils::sanitize_chat;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng as _;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    registry: SessionRegistry,
}

impl ServerState {
    fn new(seed: u32) -> Self {
        Self {
            clients: HashMap::new(),
            registry: SessionRegistry::new(seed),
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let seed: u32 = rand::rng().random();
    let state = Arc::new(Mutex::new(ServerState::new(seed)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!("static file root: {}", static_dir.to_string_lossy());
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving the game client is disabled");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    info!("listening on :{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("public"), PathBuf::from("../public")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let session_id = make_id("player");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        guard
            .clients
            .insert(session_id.clone(), ClientContext { tx: tx.clone() });
        guard.registry.connect(&session_id);

        let welcome = welcome_message(&session_id).to_string();
        let joined = current_players_message(&guard.registry.joined_players()).to_string();
        send_to_client(&mut guard, &session_id, welcome);
        send_to_client(&mut guard, &session_id, joined);
    }
    info!("connected: {session_id}");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &session_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &session_id, text).await;
                } else {
                    debug!("ignoring non-utf8 frame from {session_id}");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &session_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, session_id: &str, raw: String) {
    // out-of-precondition requests are silently ignored; absence of the
    // expected broadcast is the only signal the sender gets
    let Some(message) = parse_client_message(&raw) else {
        debug!("ignoring unparseable message from {session_id}");
        return;
    };

    match message {
        ClientMessage::JoinGame { name, model_type } => {
            let mut guard = state.lock().await;
            let Some(record) = guard.registry.join(session_id, &name, model_type) else {
                return;
            };
            info!(
                "joined: {session_id} as {} ({})",
                record.name,
                model_type.as_str()
            );
            dispatch(&mut guard, ServerEvent::NewPlayer { player: record });
        }
        ClientMessage::PlayerMove { x, y, z } => {
            let mut guard = state.lock().await;
            if !guard.registry.apply_move(session_id, x, y, z) {
                return;
            }
            dispatch(
                &mut guard,
                ServerEvent::PlayerMoved {
                    id: session_id.to_string(),
                    x,
                    y,
                    z,
                },
            );
        }
        ClientMessage::Chat { text } => {
            let mut guard = state.lock().await;
            if !guard.registry.is_joined(session_id) {
                return;
            }
            let Some(text) = sanitize_chat(&text) else {
                return;
            };
            dispatch(
                &mut guard,
                ServerEvent::Chat {
                    id: session_id.to_string(),
                    text,
                },
            );
        }
        // the sender's own session id decides who the animal is
        ClientMessage::CatchCabbage { cabbage_id, .. } => {
            let mut guard = state.lock().await;
            let Some(grant) = guard.registry.begin_catch(session_id, &cabbage_id) else {
                return;
            };
            dispatch(
                &mut guard,
                ServerEvent::CabbageCaught {
                    animal_id: grant.animal_id.clone(),
                    cabbage_id: grant.cabbage_id.clone(),
                },
            );
            drop(guard);
            spawn_release_timer(state.clone(), grant);
        }
        ClientMessage::ReleaseCabbage { cabbage_id, .. } => {
            let mut guard = state.lock().await;
            let Some(release) = guard.registry.release_by_request(session_id, &cabbage_id)
            else {
                return;
            };
            dispatch(
                &mut guard,
                ServerEvent::CabbageReleased {
                    animal_id: release.animal_id,
                    cabbage_id: release.cabbage_id,
                },
            );
        }
    }
}

fn spawn_release_timer(state: SharedState, grant: CatchGrant) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(CATCH_DURATION_MS)).await;
        let mut guard = state.lock().await;
        // inert if an explicit release or a disconnect got there first
        let Some(release) = guard
            .registry
            .release_by_timeout(&grant.cabbage_id, grant.token)
        else {
            return;
        };
        dispatch(
            &mut guard,
            ServerEvent::CabbageReleased {
                animal_id: release.animal_id,
                cabbage_id: release.cabbage_id,
            },
        );
    });
}

async fn handle_disconnect(state: SharedState, session_id: &str) {
    let mut guard = state.lock().await;
    guard.clients.remove(session_id);
    info!("disconnected: {session_id}");
    for event in departure_events(&mut guard.registry, session_id) {
        dispatch(&mut guard, event);
    }
}

fn departure_events(registry: &mut SessionRegistry, session_id: &str) -> Vec<ServerEvent> {
    let Some(departure) = registry.disconnect(session_id) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    if let Some(release) = departure.forced_release {
        events.push(ServerEvent::CabbageReleased {
            animal_id: release.animal_id,
            cabbage_id: release.cabbage_id,
        });
    }
    if departure.was_joined {
        events.push(ServerEvent::PlayerLeft {
            id: session_id.to_string(),
        });
    }
    events
}

fn dispatch(state: &mut ServerState, event: ServerEvent) {
    let mut pending = vec![event];
    while !pending.is_empty() {
        let event = pending.remove(0);
        let failed = deliver(state, &event);
        for client_id in failed {
            warn!("dropping slow client {client_id}");
            if let Some(client) = state.clients.remove(&client_id) {
                let _ = client.tx.try_send(OutboundMessage::Close {
                    code: 1008,
                    reason: "outbound queue overflow".to_string(),
                });
            }
            pending.extend(departure_events(&mut state.registry, &client_id));
        }
    }
}

fn deliver(state: &mut ServerState, event: &ServerEvent) -> Vec<String> {
    let recipients = event.recipients();
    let payload = event.to_message().to_string();
    let policy = queue_policy_for(event);

    let client_ids: Vec<String> = state.clients.keys().cloned().collect();
    let mut failed_clients = Vec::new();
    for client_id in client_ids {
        if !recipients.includes(&client_id) {
            continue;
        }
        let Some(client) = state.clients.get(&client_id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed_clients.push(client_id);
        }
    }
    failed_clients
}

fn queue_policy_for(event: &ServerEvent) -> QueuePolicy {
    match event {
        ServerEvent::PlayerMoved { .. } => QueuePolicy::DropOnFull,
        _ => QueuePolicy::DisconnectOnFull,
    }
}

fn send_to_client(state: &mut ServerState, client_id: &str, payload: String) {
    let send_failed = state
        .clients
        .get(client_id)
        .map(|client| client.tx.try_send(OutboundMessage::Text(payload)).is_err())
        .unwrap_or(false);
    if send_failed {
        warn!("dropping slow client {client_id}");
        state.clients.remove(client_id);
    }
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}
