// SocketHub: authenticated WebSocket connection lifecycle, room membership,
// and fan-out. Grounded on `game_server::interface_adapters::net::client`'s
// `ws_handler` + per-connection reader/writer split over channels, and on
// `head_server`'s bearer-credential verification shape (an opaque token
// resolved against a user store before the socket is upgraded).
//
// This corpus carries no JWT library anywhere in its dependency graph, so
// the bearer token here is the user's id itself: the caller authenticates
// up front (out of this crate's scope, per domain::user's "Users are an
// external collaborator") and simply presents that id as the token. It is
// still verified against `Persistence::users()` on every connection so a
// deactivated or unknown id is rejected rather than trusted blindly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::chat::ContentType;
use crate::domain::events::MatchmakingStatusEvent;
use crate::domain::ports::{Clock, Persistence, RealtimeEmitter};
use crate::interface_adapters::protocol::{ClientMessage, ErrorResponse, LobbyEventPayload, ServerMessage};
use crate::interface_adapters::state::AppState;
use crate::use_cases::lobby_engine::{LobbyEngine, LobbyEvent};

pub fn room_user(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn room_match(request_id: Uuid) -> String {
    format!("match:{request_id}")
}

pub fn room_lobby(lobby_id: Uuid) -> String {
    format!("lobby:{lobby_id}")
}

pub fn room_status(user_id: Uuid) -> String {
    format!("status:{user_id}")
}

struct Connection {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[derive(Default)]
struct Rooms {
    // room key -> connection ids subscribed to it.
    members: HashMap<String, HashSet<Uuid>>,
    // connection id -> rooms it has joined, for cleanup on disconnect.
    joined: HashMap<Uuid, HashSet<String>>,
}

impl Rooms {
    fn join(&mut self, conn_id: Uuid, room: &str) {
        self.members.entry(room.to_string()).or_default().insert(conn_id);
        self.joined.entry(conn_id).or_default().insert(room.to_string());
    }

    fn leave(&mut self, conn_id: Uuid, room: &str) {
        if let Some(members) = self.members.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.members.remove(room);
            }
        }
        if let Some(rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(room);
        }
    }

    fn leave_all(&mut self, conn_id: Uuid) {
        if let Some(rooms) = self.joined.remove(&conn_id) {
            for room in rooms {
                if let Some(members) = self.members.get_mut(&room) {
                    members.remove(&conn_id);
                    if members.is_empty() {
                        self.members.remove(&room);
                    }
                }
            }
        }
    }

    fn members_of(&self, room: &str) -> Vec<Uuid> {
        self.members.get(room).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }
}

// Presence bookkeeping: per-user set of live connection ids. A user is
// "online" while this set is non-empty.
#[derive(Default)]
struct Presence {
    sockets: HashMap<Uuid, HashSet<Uuid>>,
}

pub struct SocketHub {
    connections: RwLock<HashMap<Uuid, Connection>>,
    rooms: RwLock<Rooms>,
    presence: RwLock<Presence>,
    persistence: Arc<dyn Persistence>,
    lobby_engine: Arc<LobbyEngine>,
    clock: Arc<dyn Clock>,
}

impl SocketHub {
    pub fn new(persistence: Arc<dyn Persistence>, lobby_engine: Arc<LobbyEngine>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(Rooms::default()),
            presence: RwLock::new(Presence::default()),
            persistence,
            lobby_engine,
            clock,
        })
    }

    // Spawns the task that fans `LobbyEngine` events out to `lobby:{id}`
    // rooms. Call once from the composition root.
    pub fn spawn_lobby_event_bridge(self: &Arc<Self>, lobby_engine: &Arc<crate::use_cases::lobby_engine::LobbyEngine>) {
        let hub = Arc::clone(self);
        let mut events = lobby_engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => hub.handle_lobby_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    async fn handle_lobby_event(&self, event: LobbyEvent) {
        let lobby_id = event.lobby_id();
        let payload = LobbyEventPayload::from(event);
        self.emit_to_room(&room_lobby(lobby_id), ServerMessage::LobbyEvent(payload)).await;
    }

    async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerMessage>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(conn_id, Connection { user_id, tx: tx.clone() });

        let mut rooms = self.rooms.write().await;
        rooms.join(conn_id, &room_user(user_id));
        drop(rooms);

        let newly_online = {
            let mut presence = self.presence.write().await;
            let sockets = presence.sockets.entry(user_id).or_default();
            let was_empty = sockets.is_empty();
            sockets.insert(conn_id);
            was_empty
        };
        if newly_online {
            self.broadcast_presence(user_id, true).await;
        }

        let _ = tx.send(ServerMessage::Connected { socket_id: conn_id, user_id });
        self.touch_last_active(user_id).await;

        (conn_id, rx)
    }

    // Fire-and-forget activity hook; a failed write just leaves `last_active`
    // stale until the next successful touch.
    async fn touch_last_active(&self, user_id: Uuid) {
        let now = self.clock.now_ms();
        if let Err(err) = self.persistence.users().touch_last_active(user_id, now).await {
            tracing::debug!(%err, %user_id, "failed to update last_active");
        }
    }

    async fn reply_to(&self, conn_id: Uuid, message: ServerMessage) {
        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(&conn_id) {
            let _ = conn.tx.send(message);
        }
    }

    async fn unregister(&self, conn_id: Uuid) {
        let user_id = {
            let mut connections = self.connections.write().await;
            match connections.remove(&conn_id) {
                Some(conn) => conn.user_id,
                None => return,
            }
        };
        self.rooms.write().await.leave_all(conn_id);

        let now_offline = {
            let mut presence = self.presence.write().await;
            if let Some(sockets) = presence.sockets.get_mut(&user_id) {
                sockets.remove(&conn_id);
                if sockets.is_empty() {
                    presence.sockets.remove(&user_id);
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };
        if now_offline {
            self.broadcast_presence(user_id, false).await;
        }
    }

    async fn broadcast_presence(&self, user_id: Uuid, online: bool) {
        self.emit_to_room(&room_status(user_id), ServerMessage::UserStatus { user_id, online }).await;
    }

    pub async fn emit_to_user(&self, user_id: Uuid, message: ServerMessage) {
        self.emit_to_room(&room_user(user_id), message).await;
    }

    pub async fn emit_to_room(&self, room: &str, message: ServerMessage) {
        let member_ids = self.rooms.read().await.members_of(room);
        if member_ids.is_empty() {
            return;
        }
        let connections = self.connections.read().await;
        for conn_id in member_ids {
            if let Some(conn) = connections.get(&conn_id) {
                let _ = conn.tx.send(message.clone());
            }
        }
    }

    async fn handle_client_message(&self, conn_id: Uuid, msg: ClientMessage) {
        let sender_id = self.connections.read().await.get(&conn_id).map(|c| c.user_id);
        if let Some(user_id) = sender_id {
            self.touch_last_active(user_id).await;
        }

        match msg {
            ClientMessage::SubscribeMatchmaking { request_id } => {
                self.rooms.write().await.join(conn_id, &room_match(request_id));
                self.reply_to(conn_id, ServerMessage::MatchmakingSubscribed { request_id }).await;
            }
            ClientMessage::UnsubscribeMatchmaking { request_id } => {
                self.rooms.write().await.leave(conn_id, &room_match(request_id));
                self.reply_to(conn_id, ServerMessage::MatchmakingUnsubscribed { request_id }).await;
            }
            ClientMessage::SubscribeLobby { lobby_id } => {
                self.rooms.write().await.join(conn_id, &room_lobby(lobby_id));
                self.reply_to(conn_id, ServerMessage::LobbySubscribed { lobby_id }).await;
            }
            ClientMessage::UnsubscribeLobby { lobby_id } => {
                self.rooms.write().await.leave(conn_id, &room_lobby(lobby_id));
                self.reply_to(conn_id, ServerMessage::LobbyUnsubscribed { lobby_id }).await;
            }
            ClientMessage::SubscribeUserStatus { user_ids } => {
                {
                    let mut rooms = self.rooms.write().await;
                    for user_id in &user_ids {
                        rooms.join(conn_id, &room_status(*user_id));
                    }
                }
                let statuses = {
                    let presence = self.presence.read().await;
                    user_ids
                        .into_iter()
                        .map(|id| (id, presence.sockets.get(&id).is_some_and(|s| !s.is_empty())))
                        .collect()
                };
                self.reply_to(conn_id, ServerMessage::UserStatusUpdate { statuses }).await;
            }
            ClientMessage::UnsubscribeUserStatus { user_ids } => {
                let mut rooms = self.rooms.write().await;
                for user_id in user_ids {
                    rooms.leave(conn_id, &room_status(user_id));
                }
            }
            ClientMessage::ChatSend { lobby_id, content, content_type } => {
                let Some(user_id) = sender_id else { return };
                let content_type = content_type.unwrap_or(ContentType::Text);
                if let Err(err) = self.lobby_engine.send_user_message(lobby_id, user_id, &content, content_type).await {
                    self.reply_to(conn_id, ServerMessage::Error { message: err.to_string() }).await;
                }
            }
            ClientMessage::ChatTyping { lobby_id, is_typing } => {
                let Some(user_id) = sender_id else { return };
                self.emit_to_room(&room_lobby(lobby_id), ServerMessage::ChatTyping { lobby_id, user_id, is_typing })
                    .await;
            }
            ClientMessage::Ping => {
                self.reply_to(conn_id, ServerMessage::Pong).await;
            }
        }
    }
}

#[async_trait]
impl RealtimeEmitter for SocketHub {
    async fn emit_matchmaking_status(&self, event: MatchmakingStatusEvent) {
        let room = room_match(event.request_id);
        self.emit_to_room(&room, ServerMessage::MatchmakingStatus(event)).await;
    }

    async fn emit_lobby_created(&self, user_id: Uuid, lobby_id: Uuid) {
        self.emit_to_user(user_id, ServerMessage::LobbyEvent(LobbyEventPayload::Created {
            lobby: match self.persistence.lobbies().get(lobby_id).await {
                Ok(Some(lobby)) => lobby,
                _ => return,
            },
        }))
        .await;
    }
}

#[derive(Debug, Deserialize)]
pub struct SocketAuthQuery {
    pub token: Uuid,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SocketAuthQuery>,
) -> impl IntoResponse {
    let user = match state.persistence.users().get(query.token).await {
        Ok(Some(user)) if user.status.is_active() => user,
        Ok(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse { message: "invalid or inactive user token".to_string() }),
            )
                .into_response();
        }
        Err(err) => {
            tracing::error!(%err, "failed to look up user for socket auth");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { message: "internal error".to_string() }),
            )
                .into_response();
        }
    };

    let hub = Arc::clone(&state.socket_hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, user.id))
}

async fn handle_socket(socket: WebSocket, hub: Arc<SocketHub>, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbound) = hub.register(user_id).await;

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => hub.handle_client_message(conn_id, msg).await,
                Err(err) => tracing::debug!(%err, "ignoring malformed client message"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                tracing::debug!(%err, "socket read error");
                break;
            }
        }
    }

    writer.abort();
    hub.unregister(conn_id).await;
}
