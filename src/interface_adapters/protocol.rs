// Wire DTOs for the HTTP and WebSocket boundaries. Request/response structs
// follow `auth_server::interface_adapters::protocol`'s plain
// `#[derive(Deserialize)]`/`#[derive(Serialize)]` convention; the socket
// envelope adds a tagged union since a single connection carries several
// message kinds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::chat::{ChatMessage, ContentType};
use crate::domain::criteria::SearchCriteria;
use crate::domain::events::MatchmakingStatusEvent;
use crate::domain::lobby::Lobby;
use crate::domain::match_history::MatchHistory;
use crate::domain::match_request::MatchRequest;
use crate::use_cases::lobby_engine::LobbyEvent;
use crate::use_cases::matchmaking_service::QueueInfo;
use crate::use_cases::pagination::Page;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

// ---- HTTP request/response bodies ----

#[derive(Debug, Deserialize)]
pub struct SubmitMatchRequestBody {
    pub criteria: SearchCriteria,
}

#[derive(Debug, Serialize)]
pub struct MatchRequestResponse {
    pub request: MatchRequest,
}

#[derive(Debug, Serialize)]
pub struct CurrentMatchRequestResponse {
    pub request: Option<MatchRequest>,
    pub queue_info: Option<QueueInfo>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MatchHistoryResponse {
    #[serde(flatten)]
    pub page: Page<MatchHistory>,
}

#[derive(Debug, Serialize)]
pub struct LobbyResponse {
    pub lobby: Lobby,
}

#[derive(Debug, Deserialize)]
pub struct SetReadyBody {
    pub ready: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    pub content_type: Option<ContentType>,
}

#[derive(Debug, Serialize)]
pub struct ChatMessageResponse {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<usize>,
    pub before: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

// ---- WebSocket envelope ----
//
// Every frame is a tagged union so a single socket can multiplex
// matchmaking status, lobby events, and room control messages. Mirrors the
// `#[serde(tag = "type", content = "data")]` shape used for the equivalent
// game-protocol messages in the teacher's `net` module.

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeMatchmaking { request_id: Uuid },
    UnsubscribeMatchmaking { request_id: Uuid },
    SubscribeLobby { lobby_id: Uuid },
    UnsubscribeLobby { lobby_id: Uuid },
    SubscribeUserStatus { user_ids: Vec<Uuid> },
    UnsubscribeUserStatus { user_ids: Vec<Uuid> },
    ChatSend { lobby_id: Uuid, content: String, content_type: Option<ContentType> },
    ChatTyping { lobby_id: Uuid, is_typing: bool },
    Ping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { socket_id: Uuid, user_id: Uuid },
    MatchmakingStatus(MatchmakingStatusEvent),
    MatchmakingSubscribed { request_id: Uuid },
    MatchmakingUnsubscribed { request_id: Uuid },
    LobbySubscribed { lobby_id: Uuid },
    LobbyUnsubscribed { lobby_id: Uuid },
    LobbyEvent(LobbyEventPayload),
    ChatTyping { lobby_id: Uuid, user_id: Uuid, is_typing: bool },
    UserStatus { user_id: Uuid, online: bool },
    UserStatusUpdate { statuses: HashMap<Uuid, bool> },
    Error { message: String },
    Pong,
}

// `LobbyEvent` itself isn't `Serialize` for every variant shape a client
// wants (e.g. we don't want to leak internal bookkeeping); this projects it
// onto a flat, client-facing payload.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LobbyEventPayload {
    Created { lobby: Lobby },
    Updated { lobby: Lobby },
    MemberJoined { lobby_id: Uuid, user_id: Uuid },
    MemberLeft { lobby_id: Uuid, user_id: Uuid },
    MemberReady { lobby_id: Uuid, user_id: Uuid, ready: bool },
    Closed { lobby_id: Uuid, reason: String },
    SystemMessage { lobby_id: Uuid, message: ChatMessage },
    ChatMessage { lobby_id: Uuid, message: ChatMessage },
    AutoStart { lobby_id: Uuid },
}

impl From<LobbyEvent> for LobbyEventPayload {
    fn from(event: LobbyEvent) -> Self {
        match event {
            LobbyEvent::Created { lobby } => LobbyEventPayload::Created { lobby },
            LobbyEvent::Updated { lobby } => LobbyEventPayload::Updated { lobby },
            LobbyEvent::MemberJoined { lobby_id, user_id } => {
                LobbyEventPayload::MemberJoined { lobby_id, user_id }
            }
            LobbyEvent::MemberLeft { lobby_id, user_id } => {
                LobbyEventPayload::MemberLeft { lobby_id, user_id }
            }
            LobbyEvent::MemberReady { lobby_id, user_id, ready } => {
                LobbyEventPayload::MemberReady { lobby_id, user_id, ready }
            }
            LobbyEvent::Closed { lobby_id, reason } => LobbyEventPayload::Closed { lobby_id, reason },
            LobbyEvent::SystemMessage { lobby_id, message } => {
                LobbyEventPayload::SystemMessage { lobby_id, message }
            }
            LobbyEvent::ChatMessage { lobby_id, message } => {
                LobbyEventPayload::ChatMessage { lobby_id, message }
            }
            LobbyEvent::AutoStart { lobby_id } => LobbyEventPayload::AutoStart { lobby_id },
        }
    }
}

// Which room(s) a lobby event should fan out to. `lobby_id` is present on
// every variant so SocketHub never has to match twice.
impl LobbyEvent {
    pub fn lobby_id(&self) -> Uuid {
        match self {
            LobbyEvent::Created { lobby } | LobbyEvent::Updated { lobby } => lobby.id,
            LobbyEvent::MemberJoined { lobby_id, .. }
            | LobbyEvent::MemberLeft { lobby_id, .. }
            | LobbyEvent::MemberReady { lobby_id, .. }
            | LobbyEvent::Closed { lobby_id, .. }
            | LobbyEvent::SystemMessage { lobby_id, .. }
            | LobbyEvent::ChatMessage { lobby_id, .. }
            | LobbyEvent::AutoStart { lobby_id } => *lobby_id,
        }
    }
}
