// Capability interfaces injected into use cases, following
// `auth_server::domain::ports` (`Clock`, `SessionStore`) generalized to the
// richer set of collaborators this core needs.

use async_trait::async_trait;
use uuid::Uuid;

use super::chat::Chat;
use super::errors::CoreError;
use super::lobby::Lobby;
use super::match_history::MatchHistory;
use super::match_request::{MatchRequest, MatchRequestStatus};
use super::user::User;

// Inputs needed to materialize a match into durable state in one shot.
// `history` is already built (status `forming`, `lobby_id: None`); the
// implementation re-reads by `history.id` to decide `Created` vs.
// `AlreadyFinalized` before inserting anything.
pub struct FinalizeInput {
    pub history: MatchHistory,
    pub lobby: Lobby,
    pub chat: Chat,
    // Request ids to transition `searching` -> `matched` with this lobby.
    // Requests already transitioned by a racing finalize are skipped.
    pub participant_requests: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    // This call performed the write; `lobby_id` is the newly created lobby.
    Created { lobby_id: Uuid },
    // Another caller already finalized this match; returned idempotently.
    AlreadyFinalized { lobby_id: Uuid },
}

// Current time source, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, CoreError>;
    async fn touch_last_active(&self, user_id: Uuid, at: u64) -> Result<(), CoreError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: MatchRequest) -> Result<(), CoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<MatchRequest>, CoreError>;
    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<MatchRequest>, CoreError>;
    async fn update(&self, request: MatchRequest) -> Result<(), CoreError>;
    // Conditional update used by finalize: only applies when the stored
    // status still matches `expected`, mirroring the spec's
    // `updateMany(status='searching')` filter semantics.
    async fn set_status_if(
        &self,
        id: Uuid,
        expected: MatchRequestStatus,
        new_status: MatchRequestStatus,
        matched_lobby_id: Option<Uuid>,
    ) -> Result<bool, CoreError>;
    async fn list_searching_older_than(
        &self,
        age_ms: u64,
        now: u64,
        limit: usize,
    ) -> Result<Vec<MatchRequest>, CoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert(&self, history: MatchHistory) -> Result<(), CoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<MatchHistory>, CoreError>;
    async fn list_for_user(
        &self,
        user_id: Uuid,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<MatchHistory>, CoreError>;
}

#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn insert(&self, lobby: Lobby) -> Result<(), CoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Lobby>, CoreError>;
    async fn update(&self, lobby: Lobby) -> Result<(), CoreError>;
    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<Lobby>, CoreError>;
    async fn list_for_user(&self, user_id: Uuid, include_history: bool) -> Result<Vec<Lobby>, CoreError>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert(&self, chat: Chat) -> Result<(), CoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Chat>, CoreError>;
    async fn get_for_lobby(&self, lobby_id: Uuid) -> Result<Option<Chat>, CoreError>;
    async fn update(&self, chat: Chat) -> Result<(), CoreError>;
}

// Design Note "From database-specific transactions to a capability flag":
// callers check this before relying on atomic multi-store writes.
#[async_trait]
pub trait Persistence: Send + Sync {
    fn supports_transactions(&self) -> bool;
    fn users(&self) -> &dyn UserStore;
    fn requests(&self) -> &dyn RequestStore;
    fn history(&self) -> &dyn HistoryStore;
    fn lobbies(&self) -> &dyn LobbyStore;
    fn chats(&self) -> &dyn ChatStore;

    // The finalization critical section: re-read history, bail out
    // idempotently if already finalized, otherwise persist the lobby, chat,
    // and participant status transitions as one unit. Implementations that
    // support transactions (`supports_transactions() == true`) wrap this in
    // a real database transaction; others perform the steps sequentially
    // and rely on the caller's named lock plus this method's own re-read
    // for safety, per spec §9 ("capability flag").
    async fn finalize_match(&self, input: FinalizeInput) -> Result<FinalizeOutcome, CoreError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn create_notification(&self, notification: super::notification::Notification);
}

// Implemented by SocketHub; injected into MatchmakingService/LobbyEngine so
// the use-case layer never depends on the adapter layer directly.
#[async_trait]
pub trait RealtimeEmitter: Send + Sync {
    async fn emit_matchmaking_status(&self, event: super::events::MatchmakingStatusEvent);
    async fn emit_lobby_created(&self, user_id: Uuid, lobby_id: Uuid);
}
