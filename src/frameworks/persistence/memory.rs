// In-memory persistence adapter: `RwLock<HashMap<...>>`-backed stores,
// `supports_transactions() == false`. Grounded on
// `auth_server::interface_adapters::state::InMemorySessionStore`'s
// `Arc<Mutex<HashMap<...>>>` shape, generalized to this service's five
// stores plus the `finalize_match` critical section.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::chat::Chat;
use crate::domain::errors::CoreError;
use crate::domain::lobby::{Lobby, LobbyStatus};
use crate::domain::match_history::MatchHistory;
use crate::domain::match_request::{MatchRequest, MatchRequestStatus};
use crate::domain::ports::{
    ChatStore, FinalizeInput, FinalizeOutcome, HistoryStore, LobbyStore, Persistence, RequestStore, UserStore,
};
use crate::domain::user::User;

#[derive(Default)]
pub struct InMemoryUserStore(RwLock<HashMap<Uuid, User>>);

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, CoreError> {
        Ok(self.0.read().await.get(&user_id).cloned())
    }

    async fn touch_last_active(&self, user_id: Uuid, at: u64) -> Result<(), CoreError> {
        if let Some(user) = self.0.write().await.get_mut(&user_id) {
            user.last_active = at;
        }
        Ok(())
    }
}

impl InMemoryUserStore {
    pub async fn insert(&self, user: User) {
        self.0.write().await.insert(user.id, user);
    }
}

#[derive(Default)]
pub struct InMemoryRequestStore(RwLock<HashMap<Uuid, MatchRequest>>);

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: MatchRequest) -> Result<(), CoreError> {
        self.0.write().await.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchRequest>, CoreError> {
        Ok(self.0.read().await.get(&id).cloned())
    }

    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<MatchRequest>, CoreError> {
        Ok(self
            .0
            .read()
            .await
            .values()
            .find(|r| r.user_id == user_id && r.status == MatchRequestStatus::Searching)
            .cloned())
    }

    async fn update(&self, request: MatchRequest) -> Result<(), CoreError> {
        self.0.write().await.insert(request.id, request);
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        expected: MatchRequestStatus,
        new_status: MatchRequestStatus,
        matched_lobby_id: Option<Uuid>,
    ) -> Result<bool, CoreError> {
        let mut store = self.0.write().await;
        let Some(request) = store.get_mut(&id) else {
            return Ok(false);
        };
        if request.status != expected {
            return Ok(false);
        }
        request.status = new_status;
        request.matched_lobby_id = matched_lobby_id;
        Ok(true)
    }

    async fn list_searching_older_than(
        &self,
        age_ms: u64,
        now: u64,
        limit: usize,
    ) -> Result<Vec<MatchRequest>, CoreError> {
        let store = self.0.read().await;
        let mut stale: Vec<MatchRequest> = store
            .values()
            .filter(|r| r.status == MatchRequestStatus::Searching && now.saturating_sub(r.search_start_time) > age_ms)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.search_start_time);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[derive(Default)]
pub struct InMemoryHistoryStore(RwLock<HashMap<Uuid, MatchHistory>>);

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, history: MatchHistory) -> Result<(), CoreError> {
        self.0.write().await.insert(history.id, history);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchHistory>, CoreError> {
        Ok(self.0.read().await.get(&id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, offset: usize, limit: usize) -> Result<Vec<MatchHistory>, CoreError> {
        let store = self.0.read().await;
        let mut items: Vec<MatchHistory> = store
            .values()
            .filter(|h| h.participants.iter().any(|p| p.user_id == user_id))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.formed_at.cmp(&a.formed_at));
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }
}

#[derive(Default)]
pub struct InMemoryLobbyStore(RwLock<HashMap<Uuid, Lobby>>);

#[async_trait]
impl LobbyStore for InMemoryLobbyStore {
    async fn insert(&self, lobby: Lobby) -> Result<(), CoreError> {
        self.0.write().await.insert(lobby.id, lobby);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lobby>, CoreError> {
        Ok(self.0.read().await.get(&id).cloned())
    }

    async fn update(&self, lobby: Lobby) -> Result<(), CoreError> {
        self.0.write().await.insert(lobby.id, lobby);
        Ok(())
    }

    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<Lobby>, CoreError> {
        Ok(self
            .0
            .read()
            .await
            .values()
            .find(|l| l.status != LobbyStatus::Closed && l.is_member(user_id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid, include_history: bool) -> Result<Vec<Lobby>, CoreError> {
        let store = self.0.read().await;
        Ok(store
            .values()
            .filter(|l| {
                let member = l.members.iter().any(|m| m.user_id == user_id);
                member && (include_history || l.status != LobbyStatus::Closed)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryChatStore(RwLock<HashMap<Uuid, Chat>>);

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn insert(&self, chat: Chat) -> Result<(), CoreError> {
        self.0.write().await.insert(chat.id, chat);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Chat>, CoreError> {
        Ok(self.0.read().await.get(&id).cloned())
    }

    async fn get_for_lobby(&self, lobby_id: Uuid) -> Result<Option<Chat>, CoreError> {
        Ok(self.0.read().await.values().find(|c| c.lobby_id == Some(lobby_id)).cloned())
    }

    async fn update(&self, chat: Chat) -> Result<(), CoreError> {
        self.0.write().await.insert(chat.id, chat);
        Ok(())
    }
}

pub struct MemoryPersistence {
    users: Arc<InMemoryUserStore>,
    requests: Arc<InMemoryRequestStore>,
    history: Arc<InMemoryHistoryStore>,
    lobbies: Arc<InMemoryLobbyStore>,
    chats: Arc<InMemoryChatStore>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self {
            users: Arc::new(InMemoryUserStore::default()),
            requests: Arc::new(InMemoryRequestStore::default()),
            history: Arc::new(InMemoryHistoryStore::default()),
            lobbies: Arc::new(InMemoryLobbyStore::default()),
            chats: Arc::new(InMemoryChatStore::default()),
        }
    }

    pub fn lobbies_arc(&self) -> Arc<dyn LobbyStore> {
        self.lobbies.clone()
    }

    pub fn chats_arc(&self) -> Arc<dyn ChatStore> {
        self.chats.clone()
    }

    pub async fn seed_user(&self, user: User) {
        self.users.insert(user).await;
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    fn supports_transactions(&self) -> bool {
        false
    }

    fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    fn requests(&self) -> &dyn RequestStore {
        self.requests.as_ref()
    }

    fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    fn lobbies(&self) -> &dyn LobbyStore {
        self.lobbies.as_ref()
    }

    fn chats(&self) -> &dyn ChatStore {
        self.chats.as_ref()
    }

    // No real transaction available on this backend; the re-read-then-write
    // sequence below relies on the caller's named lock (LockManager) plus
    // this re-read for safety, per spec §9's capability-flag design note.
    async fn finalize_match(&self, input: FinalizeInput) -> Result<FinalizeOutcome, CoreError> {
        if let Some(existing) = self.history.get(input.history.id).await? {
            if let Some(lobby_id) = existing.lobby_id {
                return Ok(FinalizeOutcome::AlreadyFinalized { lobby_id });
            }
        }

        let lobby_id = input.lobby.id;
        let mut history = input.history;
        history.lobby_id = Some(lobby_id);

        self.history.insert(history).await?;
        self.lobbies.insert(input.lobby).await?;
        self.chats.insert(input.chat).await?;

        for request_id in input.participant_requests {
            self.requests
                .set_status_if(request_id, MatchRequestStatus::Searching, MatchRequestStatus::Matched, Some(lobby_id))
                .await?;
        }

        Ok(FinalizeOutcome::Created { lobby_id })
    }
}
