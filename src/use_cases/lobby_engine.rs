// LobbyEngine: lobby + chat lifecycle, membership, ready-gating, host
// transfer, auto-closure, and system-message emission. Grounded on
// `game_server::use_cases::lobby::LobbyRegistry`'s registry shape,
// generalized from game-world lobbies to matchmaking lobbies.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::chat::{Chat, ChatMessage, ChatType, ContentType, MAX_MESSAGE_LEN};
use crate::domain::errors::CoreError;
use crate::domain::lobby::{Capacity, Lobby, LobbyMember, LobbySettings, LobbyStatus, MemberStatus};
use crate::domain::ports::{ChatStore, Clock, LobbyStore};
use crate::domain::user::UserStatus;

#[derive(Debug, Clone)]
pub enum LobbyEvent {
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

pub struct CreateLobbyInput {
    pub match_history_id: Uuid,
    pub game_id: Uuid,
    pub game_mode: crate::domain::criteria::GameMode,
    pub region: String,
    pub participant_user_ids: Vec<Uuid>,
}

pub struct LobbyEngine {
    lobbies: Arc<dyn LobbyStore>,
    chats: Arc<dyn ChatStore>,
    clock: Arc<dyn Clock>,
    events: tokio::sync::broadcast::Sender<LobbyEvent>,
    auto_start_delay: Duration,
}

impl LobbyEngine {
    pub fn new(
        lobbies: Arc<dyn LobbyStore>,
        chats: Arc<dyn ChatStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _rx) = tokio::sync::broadcast::channel(1024);
        Self {
            lobbies,
            chats,
            clock,
            events,
            auto_start_delay: Duration::from_secs(5),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LobbyEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LobbyEvent) {
        let _ = self.events.send(event);
    }

    // Pure construction of a Lobby + its bound Chat, with no I/O. The
    // caller (MatchmakingService.finalize_match) persists both atomically
    // via `Persistence::finalize_match` alongside the match-history link
    // and participant status transitions, then calls `announce_created`.
    pub fn build_lobby_and_chat(&self, input: CreateLobbyInput) -> Result<(Lobby, Chat, ChatMessage), CoreError> {
        let now = self.clock.now_ms();
        let n = input.participant_user_ids.len() as u32;
        let host_id = *input
            .participant_user_ids
            .first()
            .ok_or_else(|| CoreError::Internal("cannot create a lobby with no participants".into()))?;

        let members: Vec<LobbyMember> = input
            .participant_user_ids
            .iter()
            .map(|&user_id| LobbyMember {
                user_id,
                status: MemberStatus::Joined,
                ready_status: false,
                is_host: user_id == host_id,
                joined_at: now,
                left_at: None,
            })
            .collect();

        let chat_id = Uuid::new_v4();
        let lobby_id = Uuid::new_v4();

        let lobby = Lobby {
            id: lobby_id,
            name: format!("Lobby {}", &lobby_id.to_string()[..8]),
            game_id: input.game_id,
            game_mode: input.game_mode,
            region: input.region,
            match_history_id: input.match_history_id,
            host_id,
            capacity: Capacity { min: n, max: n },
            members,
            status: LobbyStatus::Forming,
            chat_id,
            settings: LobbySettings::default(),
            created_at: now,
            updated_at: now,
            closed_at: None,
        };

        let system_message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: None,
            content: "Lobby created!".to_string(),
            content_type: ContentType::System,
            created_at: now,
            edited_at: None,
            deleted_at: None,
        };

        let chat = Chat {
            id: chat_id,
            chat_type: ChatType::Lobby,
            participants: input.participant_user_ids.clone(),
            lobby_id: Some(lobby_id),
            messages: vec![system_message.clone()],
            last_message_at: Some(now),
        };

        Ok((lobby, chat, system_message))
    }

    // Emits the events a freshly-persisted lobby should announce. Called
    // only after `Persistence::finalize_match` reports `Created` (not on
    // `AlreadyFinalized`, to preserve at-most-once notification).
    pub fn announce_created(&self, lobby: Lobby, system_message: ChatMessage) {
        let lobby_id = lobby.id;
        self.emit(LobbyEvent::Created { lobby });
        self.emit(LobbyEvent::SystemMessage {
            lobby_id,
            message: system_message,
        });
    }

    // Private lobbies hide existence from non-members to avoid disclosure.
    pub async fn get_lobby_by_id(&self, id: Uuid, viewer_id: Option<Uuid>) -> Result<Lobby, CoreError> {
        let lobby = self
            .lobbies
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;

        if lobby.settings.is_private {
            let is_member = viewer_id.map(|v| lobby.is_member(v)).unwrap_or(false);
            if !is_member {
                return Err(CoreError::NotFound("lobby not found".into()));
            }
        }
        Ok(lobby)
    }

    pub async fn join_lobby(
        self: &Arc<Self>,
        id: Uuid,
        user_id: Uuid,
        user_status: UserStatus,
    ) -> Result<Lobby, CoreError> {
        if !user_status.is_active() {
            return Err(CoreError::BadRequest("user is not active".into()));
        }

        if let Some(existing) = self.lobbies.get_active_for_user(user_id).await? {
            if existing.id != id {
                return Err(CoreError::Conflict("user is already in another lobby".into()));
            }
        }

        let mut lobby = self
            .lobbies
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;

        if lobby.status != LobbyStatus::Forming {
            return Err(CoreError::BadRequest("lobby is not accepting members".into()));
        }
        if lobby.member_count() as u32 >= lobby.capacity.max {
            return Err(CoreError::BadRequest("lobby is full".into()));
        }

        let now = self.clock.now_ms();
        if let Some(member) = lobby.member_mut(user_id) {
            member.status = MemberStatus::Joined;
            member.ready_status = false;
            member.left_at = None;
        } else {
            lobby.members.push(LobbyMember {
                user_id,
                status: MemberStatus::Joined,
                ready_status: false,
                is_host: false,
                joined_at: now,
                left_at: None,
            });
        }
        lobby.updated_at = now;
        self.lobbies.update(lobby.clone()).await?;

        if let Some(mut chat) = self.chats.get_for_lobby(id).await? {
            chat.ensure_participant(user_id);
            self.chats.update(chat).await?;
        }

        let message = self.system_message_text(id, "A player joined the lobby.").await?;
        self.emit(LobbyEvent::MemberJoined { lobby_id: id, user_id });
        self.emit(LobbyEvent::SystemMessage { lobby_id: id, message });
        self.emit(LobbyEvent::Updated { lobby: lobby.clone() });

        Ok(lobby)
    }

    pub async fn leave_lobby(self: &Arc<Self>, id: Uuid, user_id: Uuid) -> Result<Lobby, CoreError> {
        let mut lobby = self
            .lobbies
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;

        if lobby.status == LobbyStatus::Closed {
            return Ok(lobby);
        }

        let now = self.clock.now_ms();
        let was_host = lobby.member(user_id).map(|m| m.is_host).unwrap_or(false);
        if let Some(member) = lobby.member_mut(user_id) {
            member.status = MemberStatus::Left;
            member.ready_status = false;
            member.left_at = Some(now);
            member.is_host = false;
        }

        if was_host {
            // Transfer to the next joined|ready, non-host member with the
            // oldest joinedAt.
            let next_host = lobby
                .members
                .iter()
                .filter(|m| m.is_active())
                .min_by_key(|m| m.joined_at)
                .map(|m| m.user_id);
            if let Some(next_host_id) = next_host {
                if let Some(m) = lobby.member_mut(next_host_id) {
                    m.is_host = true;
                }
                lobby.host_id = next_host_id;
            }
        }

        // Leaving can break an all-ready lobby back to forming.
        if lobby.status == LobbyStatus::Ready && !lobby.all_active_ready() {
            lobby.status = LobbyStatus::Forming;
        }

        lobby.updated_at = now;

        let remaining = lobby.member_count();
        if remaining == 0 && lobby.settings.auto_close && lobby.status != LobbyStatus::Active {
            lobby.status = LobbyStatus::Closed;
            lobby.closed_at = Some(now);
            self.lobbies.update(lobby.clone()).await?;
            self.emit(LobbyEvent::Closed {
                lobby_id: id,
                reason: "empty lobby auto-closed".to_string(),
            });
            return Ok(lobby);
        }

        self.lobbies.update(lobby.clone()).await?;

        let message = self.system_message_text(id, "A player left the lobby.").await?;
        self.emit(LobbyEvent::MemberLeft { lobby_id: id, user_id });
        self.emit(LobbyEvent::SystemMessage { lobby_id: id, message });
        self.emit(LobbyEvent::Updated { lobby: lobby.clone() });

        Ok(lobby)
    }

    pub async fn set_member_ready(
        self: &Arc<Self>,
        id: Uuid,
        user_id: Uuid,
        ready: bool,
    ) -> Result<Lobby, CoreError> {
        let mut lobby = self
            .lobbies
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;

        if !matches!(lobby.status, LobbyStatus::Forming | LobbyStatus::Ready) {
            return Err(CoreError::BadRequest("lobby is not in a ready-gating state".into()));
        }

        let now = self.clock.now_ms();
        {
            let member = lobby
                .member_mut(user_id)
                .ok_or_else(|| CoreError::Authorization("user is not a lobby member".into()))?;
            member.ready_status = ready;
            member.status = if ready {
                MemberStatus::Ready
            } else {
                MemberStatus::Joined
            };
        }
        lobby.updated_at = now;

        let was_ready = lobby.status == LobbyStatus::Ready;
        let member_count = lobby.member_count() as u32;
        let in_capacity_range =
            member_count >= lobby.capacity.min && member_count <= lobby.capacity.max;

        if lobby.all_active_ready() && in_capacity_range {
            lobby.status = LobbyStatus::Ready;
        } else if was_ready {
            lobby.status = LobbyStatus::Forming;
        }

        self.lobbies.update(lobby.clone()).await?;
        self.emit(LobbyEvent::MemberReady { lobby_id: id, user_id, ready });
        self.emit(LobbyEvent::Updated { lobby: lobby.clone() });

        if lobby.status == LobbyStatus::Ready && !was_ready && lobby.settings.auto_start {
            self.schedule_auto_start(id);
        }

        Ok(lobby)
    }

    // One-shot auto-start timer, cancellable by a readiness regression. The
    // timer re-checks `status == Ready` before starting, so a lobby that
    // dropped back to `forming` in the meantime is left untouched even if
    // the cancellation signal races with the timer firing.
    fn schedule_auto_start(self: &Arc<Self>, lobby_id: Uuid) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(engine.auto_start_delay).await;
            let Ok(Some(mut lobby)) = engine.lobbies.get(lobby_id).await else {
                return;
            };
            if lobby.status != LobbyStatus::Ready {
                return;
            }
            lobby.status = LobbyStatus::Active;
            lobby.updated_at = engine.clock.now_ms();
            if engine.lobbies.update(lobby.clone()).await.is_ok() {
                engine.emit(LobbyEvent::AutoStart { lobby_id });
                engine.emit(LobbyEvent::Updated { lobby });
            }
        });
    }

    pub async fn close_lobby(&self, id: Uuid, reason: &str) -> Result<Lobby, CoreError> {
        let mut lobby = self
            .lobbies
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;

        if lobby.status == LobbyStatus::Closed {
            return Ok(lobby);
        }

        lobby.status = LobbyStatus::Closed;
        lobby.closed_at = Some(self.clock.now_ms());
        lobby.updated_at = lobby.closed_at.unwrap();
        self.lobbies.update(lobby.clone()).await?;

        let message = self.system_message_text(id, reason).await?;
        self.emit(LobbyEvent::SystemMessage { lobby_id: id, message });
        self.emit(LobbyEvent::Closed {
            lobby_id: id,
            reason: reason.to_string(),
        });

        Ok(lobby)
    }

    async fn system_message_text(&self, lobby_id: Uuid, text: &str) -> Result<ChatMessage, CoreError> {
        self.send_system_message(lobby_id, text).await
    }

    pub async fn send_system_message(&self, lobby_id: Uuid, text: &str) -> Result<ChatMessage, CoreError> {
        let mut chat = self
            .chats
            .get_for_lobby(lobby_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("chat not found for lobby".into()))?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: None,
            content: text.to_string(),
            content_type: ContentType::System,
            created_at: self.clock.now_ms(),
            edited_at: None,
            deleted_at: None,
        };
        chat.messages.push(message.clone());
        chat.last_message_at = Some(message.created_at);
        self.chats.update(chat).await?;
        Ok(message)
    }

    pub async fn send_user_message(
        &self,
        lobby_id: Uuid,
        sender_id: Uuid,
        content: &str,
        content_type: ContentType,
    ) -> Result<ChatMessage, CoreError> {
        if content.is_empty() || content.len() > MAX_MESSAGE_LEN {
            return Err(CoreError::Validation(format!(
                "content must be 1..={MAX_MESSAGE_LEN} characters"
            )));
        }

        let lobby = self
            .lobbies
            .get(lobby_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("lobby not found".into()))?;
        if !lobby.is_member(sender_id) {
            return Err(CoreError::Authorization("sender is not a lobby member".into()));
        }

        let mut chat = self
            .chats
            .get_for_lobby(lobby_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("chat not found for lobby".into()))?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            sender_id: Some(sender_id),
            content: content.to_string(),
            content_type,
            created_at: self.clock.now_ms(),
            edited_at: None,
            deleted_at: None,
        };
        chat.messages.push(message.clone());
        chat.last_message_at = Some(message.created_at);
        self.chats.update(chat).await?;

        self.emit(LobbyEvent::ChatMessage {
            lobby_id,
            message: message.clone(),
        });
        Ok(message)
    }

    pub async fn get_messages(
        &self,
        lobby_id: Uuid,
        limit: usize,
        before: Option<u64>,
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let chat = self
            .chats
            .get_for_lobby(lobby_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("chat not found for lobby".into()))?;

        let mut messages: Vec<ChatMessage> = chat
            .messages
            .into_iter()
            .filter(|m| before.map(|b| m.created_at < b).unwrap_or(true))
            .collect();
        messages.sort_by_key(|m| m.created_at);
        if messages.len() > limit {
            let start = messages.len() - limit;
            messages = messages.split_off(start);
        }
        Ok(messages)
    }

    pub async fn get_user_lobbies(
        &self,
        user_id: Uuid,
        include_history: bool,
        limit: usize,
    ) -> Result<Vec<Lobby>, CoreError> {
        let mut lobbies = self.lobbies.list_for_user(user_id, include_history).await?;
        lobbies.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        lobbies.truncate(limit);
        Ok(lobbies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::criteria::GameMode;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::RwLock as TokioRwLock;

    struct FixedClock(std::sync::atomic::AtomicU64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MemLobbyStore(TokioRwLock<StdHashMap<Uuid, Lobby>>);

    #[async_trait]
    impl LobbyStore for MemLobbyStore {
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
        async fn list_for_user(&self, user_id: Uuid, _include_history: bool) -> Result<Vec<Lobby>, CoreError> {
            Ok(self
                .0
                .read()
                .await
                .values()
                .filter(|l| l.is_member(user_id))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MemChatStore(TokioRwLock<StdHashMap<Uuid, Chat>>);

    #[async_trait]
    impl ChatStore for MemChatStore {
        async fn insert(&self, chat: Chat) -> Result<(), CoreError> {
            self.0.write().await.insert(chat.id, chat);
            Ok(())
        }
        async fn get(&self, id: Uuid) -> Result<Option<Chat>, CoreError> {
            Ok(self.0.read().await.get(&id).cloned())
        }
        async fn get_for_lobby(&self, lobby_id: Uuid) -> Result<Option<Chat>, CoreError> {
            Ok(self
                .0
                .read()
                .await
                .values()
                .find(|c| c.lobby_id == Some(lobby_id))
                .cloned())
        }
        async fn update(&self, chat: Chat) -> Result<(), CoreError> {
            self.0.write().await.insert(chat.id, chat);
            Ok(())
        }
    }

    fn engine() -> Arc<LobbyEngine> {
        Arc::new(LobbyEngine::new(
            Arc::new(MemLobbyStore::default()),
            Arc::new(MemChatStore::default()),
            Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(0))),
        ))
    }

    async fn seed_lobby(engine: &Arc<LobbyEngine>, participants: Vec<Uuid>) -> Lobby {
        let (lobby, chat, message) = engine
            .build_lobby_and_chat(CreateLobbyInput {
                match_history_id: Uuid::new_v4(),
                game_id: Uuid::new_v4(),
                game_mode: GameMode::Competitive,
                region: "na".to_string(),
                participant_user_ids: participants,
            })
            .unwrap();
        engine.chats.insert(chat).await.unwrap();
        engine.lobbies.insert(lobby.clone()).await.unwrap();
        engine.announce_created(lobby.clone(), message);
        lobby
    }

    #[tokio::test]
    async fn build_lobby_and_chat_assigns_first_participant_as_host() {
        let e = engine();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lobby = seed_lobby(&e, vec![a, b]).await;
        assert_eq!(lobby.host_id, a);
        assert_eq!(lobby.member_count(), 2);
        assert_eq!(lobby.status, LobbyStatus::Forming);
    }

    #[tokio::test]
    async fn host_transfers_to_oldest_remaining_member_on_leave() {
        let e = engine();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lobby = seed_lobby(&e, vec![a, b]).await;

        let updated = e.leave_lobby(lobby.id, a).await.unwrap();
        assert_eq!(updated.host_id, b);
        assert!(updated.member(b).unwrap().is_host);
    }

    #[tokio::test]
    async fn lobby_becomes_ready_when_all_active_members_ready() {
        let e = engine();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lobby = seed_lobby(&e, vec![a, b]).await;

        e.set_member_ready(lobby.id, a, true).await.unwrap();
        let updated = e.set_member_ready(lobby.id, b, true).await.unwrap();
        assert_eq!(updated.status, LobbyStatus::Ready);
    }

    #[tokio::test]
    async fn leaving_breaks_ready_lobby_back_to_forming() {
        let e = engine();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let lobby_id = {
            let (mut lobby, chat, message) = e
                .build_lobby_and_chat(CreateLobbyInput {
                    match_history_id: Uuid::new_v4(),
                    game_id: Uuid::new_v4(),
                    game_mode: GameMode::Competitive,
                    region: "na".to_string(),
                    participant_user_ids: vec![a, b, c],
                })
                .unwrap();
            lobby.capacity = Capacity { min: 2, max: 3 };
            e.chats.insert(chat).await.unwrap();
            e.lobbies.insert(lobby.clone()).await.unwrap();
            e.announce_created(lobby.clone(), message);
            lobby.id
        };

        e.set_member_ready(lobby_id, a, true).await.unwrap();
        e.set_member_ready(lobby_id, b, true).await.unwrap();
        let ready = e.set_member_ready(lobby_id, c, true).await.unwrap();
        assert_eq!(ready.status, LobbyStatus::Ready);

        let after_leave = e.leave_lobby(lobby_id, c).await.unwrap();
        assert_eq!(after_leave.status, LobbyStatus::Forming);
    }

    #[tokio::test]
    async fn send_user_message_rejects_non_member() {
        let e = engine();
        let a = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let lobby = seed_lobby(&e, vec![a]).await;

        let err = e.send_user_message(lobby.id, outsider, "hi", ContentType::Text).await.unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[tokio::test]
    async fn send_user_message_rejects_empty_content() {
        let e = engine();
        let a = Uuid::new_v4();
        let lobby = seed_lobby(&e, vec![a]).await;

        let err = e.send_user_message(lobby.id, a, "", ContentType::Text).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn private_lobby_hides_existence_from_non_members() {
        let e = engine();
        let a = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let mut lobby = seed_lobby(&e, vec![a]).await;
        lobby.settings.is_private = true;
        e.lobbies.update(lobby.clone()).await.unwrap();

        let err = e
            .get_lobby_by_id(lobby.id, Some(outsider))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let ok = e.get_lobby_by_id(lobby.id, Some(a)).await;
        assert!(ok.is_ok());
    }
}
