// MatchmakingService: the orchestrator. Accepts requests, drives the
// scheduler loop, invokes MatchAlgorithm, finalizes matches via
// LockManager + LobbyEngine + Persistence, and emits status updates.
// Grounded on `matchmaking_server::use_cases::matchmaker::Matchmaker`'s
// reentrancy-guarded single-writer loop, generalized to the full
// submit/cancel/finalize lifecycle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::criteria::{GameMode, Region, SearchCriteria};
use crate::domain::errors::CoreError;
use crate::domain::events::{MatchmakingStatusEvent, MatchmakingStatusKind};
use crate::domain::match_history::{
    MatchHistory, MatchHistoryMetrics, MatchHistoryStatus, MatchQuality, MatchingMetrics,
    Participant, ParticipantStatus,
};
use crate::domain::match_request::{MatchRequest, MatchRequestStatus, RELAXATION_STEP_MS};
use crate::domain::ports::{Clock, FinalizeInput, FinalizeOutcome, NotificationSink, Persistence, RealtimeEmitter};
use crate::use_cases::lobby_engine::{CreateLobbyInput, LobbyEngine};
use crate::use_cases::lock_manager::LockManager;
use crate::use_cases::match_algorithm::{self, EnrichedRequest, FormedGroup, DEFAULT_MIN_GROUP_SIZE};
use crate::use_cases::notification_trigger::match_found_notification;
use crate::use_cases::pagination::Page;
use crate::use_cases::queue_manager::{BucketKey, QueueError, QueueManager};

const MIN_ESTIMATE_MS: u64 = 10_000;
const MAX_ESTIMATE_MS: u64 = 30 * 60 * 1000;
const RELAXATION_SWEEP_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct MatchmakingConfig {
    pub process_interval: Duration,
    pub min_group_size: usize,
    pub lock_ttl: Duration,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            process_interval: Duration::from_secs(5),
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            lock_ttl: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueInfo {
    pub estimated_wait_time_ms: u64,
    pub confidence: Confidence,
    pub potential_matches: usize,
}

pub struct MatchmakingService {
    queue: Arc<QueueManager>,
    locks: Arc<LockManager>,
    lobby_engine: Arc<LobbyEngine>,
    persistence: Arc<dyn Persistence>,
    notifications: Arc<dyn NotificationSink>,
    realtime: Arc<dyn RealtimeEmitter>,
    clock: Arc<dyn Clock>,
    config: MatchmakingConfig,
    is_processing: AtomicBool,
}

impl MatchmakingService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<QueueManager>,
        locks: Arc<LockManager>,
        lobby_engine: Arc<LobbyEngine>,
        persistence: Arc<dyn Persistence>,
        notifications: Arc<dyn NotificationSink>,
        realtime: Arc<dyn RealtimeEmitter>,
        clock: Arc<dyn Clock>,
        config: MatchmakingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            locks,
            lobby_engine,
            persistence,
            notifications,
            realtime,
            clock,
            config,
            is_processing: AtomicBool::new(false),
        })
    }

    // Starts the periodic tick and the event-driven `requestAdded` handler.
    // Call once from the composition root after construction.
    pub fn spawn(self: &Arc<Self>) {
        let svc = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(svc.config.process_interval);
            loop {
                ticker.tick().await;
                svc.process_all_queues().await;
            }
        });

        let svc = Arc::clone(self);
        let mut events = self.queue.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(added) => {
                        svc.process_specific_queue(added.game_id, added.game_mode, added.region)
                            .await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn submit_match_request(
        &self,
        user_id: Uuid,
        criteria: SearchCriteria,
    ) -> Result<MatchRequest, CoreError> {
        if criteria.games.is_empty() {
            return Err(CoreError::BadRequest("at least one game must be specified".into()));
        }

        let user = self
            .persistence
            .users()
            .get(user_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("user not found".into()))?;
        if !user.status.is_active() {
            return Err(CoreError::BadRequest("user is not active".into()));
        }

        if self
            .persistence
            .requests()
            .get_active_for_user(user_id)
            .await?
            .is_some()
        {
            return Err(CoreError::Conflict("user already has an active match request".into()));
        }

        let now = self.clock.now_ms();
        let request = MatchRequest::new(Uuid::new_v4(), user_id, criteria, vec![], now);
        self.persistence.requests().insert(request.clone()).await?;

        // The unique-active-request invariant is enforced by the store's
        // conditional insert above; QueueManager's own index is a second,
        // in-memory line of defense against a race between the check and
        // the insert on non-transactional backends.
        if let Err(QueueError::AlreadyQueued { .. }) = self.queue.add_request(request.clone()).await {
            self.persistence
                .requests()
                .set_status_if(request.id, MatchRequestStatus::Searching, MatchRequestStatus::Cancelled, None)
                .await
                .ok();
            return Err(CoreError::Conflict("user already has an active match request".into()));
        }

        self.emit_status(&request, MatchmakingStatusKind::Searching, None).await;
        Ok(request)
    }

    pub async fn cancel_match_request(
        &self,
        user_id: Uuid,
        request_id: Uuid,
    ) -> Result<MatchRequest, CoreError> {
        let mut request = self
            .persistence
            .requests()
            .get(request_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("match request not found".into()))?;

        if request.user_id != user_id {
            return Err(CoreError::Authorization("request does not belong to this user".into()));
        }
        if request.status != MatchRequestStatus::Searching {
            return Err(CoreError::BadRequest("request is no longer searching".into()));
        }

        request.status = MatchRequestStatus::Cancelled;
        self.persistence.requests().update(request.clone()).await?;
        self.queue.remove_request(user_id, request_id).await;

        self.emit_status(&request, MatchmakingStatusKind::Cancelled, None).await;
        Ok(request)
    }

    pub async fn get_current_match_request(
        &self,
        user_id: Uuid,
    ) -> Result<Option<(MatchRequest, QueueInfo)>, CoreError> {
        let Some(request) = self.queue.get_user_request(user_id).await else {
            return Ok(None);
        };
        let info = self.estimate_queue_info(&request).await;
        Ok(Some((request, info)))
    }

    pub async fn get_match_history(
        &self,
        user_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<Page<MatchHistory>, CoreError> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = (page - 1) * limit;
        let items = self.persistence.history().list_for_user(user_id, offset, limit).await?;
        let total = offset + items.len();
        Ok(Page::of(items, page, limit, total))
    }

    async fn estimate_queue_info(&self, request: &MatchRequest) -> QueueInfo {
        let Some(game_id) = request.criteria.primary_game() else {
            return QueueInfo {
                estimated_wait_time_ms: MAX_ESTIMATE_MS,
                confidence: Confidence::Low,
                potential_matches: 0,
            };
        };
        let region = request
            .criteria
            .indexed_regions()
            .into_iter()
            .next()
            .unwrap_or(Region::Any);
        let stats = self.queue.get_queue_size(game_id, request.criteria.game_mode, region).await;
        let global = self.queue.get_stats().await;
        let min_group_size = self.config.min_group_size;

        let estimated_f = if stats.size >= min_group_size {
            global.avg_wait_time_ms / min_group_size as f64
        } else {
            let players_needed = (min_group_size - stats.size) as f64;
            global.avg_wait_time_ms * players_needed
        };
        let estimated = (estimated_f as u64).clamp(MIN_ESTIMATE_MS, MAX_ESTIMATE_MS);

        QueueInfo {
            estimated_wait_time_ms: estimated,
            confidence: if stats.size >= min_group_size {
                Confidence::Medium
            } else {
                Confidence::Low
            },
            potential_matches: stats.size,
        }
    }

    async fn emit_status(&self, request: &MatchRequest, kind: MatchmakingStatusKind, info: Option<QueueInfo>) {
        let now = self.clock.now_ms();
        self.realtime
            .emit_matchmaking_status(MatchmakingStatusEvent {
                request_id: request.id,
                status: kind,
                search_time_ms: request.search_duration(now),
                estimated_time_ms: info.map(|i| i.estimated_wait_time_ms),
                potential_matches: info.map(|i| i.potential_matches),
                match_id: None,
                lobby_id: None,
                participants: None,
                timestamp: now,
            })
            .await;
    }

    pub async fn process_all_queues(self: &Arc<Self>) {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            return;
        }
        let buckets = self.queue.all_bucket_keys_with_size(self.config.min_group_size).await;
        for (key, _) in buckets {
            self.process_specific_queue(key.game_id, key.game_mode, key.region).await;
        }
        self.apply_relaxation_to_waiting_requests().await;
        self.is_processing.store(false, Ordering::SeqCst);
    }

    // No reentrancy guard: operates on a single bucket and does its own
    // per-bucket work, invoked both from the tick and from `requestAdded`.
    pub async fn process_specific_queue(self: &Arc<Self>, game_id: Uuid, game_mode: GameMode, region: Region) {
        let requests = self.queue.get_queue_requests(game_id, game_mode, region).await;

        for request in &requests {
            let info = self.estimate_queue_info(request).await;
            self.emit_status(request, MatchmakingStatusKind::Searching, Some(info)).await;
        }

        if requests.len() < self.config.min_group_size {
            return;
        }

        let now = self.clock.now_ms();
        let mut enriched = Vec::with_capacity(requests.len());
        for request in requests {
            match self.persistence.users().get(request.user_id).await {
                Ok(Some(user)) => enriched.push(EnrichedRequest::new(request, user)),
                Ok(None) => {
                    tracing::warn!(user_id = %request.user_id, "match request references unknown user");
                }
                Err(err) => {
                    tracing::error!(%err, "failed to load user while enriching match request");
                }
            }
        }

        let max_relaxation = enriched.iter().map(|e| e.request.relaxation_level).max().unwrap_or(0);
        let groups = match_algorithm::select_groups(&enriched, max_relaxation, now, self.config.min_group_size);

        for group in groups {
            if let Err(err) = self.finalize_match(group, game_id, region).await {
                tracing::error!(%err, "match finalization failed");
            }
        }
    }

    // Scans up to 50 oldest `searching` requests aged >30s: expires the
    // ones past their TTL, advances relaxation on the rest, and re-triggers
    // `processSpecificQueue` on any bucket whose relaxation advanced.
    pub async fn apply_relaxation_to_waiting_requests(self: &Arc<Self>) {
        let now = self.clock.now_ms();
        let stale = match self
            .persistence
            .requests()
            .list_searching_older_than(RELAXATION_STEP_MS, now, RELAXATION_SWEEP_LIMIT)
            .await
        {
            Ok(reqs) => reqs,
            Err(err) => {
                tracing::error!(%err, "failed to list stale match requests");
                return;
            }
        };

        let mut retrigger: HashSet<BucketKey> = HashSet::new();
        for mut request in stale {
            if request.is_expired(now) {
                request.status = MatchRequestStatus::Expired;
                if self.persistence.requests().update(request.clone()).await.is_ok() {
                    self.queue.remove_request(request.user_id, request.id).await;
                }
                continue;
            }

            let Some(new_level) = match_algorithm::apply_criteria_relaxation(&request, now) else {
                continue;
            };
            request.relaxation_level = new_level;
            request.relaxation_timestamp = now;
            if self.persistence.requests().update(request.clone()).await.is_err() {
                continue;
            }
            self.queue.replace_request(request.clone()).await;

            if let Some(game_id) = request.criteria.primary_game() {
                for region in request.criteria.indexed_regions() {
                    retrigger.insert(BucketKey {
                        game_id,
                        game_mode: request.criteria.game_mode,
                        region,
                    });
                }
            }
        }

        for key in retrigger {
            self.process_specific_queue(key.game_id, key.game_mode, key.region).await;
        }
    }

    // The finalization critical section (spec §4.3): acquire a named lock,
    // build the lobby/chat/history, hand them to `Persistence::finalize_match`
    // for the atomic write, then fan out status + lobby-created events and
    // a `match_found` notification per participant. Idempotent: a racing
    // finalize for the same history observes `AlreadyFinalized` and does
    // nothing further.
    async fn finalize_match(
        self: &Arc<Self>,
        group: FormedGroup,
        game_id: Uuid,
        region: Region,
    ) -> Result<(), CoreError> {
        let now = self.clock.now_ms();
        let history_id = Uuid::new_v4();
        let lock_key = format!("match:{history_id}");

        let handle = match self.locks.acquire(&lock_key, self.config.lock_ttl, now).await {
            Some(handle) => handle,
            None => return Err(CoreError::Conflict("could not acquire finalize lock".into())),
        };

        let result = self.finalize_match_locked(group, game_id, region, history_id, now).await;
        self.locks.release(&handle).await;
        result
    }

    async fn finalize_match_locked(
        self: &Arc<Self>,
        group: FormedGroup,
        game_id: Uuid,
        region: Region,
        history_id: Uuid,
        now: u64,
    ) -> Result<(), CoreError> {
        let participant_user_ids: Vec<Uuid> = group.members.iter().map(|m| m.request.user_id).collect();
        let participant_request_ids: Vec<Uuid> = group.members.iter().map(|m| m.request.id).collect();

        let quality = match_algorithm::match_quality(&group.members, game_id, now);
        let search_times: Vec<u64> = group.members.iter().map(|m| m.request.search_duration(now)).collect();
        let history = MatchHistory {
            id: history_id,
            game_id,
            game_mode: group.members[0].request.criteria.game_mode,
            region: region.as_str().to_string(),
            participants: group
                .members
                .iter()
                .map(|m| Participant {
                    user_id: m.request.user_id,
                    request_id: m.request.id,
                    joined_at: now,
                    left_at: None,
                    status: ParticipantStatus::Active,
                })
                .collect(),
            match_quality: MatchQuality {
                skill_balance: quality.skill_balance,
                region_compatibility: quality.region,
                language_compatibility: quality.language,
                overall_score: quality.overall,
            },
            matching_metrics: MatchHistoryMetrics {
                timing: MatchingMetrics {
                    total_search_time_ms: search_times.iter().sum(),
                    max_search_time_ms: search_times.iter().copied().max().unwrap_or(0),
                    min_search_time_ms: search_times.iter().copied().min().unwrap_or(0),
                },
                relaxation_levels_used: group.members.iter().map(|m| m.request.relaxation_level).collect(),
            },
            lobby_id: None,
            status: MatchHistoryStatus::Forming,
            formed_at: now,
            started_at: None,
            completed_at: None,
        };

        let (lobby, chat, system_message) = self.lobby_engine.build_lobby_and_chat(CreateLobbyInput {
            match_history_id: history_id,
            game_id,
            game_mode: history.game_mode,
            region: history.region.clone(),
            participant_user_ids: participant_user_ids.clone(),
        })?;

        let outcome = self
            .persistence
            .finalize_match(FinalizeInput {
                history,
                lobby: lobby.clone(),
                chat,
                participant_requests: participant_request_ids,
            })
            .await?;

        let lobby_id = match outcome {
            FinalizeOutcome::AlreadyFinalized { .. } => return Ok(()),
            FinalizeOutcome::Created { lobby_id } => lobby_id,
        };

        self.lobby_engine.announce_created(lobby, system_message);

        for member in &group.members {
            self.queue.remove_request(member.request.user_id, member.request.id).await;
            self.queue.update_stats(true, member.request.search_duration(now)).await;

            self.realtime
                .emit_matchmaking_status(MatchmakingStatusEvent {
                    request_id: member.request.id,
                    status: MatchmakingStatusKind::Matched,
                    search_time_ms: member.request.search_duration(now),
                    estimated_time_ms: None,
                    potential_matches: None,
                    match_id: Some(history_id),
                    lobby_id: Some(lobby_id),
                    participants: Some(participant_user_ids.clone()),
                    timestamp: now,
                })
                .await;
            self.realtime.emit_lobby_created(member.request.user_id, lobby_id).await;

            self.notifications
                .create_notification(match_found_notification(member.request.user_id, history_id, lobby_id))
                .await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::RwLock as TokioRwLock;

    use crate::domain::chat::Chat;
    use crate::domain::criteria::{
        GroupSize, LanguagePreference, RegionPreference, SkillPreference, WeightedGame,
    };
    use crate::domain::lobby::{Lobby, LobbyStatus};
    use crate::domain::notification::Notification;
    use crate::domain::user::{GameProfile, User, UserStatus};
    use crate::use_cases::lobby_engine::LobbyEngine;

    struct FixedClock(std::sync::atomic::AtomicU64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> u64 {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MemUserStore(TokioRwLock<StdHashMap<Uuid, User>>);

    #[async_trait]
    impl UserStore for MemUserStore {
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

    #[derive(Default)]
    struct MemRequestStore(TokioRwLock<StdHashMap<Uuid, MatchRequest>>);

    #[async_trait]
    impl RequestStore for MemRequestStore {
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
            _age_ms: u64,
            _now: u64,
            _limit: usize,
        ) -> Result<Vec<MatchRequest>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MemHistoryStore(TokioRwLock<StdHashMap<Uuid, MatchHistory>>);

    #[async_trait]
    impl HistoryStore for MemHistoryStore {
        async fn insert(&self, history: MatchHistory) -> Result<(), CoreError> {
            self.0.write().await.insert(history.id, history);
            Ok(())
        }
        async fn get(&self, id: Uuid) -> Result<Option<MatchHistory>, CoreError> {
            Ok(self.0.read().await.get(&id).cloned())
        }
        async fn list_for_user(
            &self,
            user_id: Uuid,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<MatchHistory>, CoreError> {
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
            Ok(self.0.read().await.values().filter(|l| l.is_member(user_id)).cloned().collect())
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
            Ok(self.0.read().await.values().find(|c| c.lobby_id == Some(lobby_id)).cloned())
        }
        async fn update(&self, chat: Chat) -> Result<(), CoreError> {
            self.0.write().await.insert(chat.id, chat);
            Ok(())
        }
    }

    struct FakePersistence {
        users: Arc<MemUserStore>,
        requests: Arc<MemRequestStore>,
        history: Arc<MemHistoryStore>,
        lobbies: Arc<MemLobbyStore>,
        chats: Arc<MemChatStore>,
    }

    impl FakePersistence {
        fn new() -> Self {
            Self {
                users: Arc::new(MemUserStore::default()),
                requests: Arc::new(MemRequestStore::default()),
                history: Arc::new(MemHistoryStore::default()),
                lobbies: Arc::new(MemLobbyStore::default()),
                chats: Arc::new(MemChatStore::default()),
            }
        }

        async fn seed_user(&self, user: User) {
            self.users.0.write().await.insert(user.id, user);
        }
    }

    #[async_trait]
    impl Persistence for FakePersistence {
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

    #[derive(Default)]
    struct FakeNotificationSink(TokioRwLock<Vec<Notification>>);

    #[async_trait]
    impl NotificationSink for FakeNotificationSink {
        async fn create_notification(&self, notification: Notification) {
            self.0.write().await.push(notification);
        }
    }

    #[derive(Default)]
    struct FakeRealtimeEmitter {
        statuses: TokioRwLock<Vec<MatchmakingStatusEvent>>,
        lobby_created: TokioRwLock<Vec<(Uuid, Uuid)>>,
    }

    #[async_trait]
    impl RealtimeEmitter for FakeRealtimeEmitter {
        async fn emit_matchmaking_status(&self, event: MatchmakingStatusEvent) {
            self.statuses.write().await.push(event);
        }
        async fn emit_lobby_created(&self, user_id: Uuid, lobby_id: Uuid) {
            self.lobby_created.write().await.push((user_id, lobby_id));
        }
    }

    fn criteria(game_id: Uuid) -> SearchCriteria {
        SearchCriteria {
            games: vec![WeightedGame { game_id, weight: 10 }],
            game_mode: GameMode::Competitive,
            group_size: GroupSize { min: 2, max: 4 },
            regions: vec![Region::Na],
            region_preference: RegionPreference::Strict,
            languages: vec!["en".to_string()],
            language_preference: LanguagePreference::Strict,
            skill_preference: SkillPreference::Any,
            scheduled_time: None,
        }
    }

    fn active_user(id: Uuid, game_id: Uuid) -> User {
        User {
            id,
            username: format!("user-{}", &id.to_string()[..8]),
            status: UserStatus::Active,
            game_profiles: vec![GameProfile {
                game_id,
                skill_level: 50,
                rank: None,
                in_game_name: None,
            }],
            last_active: 0,
        }
    }

    struct Harness {
        service: Arc<MatchmakingService>,
        persistence: Arc<FakePersistence>,
        realtime: Arc<FakeRealtimeEmitter>,
        notifications: Arc<FakeNotificationSink>,
    }

    fn build_harness() -> Harness {
        let persistence = Arc::new(FakePersistence::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(std::sync::atomic::AtomicU64::new(0)));
        let lobby_engine = Arc::new(LobbyEngine::new(
            persistence.lobbies.clone(),
            persistence.chats.clone(),
            Arc::clone(&clock),
        ));
        let realtime = Arc::new(FakeRealtimeEmitter::default());
        let notifications = Arc::new(FakeNotificationSink::default());

        let service = MatchmakingService::new(
            Arc::new(QueueManager::new()),
            Arc::new(LockManager::new()),
            lobby_engine,
            persistence.clone() as Arc<dyn Persistence>,
            notifications.clone() as Arc<dyn NotificationSink>,
            realtime.clone() as Arc<dyn RealtimeEmitter>,
            clock,
            MatchmakingConfig {
                process_interval: Duration::from_secs(3600),
                min_group_size: 2,
                lock_ttl: Duration::from_secs(10),
            },
        );

        Harness {
            service,
            persistence,
            realtime,
            notifications,
        }
    }

    #[tokio::test]
    async fn submit_match_request_rejects_empty_games() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(user_id, Uuid::new_v4())).await;

        let mut empty_criteria = criteria(Uuid::new_v4());
        empty_criteria.games.clear();

        let err = h.service.submit_match_request(user_id, empty_criteria).await.unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn submit_match_request_rejects_inactive_user() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        let mut user = active_user(user_id, game_id);
        user.status = UserStatus::Suspended;
        h.persistence.seed_user(user).await;

        let err = h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn submit_match_request_rejects_unknown_user() {
        let h = build_harness();
        let err = h
            .service
            .submit_match_request(Uuid::new_v4(), criteria(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn submit_match_request_happy_path_queues_and_emits_searching() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(user_id, game_id)).await;

        let request = h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap();
        assert_eq!(request.status, MatchRequestStatus::Searching);

        let current = h.service.get_current_match_request(user_id).await.unwrap();
        assert!(current.is_some());

        let statuses = h.realtime.statuses.read().await;
        assert!(statuses.iter().any(|e| e.status == MatchmakingStatusKind::Searching));
    }

    #[tokio::test]
    async fn submit_match_request_rejects_duplicate_active_request() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(user_id, game_id)).await;

        h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap();
        let err = h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_match_request_happy_path() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(user_id, game_id)).await;

        let request = h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap();
        let cancelled = h.service.cancel_match_request(user_id, request.id).await.unwrap();
        assert_eq!(cancelled.status, MatchRequestStatus::Cancelled);
        assert!(h.service.get_current_match_request(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_match_request_rejects_other_users_request() {
        let h = build_harness();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(owner, game_id)).await;

        let request = h.service.submit_match_request(owner, criteria(game_id)).await.unwrap();
        let err = h.service.cancel_match_request(intruder, request.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Authorization(_)));
    }

    #[tokio::test]
    async fn cancel_match_request_rejects_when_already_resolved() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let game_id = Uuid::new_v4();
        h.persistence.seed_user(active_user(user_id, game_id)).await;

        let request = h.service.submit_match_request(user_id, criteria(game_id)).await.unwrap();
        h.service.cancel_match_request(user_id, request.id).await.unwrap();

        let err = h.service.cancel_match_request(user_id, request.id).await.unwrap_err();
        assert!(matches!(err, CoreError::BadRequest(_)));
    }

    #[tokio::test]
    async fn get_match_history_paginates_by_user() {
        let h = build_harness();
        let user_id = Uuid::new_v4();
        let other_lobby = Uuid::new_v4();
        for i in 0..3u64 {
            h.persistence
                .history
                .insert(MatchHistory {
                    id: Uuid::new_v4(),
                    game_id: Uuid::new_v4(),
                    game_mode: GameMode::Casual,
                    region: "NA".to_string(),
                    participants: vec![Participant {
                        user_id,
                        request_id: Uuid::new_v4(),
                        joined_at: 0,
                        left_at: None,
                        status: ParticipantStatus::Active,
                    }],
                    match_quality: MatchQuality {
                        skill_balance: 1.0,
                        region_compatibility: 1.0,
                        language_compatibility: 1.0,
                        overall_score: 1.0,
                    },
                    matching_metrics: MatchHistoryMetrics {
                        timing: MatchingMetrics {
                            total_search_time_ms: 0,
                            max_search_time_ms: 0,
                            min_search_time_ms: 0,
                        },
                        relaxation_levels_used: vec![0],
                    },
                    lobby_id: Some(other_lobby),
                    status: MatchHistoryStatus::Completed,
                    formed_at: i,
                    started_at: None,
                    completed_at: None,
                })
                .await
                .unwrap();
        }

        let page = h.service.get_match_history(user_id, 1, 2).await.unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn two_compatible_requests_form_a_match_and_create_a_lobby() {
        let h = build_harness();
        let game_id = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        h.persistence.seed_user(active_user(a, game_id)).await;
        h.persistence.seed_user(active_user(b, game_id)).await;

        h.service.submit_match_request(a, criteria(game_id)).await.unwrap();
        h.service.submit_match_request(b, criteria(game_id)).await.unwrap();

        h.service.process_specific_queue(game_id, GameMode::Competitive, Region::Na).await;

        assert!(h.service.get_current_match_request(a).await.unwrap().is_none());
        assert!(h.service.get_current_match_request(b).await.unwrap().is_none());

        let lobby_created = h.realtime.lobby_created.read().await;
        assert_eq!(lobby_created.len(), 2);
        let notifications = h.notifications.0.read().await;
        assert_eq!(notifications.len(), 2);

        let matched_statuses: Vec<_> = h
            .realtime
            .statuses
            .read()
            .await
            .iter()
            .filter(|e| e.status == MatchmakingStatusKind::Matched)
            .cloned()
            .collect();
        assert_eq!(matched_statuses.len(), 2);
        assert!(matched_statuses[0].lobby_id.is_some());
    }
}
