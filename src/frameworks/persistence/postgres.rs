// PostgreSQL-backed persistence adapter, `supports_transactions() == true`.
// Grounded on `auth_server::frameworks::db`'s `PgPoolOptions`/`sqlx::migrate!`
// pattern and `PostgresGuestProfileStore`'s runtime `sqlx::query` + `.bind()`
// style (no `query!` macro, since that needs a live DB at compile time).
// `finalize_match` wraps its writes in a real `sqlx::Transaction`, the one
// place this crate actually needs the transactional guarantee the in-memory
// adapter can only approximate.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::domain::chat::Chat;
use crate::domain::criteria::GameMode;
use crate::domain::errors::CoreError;
use crate::domain::lobby::{Lobby, LobbyStatus};
use crate::domain::match_history::{MatchHistory, MatchHistoryStatus};
use crate::domain::match_request::{MatchRequest, MatchRequestStatus};
use crate::domain::ports::{
    ChatStore, FinalizeInput, FinalizeOutcome, HistoryStore, LobbyStore, Persistence, RequestStore, UserStore,
};
use crate::domain::user::{User, UserStatus};

pub async fn connect_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(10).connect(database_url).await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
    MIGRATOR.run(pool).await
}

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("database error: {err}"))
}

fn game_mode_to_str(mode: GameMode) -> &'static str {
    match mode {
        GameMode::Casual => "casual",
        GameMode::Competitive => "competitive",
        GameMode::Ranked => "ranked",
        GameMode::Custom => "custom",
    }
}

fn game_mode_from_str(s: &str) -> GameMode {
    match s {
        "competitive" => GameMode::Competitive,
        "ranked" => GameMode::Ranked,
        "custom" => GameMode::Custom,
        _ => GameMode::Casual,
    }
}

fn request_status_to_str(status: MatchRequestStatus) -> &'static str {
    match status {
        MatchRequestStatus::Searching => "searching",
        MatchRequestStatus::Cancelled => "cancelled",
        MatchRequestStatus::Matched => "matched",
        MatchRequestStatus::Expired => "expired",
    }
}

fn request_status_from_str(s: &str) -> MatchRequestStatus {
    match s {
        "cancelled" => MatchRequestStatus::Cancelled,
        "matched" => MatchRequestStatus::Matched,
        "expired" => MatchRequestStatus::Expired,
        _ => MatchRequestStatus::Searching,
    }
}

fn user_status_to_str(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Active => "active",
        UserStatus::Suspended => "suspended",
        UserStatus::Banned => "banned",
        UserStatus::Deleted => "deleted",
    }
}

fn user_status_from_str(s: &str) -> UserStatus {
    match s {
        "suspended" => UserStatus::Suspended,
        "banned" => UserStatus::Banned,
        "deleted" => UserStatus::Deleted,
        _ => UserStatus::Active,
    }
}

fn history_status_to_str(status: MatchHistoryStatus) -> &'static str {
    match status {
        MatchHistoryStatus::Forming => "forming",
        MatchHistoryStatus::Ready => "ready",
        MatchHistoryStatus::InProgress => "in_progress",
        MatchHistoryStatus::Completed => "completed",
        MatchHistoryStatus::Cancelled => "cancelled",
    }
}

fn history_status_from_str(s: &str) -> MatchHistoryStatus {
    match s {
        "ready" => MatchHistoryStatus::Ready,
        "in_progress" => MatchHistoryStatus::InProgress,
        "completed" => MatchHistoryStatus::Completed,
        "cancelled" => MatchHistoryStatus::Cancelled,
        _ => MatchHistoryStatus::Forming,
    }
}

fn lobby_status_to_str(status: LobbyStatus) -> &'static str {
    match status {
        LobbyStatus::Forming => "forming",
        LobbyStatus::Ready => "ready",
        LobbyStatus::Active => "active",
        LobbyStatus::Closed => "closed",
    }
}

fn lobby_status_from_str(s: &str) -> LobbyStatus {
    match s {
        "ready" => LobbyStatus::Ready,
        "active" => LobbyStatus::Active,
        "closed" => LobbyStatus::Closed,
        _ => LobbyStatus::Forming,
    }
}

pub struct PostgresUserStore {
    pool: PgPool,
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, CoreError> {
        let row = sqlx::query("SELECT id, username, status, game_profiles, last_active FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        let Some(row) = row else { return Ok(None) };
        let game_profiles_json: serde_json::Value = row.try_get("game_profiles").map_err(db_err)?;
        Ok(Some(User {
            id: row.try_get("id").map_err(db_err)?,
            username: row.try_get("username").map_err(db_err)?,
            status: user_status_from_str(row.try_get::<String, _>("status").map_err(db_err)?.as_str()),
            game_profiles: serde_json::from_value(game_profiles_json).unwrap_or_default(),
            last_active: row.try_get::<i64, _>("last_active").map_err(db_err)? as u64,
        }))
    }

    async fn touch_last_active(&self, user_id: Uuid, at: u64) -> Result<(), CoreError> {
        sqlx::query("UPDATE users SET last_active = $1 WHERE id = $2")
            .bind(at as i64)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<MatchRequest, CoreError> {
        let criteria_json: serde_json::Value = row.try_get("criteria").map_err(db_err)?;
        let preselected_json: serde_json::Value = row.try_get("preselected_users").map_err(db_err)?;
        Ok(MatchRequest {
            id: row.try_get("id").map_err(db_err)?,
            user_id: row.try_get("user_id").map_err(db_err)?,
            status: request_status_from_str(row.try_get::<String, _>("status").map_err(db_err)?.as_str()),
            criteria: serde_json::from_value(criteria_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            preselected_users: serde_json::from_value(preselected_json).unwrap_or_default(),
            search_start_time: row.try_get::<i64, _>("search_start_time").map_err(db_err)? as u64,
            relaxation_level: row.try_get::<i16, _>("relaxation_level").map_err(db_err)? as u8,
            relaxation_timestamp: row.try_get::<i64, _>("relaxation_timestamp").map_err(db_err)? as u64,
            matched_lobby_id: row.try_get("matched_lobby_id").map_err(db_err)?,
            match_expire_time: row
                .try_get::<Option<i64>, _>("match_expire_time")
                .map_err(db_err)?
                .map(|v| v as u64),
        })
    }
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    async fn insert(&self, request: MatchRequest) -> Result<(), CoreError> {
        let criteria_json = serde_json::to_value(&request.criteria).map_err(|e| CoreError::Internal(e.to_string()))?;
        let preselected_json =
            serde_json::to_value(&request.preselected_users).map_err(|e| CoreError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO match_requests
                (id, user_id, status, criteria, preselected_users, search_start_time,
                 relaxation_level, relaxation_timestamp, matched_lobby_id, match_expire_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(request.user_id)
        .bind(request_status_to_str(request.status))
        .bind(criteria_json)
        .bind(preselected_json)
        .bind(request.search_start_time as i64)
        .bind(request.relaxation_level as i16)
        .bind(request.relaxation_timestamp as i64)
        .bind(request.matched_lobby_id)
        .bind(request.match_expire_time.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchRequest>, CoreError> {
        let row = sqlx::query("SELECT * FROM match_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<MatchRequest>, CoreError> {
        let row = sqlx::query("SELECT * FROM match_requests WHERE user_id = $1 AND status = 'searching' LIMIT 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, request: MatchRequest) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE match_requests SET
                status = $2, relaxation_level = $3, relaxation_timestamp = $4,
                matched_lobby_id = $5, match_expire_time = $6
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(request_status_to_str(request.status))
        .bind(request.relaxation_level as i16)
        .bind(request.relaxation_timestamp as i64)
        .bind(request.matched_lobby_id)
        .bind(request.match_expire_time.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_status_if(
        &self,
        id: Uuid,
        expected: MatchRequestStatus,
        new_status: MatchRequestStatus,
        matched_lobby_id: Option<Uuid>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE match_requests SET status = $1, matched_lobby_id = $2 WHERE id = $3 AND status = $4",
        )
        .bind(request_status_to_str(new_status))
        .bind(matched_lobby_id)
        .bind(id)
        .bind(request_status_to_str(expected))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_searching_older_than(
        &self,
        age_ms: u64,
        now: u64,
        limit: usize,
    ) -> Result<Vec<MatchRequest>, CoreError> {
        let cutoff = (now as i64) - (age_ms as i64);
        let rows = sqlx::query(
            "SELECT * FROM match_requests WHERE status = 'searching' AND search_start_time < $1 \
             ORDER BY search_start_time ASC LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::from_row).collect()
    }
}

pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<MatchHistory, CoreError> {
        let participants_json: serde_json::Value = row.try_get("participants").map_err(db_err)?;
        let quality_json: serde_json::Value = row.try_get("match_quality").map_err(db_err)?;
        let metrics_json: serde_json::Value = row.try_get("matching_metrics").map_err(db_err)?;
        Ok(MatchHistory {
            id: row.try_get("id").map_err(db_err)?,
            game_id: row.try_get("game_id").map_err(db_err)?,
            game_mode: game_mode_from_str(row.try_get::<String, _>("game_mode").map_err(db_err)?.as_str()),
            region: row.try_get("region").map_err(db_err)?,
            participants: serde_json::from_value(participants_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            match_quality: serde_json::from_value(quality_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            matching_metrics: serde_json::from_value(metrics_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            lobby_id: row.try_get("lobby_id").map_err(db_err)?,
            status: history_status_from_str(row.try_get::<String, _>("status").map_err(db_err)?.as_str()),
            formed_at: row.try_get::<i64, _>("formed_at").map_err(db_err)? as u64,
            started_at: row.try_get::<Option<i64>, _>("started_at").map_err(db_err)?.map(|v| v as u64),
            completed_at: row.try_get::<Option<i64>, _>("completed_at").map_err(db_err)?.map(|v| v as u64),
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn insert(&self, history: MatchHistory) -> Result<(), CoreError> {
        insert_history(&self.pool, &history).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<MatchHistory>, CoreError> {
        let row = sqlx::query("SELECT * FROM match_history WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid, offset: usize, limit: usize) -> Result<Vec<MatchHistory>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM match_history WHERE participants @> $1 ORDER BY formed_at DESC OFFSET $2 LIMIT $3",
        )
        .bind(serde_json::json!([{ "user_id": user_id }]))
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::from_row).collect()
    }
}

async fn insert_history<'e, E>(executor: E, history: &MatchHistory) -> Result<(), CoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let participants_json = serde_json::to_value(&history.participants).map_err(|e| CoreError::Internal(e.to_string()))?;
    let quality_json = serde_json::to_value(history.match_quality).map_err(|e| CoreError::Internal(e.to_string()))?;
    let metrics_json = serde_json::to_value(&history.matching_metrics).map_err(|e| CoreError::Internal(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO match_history
            (id, game_id, game_mode, region, participants, match_quality, matching_metrics,
             lobby_id, status, formed_at, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(history.id)
    .bind(history.game_id)
    .bind(game_mode_to_str(history.game_mode))
    .bind(&history.region)
    .bind(participants_json)
    .bind(quality_json)
    .bind(metrics_json)
    .bind(history.lobby_id)
    .bind(history_status_to_str(history.status))
    .bind(history.formed_at as i64)
    .bind(history.started_at.map(|v| v as i64))
    .bind(history.completed_at.map(|v| v as i64))
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

pub struct PostgresLobbyStore {
    pool: PgPool,
}

impl PostgresLobbyStore {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Lobby, CoreError> {
        let capacity_json: serde_json::Value = row.try_get("capacity").map_err(db_err)?;
        let members_json: serde_json::Value = row.try_get("members").map_err(db_err)?;
        let settings_json: serde_json::Value = row.try_get("settings").map_err(db_err)?;
        Ok(Lobby {
            id: row.try_get("id").map_err(db_err)?,
            name: row.try_get("name").map_err(db_err)?,
            game_id: row.try_get("game_id").map_err(db_err)?,
            game_mode: game_mode_from_str(row.try_get::<String, _>("game_mode").map_err(db_err)?.as_str()),
            region: row.try_get("region").map_err(db_err)?,
            match_history_id: row.try_get("match_history_id").map_err(db_err)?,
            host_id: row.try_get("host_id").map_err(db_err)?,
            capacity: serde_json::from_value(capacity_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            members: serde_json::from_value(members_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            status: lobby_status_from_str(row.try_get::<String, _>("status").map_err(db_err)?.as_str()),
            chat_id: row.try_get("chat_id").map_err(db_err)?,
            settings: serde_json::from_value(settings_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            created_at: row.try_get::<i64, _>("created_at").map_err(db_err)? as u64,
            updated_at: row.try_get::<i64, _>("updated_at").map_err(db_err)? as u64,
            closed_at: row.try_get::<Option<i64>, _>("closed_at").map_err(db_err)?.map(|v| v as u64),
        })
    }
}

async fn insert_lobby<'e, E>(executor: E, lobby: &Lobby) -> Result<(), CoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let capacity_json = serde_json::to_value(lobby.capacity).map_err(|e| CoreError::Internal(e.to_string()))?;
    let members_json = serde_json::to_value(&lobby.members).map_err(|e| CoreError::Internal(e.to_string()))?;
    let settings_json = serde_json::to_value(lobby.settings).map_err(|e| CoreError::Internal(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO lobbies
            (id, name, game_id, game_mode, region, match_history_id, host_id, capacity,
             members, status, chat_id, settings, created_at, updated_at, closed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        "#,
    )
    .bind(lobby.id)
    .bind(&lobby.name)
    .bind(lobby.game_id)
    .bind(game_mode_to_str(lobby.game_mode))
    .bind(&lobby.region)
    .bind(lobby.match_history_id)
    .bind(lobby.host_id)
    .bind(capacity_json)
    .bind(members_json)
    .bind(lobby_status_to_str(lobby.status))
    .bind(lobby.chat_id)
    .bind(settings_json)
    .bind(lobby.created_at as i64)
    .bind(lobby.updated_at as i64)
    .bind(lobby.closed_at.map(|v| v as i64))
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl LobbyStore for PostgresLobbyStore {
    async fn insert(&self, lobby: Lobby) -> Result<(), CoreError> {
        insert_lobby(&self.pool, &lobby).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Lobby>, CoreError> {
        let row = sqlx::query("SELECT * FROM lobbies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, lobby: Lobby) -> Result<(), CoreError> {
        let members_json = serde_json::to_value(&lobby.members).map_err(|e| CoreError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            UPDATE lobbies SET
                host_id = $2, members = $3, status = $4, updated_at = $5, closed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(lobby.id)
        .bind(lobby.host_id)
        .bind(members_json)
        .bind(lobby_status_to_str(lobby.status))
        .bind(lobby.updated_at as i64)
        .bind(lobby.closed_at.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_active_for_user(&self, user_id: Uuid) -> Result<Option<Lobby>, CoreError> {
        let row = sqlx::query(
            "SELECT * FROM lobbies WHERE status != 'closed' AND members @> $1 LIMIT 1",
        )
        .bind(serde_json::json!([{ "user_id": user_id }]))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid, include_history: bool) -> Result<Vec<Lobby>, CoreError> {
        let query = if include_history {
            "SELECT * FROM lobbies WHERE members @> $1 ORDER BY updated_at DESC"
        } else {
            "SELECT * FROM lobbies WHERE members @> $1 AND status != 'closed' ORDER BY updated_at DESC"
        };
        let rows = sqlx::query(query)
            .bind(serde_json::json!([{ "user_id": user_id }]))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::from_row).collect()
    }
}

pub struct PostgresChatStore {
    pool: PgPool,
}

impl PostgresChatStore {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Chat, CoreError> {
        let participants_json: serde_json::Value = row.try_get("participants").map_err(db_err)?;
        let messages_json: serde_json::Value = row.try_get("messages").map_err(db_err)?;
        let chat_type_str: String = row.try_get("chat_type").map_err(db_err)?;
        Ok(Chat {
            id: row.try_get("id").map_err(db_err)?,
            chat_type: match chat_type_str.as_str() {
                "direct" => crate::domain::chat::ChatType::Direct,
                "group" => crate::domain::chat::ChatType::Group,
                _ => crate::domain::chat::ChatType::Lobby,
            },
            participants: serde_json::from_value(participants_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            lobby_id: row.try_get("lobby_id").map_err(db_err)?,
            messages: serde_json::from_value(messages_json).map_err(|e| CoreError::Internal(e.to_string()))?,
            last_message_at: row.try_get::<Option<i64>, _>("last_message_at").map_err(db_err)?.map(|v| v as u64),
        })
    }
}

fn chat_type_to_str(chat_type: crate::domain::chat::ChatType) -> &'static str {
    match chat_type {
        crate::domain::chat::ChatType::Lobby => "lobby",
        crate::domain::chat::ChatType::Direct => "direct",
        crate::domain::chat::ChatType::Group => "group",
    }
}

async fn insert_chat<'e, E>(executor: E, chat: &Chat) -> Result<(), CoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let participants_json = serde_json::to_value(&chat.participants).map_err(|e| CoreError::Internal(e.to_string()))?;
    let messages_json = serde_json::to_value(&chat.messages).map_err(|e| CoreError::Internal(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO chats (id, chat_type, participants, lobby_id, messages, last_message_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(chat.id)
    .bind(chat_type_to_str(chat.chat_type))
    .bind(participants_json)
    .bind(chat.lobby_id)
    .bind(messages_json)
    .bind(chat.last_message_at.map(|v| v as i64))
    .execute(executor)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl ChatStore for PostgresChatStore {
    async fn insert(&self, chat: Chat) -> Result<(), CoreError> {
        insert_chat(&self.pool, &chat).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Chat>, CoreError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn get_for_lobby(&self, lobby_id: Uuid) -> Result<Option<Chat>, CoreError> {
        let row = sqlx::query("SELECT * FROM chats WHERE lobby_id = $1")
            .bind(lobby_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn update(&self, chat: Chat) -> Result<(), CoreError> {
        let messages_json = serde_json::to_value(&chat.messages).map_err(|e| CoreError::Internal(e.to_string()))?;
        sqlx::query("UPDATE chats SET participants = $2, messages = $3, last_message_at = $4 WHERE id = $1")
            .bind(chat.id)
            .bind(serde_json::to_value(&chat.participants).map_err(|e| CoreError::Internal(e.to_string()))?)
            .bind(messages_json)
            .bind(chat.last_message_at.map(|v| v as i64))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

pub struct PostgresPersistence {
    pool: PgPool,
    users: PostgresUserStore,
    requests: PostgresRequestStore,
    history: PostgresHistoryStore,
    lobbies: Arc<PostgresLobbyStore>,
    chats: Arc<PostgresChatStore>,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: PostgresUserStore { pool: pool.clone() },
            requests: PostgresRequestStore { pool: pool.clone() },
            history: PostgresHistoryStore { pool: pool.clone() },
            lobbies: Arc::new(PostgresLobbyStore { pool: pool.clone() }),
            chats: Arc::new(PostgresChatStore { pool: pool.clone() }),
            pool,
        }
    }

    pub fn lobbies_arc(&self) -> Arc<dyn LobbyStore> {
        self.lobbies.clone()
    }

    pub fn chats_arc(&self) -> Arc<dyn ChatStore> {
        self.chats.clone()
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    fn supports_transactions(&self) -> bool {
        true
    }

    fn users(&self) -> &dyn UserStore {
        &self.users
    }

    fn requests(&self) -> &dyn RequestStore {
        &self.requests
    }

    fn history(&self) -> &dyn HistoryStore {
        &self.history
    }

    fn lobbies(&self) -> &dyn LobbyStore {
        &self.lobbies
    }

    fn chats(&self) -> &dyn ChatStore {
        &self.chats
    }

    async fn finalize_match(&self, input: FinalizeInput) -> Result<FinalizeOutcome, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let existing_lobby_id: Option<Uuid> =
            sqlx::query("SELECT lobby_id FROM match_history WHERE id = $1 FOR UPDATE")
                .bind(input.history.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .and_then(|row| row.try_get("lobby_id").ok());

        if let Some(lobby_id) = existing_lobby_id {
            tx.commit().await.map_err(db_err)?;
            return Ok(FinalizeOutcome::AlreadyFinalized { lobby_id });
        }

        let lobby_id = input.lobby.id;
        let mut history = input.history;
        history.lobby_id = Some(lobby_id);

        insert_history(&mut *tx, &history).await?;
        insert_lobby(&mut *tx, &input.lobby).await?;
        insert_chat(&mut *tx, &input.chat).await?;

        for request_id in input.participant_requests {
            sqlx::query(
                "UPDATE match_requests SET status = 'matched', matched_lobby_id = $1 \
                 WHERE id = $2 AND status = 'searching'",
            )
            .bind(lobby_id)
            .bind(request_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(FinalizeOutcome::Created { lobby_id })
    }
}
