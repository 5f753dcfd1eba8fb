// MatchHistory: the authoritative record of a formed group.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::GameMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Left,
    Kicked,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub request_id: Uuid,
    pub joined_at: u64,
    pub left_at: Option<u64>,
    pub status: ParticipantStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchQuality {
    pub skill_balance: f64,
    pub region_compatibility: f64,
    pub language_compatibility: f64,
    pub overall_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchingMetrics {
    pub total_search_time_ms: u64,
    pub max_search_time_ms: u64,
    pub min_search_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHistoryMetrics {
    pub timing: MatchingMetrics,
    pub relaxation_levels_used: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchHistoryStatus {
    Forming,
    Ready,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHistory {
    pub id: Uuid,
    pub game_id: Uuid,
    pub game_mode: GameMode,
    pub region: String,
    pub participants: Vec<Participant>,
    pub match_quality: MatchQuality,
    pub matching_metrics: MatchHistoryMetrics,
    pub lobby_id: Option<Uuid>,
    pub status: MatchHistoryStatus,
    pub formed_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
}
