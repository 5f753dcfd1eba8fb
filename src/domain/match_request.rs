// MatchRequest: the atom of matchmaking.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::SearchCriteria;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRequestStatus {
    Searching,
    Cancelled,
    Matched,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: MatchRequestStatus,
    pub criteria: SearchCriteria,
    pub preselected_users: Vec<Uuid>,
    pub search_start_time: u64,
    pub relaxation_level: u8,
    pub relaxation_timestamp: u64,
    pub matched_lobby_id: Option<Uuid>,
    pub match_expire_time: Option<u64>,
}

// Default TTL: 10 minutes, in milliseconds.
pub const DEFAULT_REQUEST_TTL_MS: u64 = 10 * 60 * 1000;
// Maximum relaxation level.
pub const MAX_RELAXATION_LEVEL: u8 = 10;
// Step size for relaxation, in milliseconds.
pub const RELAXATION_STEP_MS: u64 = 30_000;

impl MatchRequest {
    pub fn new(
        id: Uuid,
        user_id: Uuid,
        criteria: SearchCriteria,
        preselected_users: Vec<Uuid>,
        now: u64,
    ) -> Self {
        Self {
            id,
            user_id,
            status: MatchRequestStatus::Searching,
            criteria,
            preselected_users,
            search_start_time: now,
            relaxation_level: 0,
            relaxation_timestamp: now,
            matched_lobby_id: None,
            match_expire_time: None,
        }
    }

    // Derived: now - searchStartTime while searching, else 0.
    pub fn search_duration(&self, now: u64) -> u64 {
        if self.status == MatchRequestStatus::Searching {
            now.saturating_sub(self.search_start_time)
        } else {
            0
        }
    }

    pub fn expire_at(&self) -> u64 {
        self.match_expire_time
            .unwrap_or(self.search_start_time + DEFAULT_REQUEST_TTL_MS)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.status == MatchRequestStatus::Searching && now >= self.expire_at()
    }

    // New relaxation level given elapsed wait time, clamped to the max.
    pub fn relaxation_for_duration(duration_ms: u64) -> u8 {
        let level = duration_ms / RELAXATION_STEP_MS;
        level.min(MAX_RELAXATION_LEVEL as u64) as u8
    }
}
