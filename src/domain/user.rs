// User and game-profile types. Users are an external collaborator; core
// treats them as read-only besides the `last_active` fire-and-forget hook.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Banned,
    Deleted,
}

impl UserStatus {
    pub fn is_active(self) -> bool {
        matches!(self, UserStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameProfile {
    pub game_id: Uuid,
    // 0..=100
    pub skill_level: u8,
    pub rank: Option<String>,
    pub in_game_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub status: UserStatus,
    pub game_profiles: Vec<GameProfile>,
    pub last_active: u64,
}

impl User {
    pub fn profile_for(&self, game_id: Uuid) -> Option<&GameProfile> {
        self.game_profiles.iter().find(|p| p.game_id == game_id)
    }
}
