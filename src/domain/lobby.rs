// Lobby: live coordination container formed from a matched group.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::criteria::GameMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Joined,
    Ready,
    Left,
    Kicked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyMember {
    pub user_id: Uuid,
    pub status: MemberStatus,
    pub ready_status: bool,
    pub is_host: bool,
    pub joined_at: u64,
    pub left_at: Option<u64>,
}

impl LobbyMember {
    pub fn is_active(&self) -> bool {
        matches!(self.status, MemberStatus::Joined | MemberStatus::Ready)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Forming,
    Ready,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capacity {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LobbySettings {
    pub is_private: bool,
    pub auto_start: bool,
    pub auto_close: bool,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            is_private: false,
            auto_start: true,
            auto_close: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub id: Uuid,
    pub name: String,
    pub game_id: Uuid,
    pub game_mode: GameMode,
    pub region: String,
    pub match_history_id: Uuid,
    pub host_id: Uuid,
    pub capacity: Capacity,
    pub members: Vec<LobbyMember>,
    pub status: LobbyStatus,
    pub chat_id: Uuid,
    pub settings: LobbySettings,
    pub created_at: u64,
    pub updated_at: u64,
    pub closed_at: Option<u64>,
}

impl Lobby {
    pub fn member_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_active()).count()
    }

    pub fn ready_count(&self) -> usize {
        self.members.iter().filter(|m| m.ready_status).count()
    }

    pub fn host(&self) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.is_host && m.is_active())
    }

    pub fn member(&self, user_id: Uuid) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn member_mut(&mut self, user_id: Uuid) -> Option<&mut LobbyMember> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members
            .iter()
            .any(|m| m.user_id == user_id && m.is_active())
    }

    pub fn all_active_ready(&self) -> bool {
        let active: Vec<&LobbyMember> = self.members.iter().filter(|m| m.is_active()).collect();
        !active.is_empty() && active.iter().all(|m| m.ready_status)
    }
}
