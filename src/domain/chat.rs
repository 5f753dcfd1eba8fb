// Chat: bounded message log attached to a lobby (or direct/group).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_MESSAGE_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Lobby,
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Emoji,
    System,
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    // `None` for system messages.
    pub sender_id: Option<Uuid>,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: u64,
    pub edited_at: Option<u64>,
    pub deleted_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub chat_type: ChatType,
    pub participants: Vec<Uuid>,
    pub lobby_id: Option<Uuid>,
    pub messages: Vec<ChatMessage>,
    pub last_message_at: Option<u64>,
}

impl Chat {
    pub fn ensure_participant(&mut self, user_id: Uuid) {
        if !self.participants.contains(&user_id) {
            self.participants.push(user_id);
        }
    }
}
