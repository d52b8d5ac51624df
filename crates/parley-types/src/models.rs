use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A direct message between two users, as delivered live and returned by
/// history queries. `content` is always the unescaped text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }
}

/// One peer in a viewer's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub nickname: String,
    pub status: PresenceStatus,
    /// Unescaped preview of the latest message exchanged with this peer
    pub last_message: String,
    pub last_interaction: DateTime<Utc>,
    /// Messages from this peer the viewer has not marked read
    pub unread: u64,
}
