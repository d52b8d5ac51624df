use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ConversationEntry};

/// Frames pushed from the server to a live connection.
///
/// The variants carry disjoint shapes so the wire format stays flat:
/// chat messages have no discriminator, notices are tagged by `type`,
/// and session control frames by `event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// A direct message, mirrored to every session of both parties
    Chat(ChatMessage),

    Notice(Notice),

    Session(SessionEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// The viewer's conversation list, most recent peer first
    UserList { users: Vec<ConversationEntry> },

    /// A message the client sent was rejected or could not be stored
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session behind this connection was logged out; the server closes
    /// the socket right after this frame.
    Logout { message: String },
}

impl SessionEvent {
    pub fn terminated() -> Self {
        Self::Logout {
            message: "Session terminated".to_string(),
        }
    }
}

/// A chat payload sent FROM client TO server.
///
/// `from` is accepted for compatibility with older clients but never trusted:
/// the sender is always the identity of the authenticated session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCommand {
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    pub content: String,
}
