//! Rows as stored. Wire types live in `parley-types`.

pub struct UserRow {
    pub id: i64,
    pub nickname: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    pub gender: String,
    pub created_at: String,
}

/// Insert form of a user. `password_hash` is the encoded argon2 hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct NewUser<'a> {
    pub nickname: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub age: i64,
    pub gender: &'a str,
}

pub struct SessionRow {
    pub session_id: String,
    pub nickname: String,
    pub expires_at: String,
}

/// `content` is stored HTML-escaped.
pub struct MessageRow {
    pub id: i64,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub timestamp: String,
}

/// Latest message a viewer exchanged with one peer, plus the viewer's
/// unread count for that peer.
pub struct ConversationRow {
    pub peer: String,
    pub last_content: String,
    pub last_timestamp: String,
    pub unread: i64,
}
