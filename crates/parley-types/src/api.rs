use serde::{Deserialize, Serialize};

// -- Accounts --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub nickname: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub age: i64,
    /// `male` or `female`
    pub gender: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Nickname or email
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsernameResponse {
    pub username: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub content: String,
}

// -- Notifications --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub sender: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
        }
    }
}
