use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use parley_db::{Database, format_timestamp, parse_timestamp};

use crate::ApiError;
use crate::blocking;

pub const SESSION_COOKIE: &str = "session_token";

/// How long an issued session stays valid. Sessions are never renewed.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Opaque, database-backed login sessions.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve a token to its nickname. Expired sessions are deleted on sight.
    pub async fn validate(&self, token: Option<&str>) -> Result<String, ApiError> {
        let token = match token {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(ApiError::Auth),
        };

        let lookup = token.clone();
        let Some(row) = blocking(&self.db, move |db| db.get_session(&lookup)).await? else {
            return Err(ApiError::Auth);
        };

        let live = parse_timestamp(&row.expires_at).is_some_and(|exp| exp > Utc::now());
        if !live {
            debug!("Session of {} expired, removing", row.nickname);
            blocking(&self.db, move |db| db.delete_session(&token)).await?;
            return Err(ApiError::Auth);
        }

        Ok(row.nickname)
    }

    /// Create a fresh session for `nickname` and return its token.
    pub async fn issue(&self, nickname: &str) -> Result<String, ApiError> {
        let token = Uuid::new_v4().to_string();
        let expires_at = format_timestamp(Utc::now() + Duration::hours(SESSION_TTL_HOURS));

        let (t, n) = (token.clone(), nickname.to_string());
        blocking(&self.db, move |db| db.insert_session(&t, &n, &expires_at)).await?;

        info!("Issued session for {}", nickname);
        Ok(token)
    }

    /// Delete a session. Returns whether it existed.
    pub async fn revoke(&self, token: &str) -> Result<bool, ApiError> {
        let t = token.to_string();
        let removed = blocking(&self.db, move |db| db.delete_session(&t)).await?;
        Ok(removed > 0)
    }

    pub async fn purge_expired(&self) -> Result<usize, ApiError> {
        let now = format_timestamp(Utc::now());
        blocking(&self.db, move |db| db.delete_sessions_expired_at(&now)).await
    }

    pub fn cookie(token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::hours(SESSION_TTL_HOURS))
            .build()
    }

    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, "")).path("/").build()
    }

    pub fn token_from(jar: &CookieJar) -> Option<String> {
        jar.get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }
}
