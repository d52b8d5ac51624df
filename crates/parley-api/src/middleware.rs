use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::{ApiError, AppState, SessionStore};

/// The authenticated caller, inserted by `require_session`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub nickname: String,
    pub session_token: String,
}

/// Resolve the session cookie or answer 401.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = SessionStore::token_from(&jar).ok_or(ApiError::Auth)?;
    let nickname = state.sessions.validate(Some(&token)).await?;

    req.extensions_mut().insert(CurrentUser {
        nickname,
        session_token: token,
    });
    Ok(next.run(req).await)
}
