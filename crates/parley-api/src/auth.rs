use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use rand_core::OsRng;
use tracing::{info, warn};

use parley_db::models::NewUser;
use parley_types::api::{LoginRequest, RegisterRequest, StatusResponse, UsernameResponse};

use crate::{ApiError, AppState, SessionStore, blocking};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_nickname(&req.nickname)?;
    validate_email(&req.email)?;
    validate_password(&req.password)?;
    validate_age(req.age)?;
    validate_name("First name", &req.first_name)?;
    validate_name("Last name", &req.last_name)?;
    validate_gender(&req.gender)?;

    let (nickname, email) = (req.nickname.clone(), req.email.clone());
    if blocking(&state.db, move |db| db.nickname_or_email_taken(&nickname, &email)).await? {
        return Err(ApiError::Conflict("Nickname or email already in use".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let RegisterRequest {
        nickname,
        first_name,
        last_name,
        email,
        age,
        gender,
        ..
    } = req;
    let username = nickname.clone();
    blocking(&state.db, move |db| {
        db.create_user(&NewUser {
            nickname: &nickname,
            email: &email,
            password_hash: &password_hash,
            first_name: first_name.trim(),
            last_name: last_name.trim(),
            age,
            gender: &gender,
        })
    })
    .await?;

    info!("Registered {}", username);
    Ok((StatusCode::CREATED, Json(UsernameResponse { username })))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = req.identifier.clone();
    let user = blocking(&state.db, move |db| db.get_user_by_login(&identifier))
        .await?
        .ok_or(ApiError::Auth)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", user.nickname, e))?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        warn!("Failed login for {}", user.nickname);
        return Err(ApiError::Auth);
    }

    let token = state.sessions.issue(&user.nickname).await?;
    state.gateway.presence.refresh_all().await;

    Ok((
        jar.add(SessionStore::cookie(token)),
        Json(UsernameResponse {
            username: user.nickname,
        }),
    ))
}

/// Revoke the caller's session and close the sockets opened with it.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let token = SessionStore::token_from(&jar)
        .ok_or_else(|| ApiError::Validation("No active session".into()))?;

    let lookup = token.clone();
    let session = blocking(&state.db, move |db| db.get_session(&lookup)).await?;

    // Revoke first so no new socket can be opened with the token.
    state.sessions.revoke(&token).await?;
    if let Some(session) = session {
        state
            .gateway
            .terminate_session(&session.nickname, &token)
            .await;
        info!("{} logged out", session.nickname);
    }
    state.gateway.presence.schedule_refresh_all().await;

    Ok((
        jar.remove(SessionStore::removal_cookie()),
        Json(StatusResponse::success()),
    ))
}

pub async fn logged(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<UsernameResponse>, ApiError> {
    let token = SessionStore::token_from(&jar);
    let username = state.sessions.validate(token.as_deref()).await?;
    Ok(Json(UsernameResponse { username }))
}

fn validate_nickname(nickname: &str) -> Result<(), ApiError> {
    let len = nickname.chars().count();
    if !(3..=20).contains(&len) {
        return Err(ApiError::Validation("Nickname must be 3-20 characters".into()));
    }
    if !nickname.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ApiError::Validation(
            "Nickname may only contain letters, digits and underscores".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let invalid = || ApiError::Validation("Invalid email address".into());

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let (host, tld) = domain.rsplit_once('.').ok_or_else(invalid)?;
    if host.is_empty() || tld.is_empty() {
        return Err(invalid());
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    let strong = password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit());
    if !strong {
        return Err(ApiError::Validation(
            "Password needs 8+ characters with upper, lower case and a digit".into(),
        ));
    }
    Ok(())
}

fn validate_age(age: i64) -> Result<(), ApiError> {
    if !(13..=120).contains(&age) {
        return Err(ApiError::Validation("Age must be between 13 and 120".into()));
    }
    Ok(())
}

fn validate_name(field: &str, value: &str) -> Result<(), ApiError> {
    let len = value.trim().chars().count();
    if !(1..=50).contains(&len) {
        return Err(ApiError::Validation(format!("{} must be 1-50 characters", field)));
    }
    Ok(())
}

fn validate_gender(gender: &str) -> Result<(), ApiError> {
    match gender {
        "male" | "female" => Ok(()),
        _ => Err(ApiError::Validation("Invalid gender".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_rules() {
        assert!(validate_nickname("bob").is_ok());
        assert!(validate_nickname("Alice_99").is_ok());
        assert!(validate_nickname("ab").is_err());
        assert!(validate_nickname(&"a".repeat(21)).is_err());
        assert!(validate_nickname("bad name").is_err());
        assert!(validate_nickname("émile").is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("a@b.io").is_ok());
        assert!(validate_email("first.last@mail.example.com").is_ok());
        assert!(validate_email("nodomain").is_err());
        assert!(validate_email("@b.io").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@.io").is_err());
        assert!(validate_email("a@b.").is_err());
        assert!(validate_email("a@b@c.io").is_err());
        assert!(validate_email("a b@c.io").is_err());
    }

    #[test]
    fn password_rules() {
        assert!(validate_password("Secret123").is_ok());
        assert!(validate_password("Sh0rt").is_err());
        assert!(validate_password("alllower123").is_err());
        assert!(validate_password("ALLUPPER123").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
    }

    #[test]
    fn profile_rules() {
        assert!(validate_age(13).is_ok());
        assert!(validate_age(120).is_ok());
        assert!(validate_age(12).is_err());
        assert!(validate_age(121).is_err());

        assert!(validate_name("First name", "Al").is_ok());
        assert!(validate_name("First name", "   ").is_err());
        assert!(validate_name("Last name", &"x".repeat(51)).is_err());

        assert!(validate_gender("male").is_ok());
        assert!(validate_gender("female").is_ok());
        assert!(validate_gender("Male").is_err());
        assert!(validate_gender("").is_err());
    }
}
