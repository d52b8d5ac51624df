use std::collections::BTreeMap;

use axum::{Extension, Json, extract::State};

use parley_types::api::{MarkReadRequest, StatusResponse};

use crate::middleware::CurrentUser;
use crate::{ApiError, AppState};

/// Unread counts of the caller, keyed by sender. Zero counts are omitted.
pub async fn unread(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<BTreeMap<String, u64>>, ApiError> {
    let counts = state.gateway.notifications.unread_for(&user.nickname).await?;
    Ok(Json(counts))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    if req.sender.trim().is_empty() {
        return Err(ApiError::Validation("Sender is required".into()));
    }

    state
        .gateway
        .notifications
        .reset(&user.nickname, &req.sender)
        .await?;
    state.gateway.presence.refresh(&user.nickname).await;

    Ok(Json(StatusResponse::success()))
}
