use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;

use parley_db::models::MessageRow;
use parley_db::parse_timestamp;
use parley_gateway::content::unsanitize;
use parley_types::api::{HistoryQuery, SendMessageRequest};
use parley_types::models::ChatMessage;

use crate::middleware::CurrentUser;
use crate::{ApiError, AppState, blocking};

/// Messages per history page.
pub const HISTORY_PAGE: u32 = 10;

/// One page of a conversation: the `HISTORY_PAGE` most recent messages after
/// skipping `offset`, returned oldest first.
pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    if query.from.trim().is_empty() || query.to.trim().is_empty() {
        return Err(ApiError::Validation("Missing parameters".into()));
    }
    if query.from != user.nickname {
        return Err(ApiError::Validation(
            "History can only be read for your own conversations".into(),
        ));
    }

    let HistoryQuery { from, to, offset } = query;
    let mut rows =
        blocking(&state.db, move |db| db.get_history(&from, &to, HISTORY_PAGE, offset)).await?;
    rows.reverse();

    Ok(Json(rows.into_iter().map(to_chat_message).collect()))
}

/// Send over HTTP. Delivered like a socket message, to every live
/// connection of both parties.
pub async fn send(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .gateway
        .relay
        .send(None, &user.nickname, &req.to, &req.content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

fn to_chat_message(row: MessageRow) -> ChatMessage {
    let timestamp = parse_timestamp(&row.timestamp).unwrap_or_else(|| {
        warn!("Message {} has unreadable timestamp '{}'", row.id, row.timestamp);
        Default::default()
    });
    ChatMessage {
        content: unsanitize(&row.content).into_owned(),
        from: row.sender,
        to: row.receiver,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_unescaped() {
        let row = MessageRow {
            id: 1,
            sender: "alice".into(),
            receiver: "bob".into(),
            content: "&lt;b&gt;hi&lt;/b&gt;".into(),
            timestamp: "2024-03-01T12:00:00.000Z".into(),
        };
        let msg = to_chat_message(row);
        assert_eq!(msg.content, "<b>hi</b>");
        assert_eq!(msg.from, "alice");
        assert_eq!(msg.to, "bob");
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }
}
