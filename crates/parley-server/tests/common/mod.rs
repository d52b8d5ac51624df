#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use parley_api::{AppState, AppStateInner};
use parley_db::Database;
use parley_db::models::NewUser;
use parley_gateway::{Gateway, GatewayConfig};

pub fn app() -> (Router, AppState) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let gateway = Gateway::new(
        db.clone(),
        GatewayConfig {
            outbound_queue: 32,
            presence_debounce: Duration::from_millis(20),
        },
    );
    let state = AppStateInner::new(db, gateway);
    (parley_server::router(state.clone(), None), state)
}

/// Create accounts directly, skipping password hashing.
pub fn seed_users(state: &AppState, names: &[&str]) {
    for name in names {
        let email = format!("{}@example.com", name);
        state
            .db
            .create_user(&NewUser {
                nickname: name,
                email: &email,
                password_hash: "unused",
                ..Default::default()
            })
            .unwrap();
    }
}

pub async fn login_as(state: &AppState, nickname: &str) -> String {
    state.sessions.issue(nickname).await.unwrap()
}

pub async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    session: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = session {
        req = req.header(header::COOKIE, format!("session_token={}", token));
    }
    let req = match body {
        Some(json) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, json)
}

/// Value of the `session_token` cookie set by a response, if any.
pub fn session_cookie(headers: &HeaderMap) -> Option<(String, String)> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("session_token="))
        .map(|v| {
            let pair = v.split(';').next().unwrap_or_default();
            let value = pair.trim_start_matches("session_token=").to_string();
            (value, v.to_string())
        })
}
