pub mod config;
pub mod sweep;

use std::path::Path;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use parley_api::middleware::require_session;
use parley_api::{ApiError, AppState, SessionStore, auth, messages, notifications};
use parley_gateway::connection;

pub use config::Config;

/// Assemble every route. Unmatched paths fall through to `static_dir` when set.
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/logged", post(auth::logged))
        .route("/ws", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/messages", get(messages::history).post(messages::history))
        .route("/messages/send", post(messages::send))
        .route(
            "/notification",
            get(notifications::unread).post(notifications::mark_read),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    let mut app = Router::new().merge(public_routes).merge(protected_routes);
    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The session is checked before the upgrade headers, so a request without a
/// valid cookie is always answered 401 and never gets a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = SessionStore::token_from(&jar).ok_or(ApiError::Auth)?;
    let nickname = state.sessions.validate(Some(&token)).await?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, gateway, nickname, token)
    }))
}
