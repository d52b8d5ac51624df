pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod sessions;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::Gateway;

pub use error::ApiError;
pub use sessions::SessionStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub gateway: Gateway,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, gateway: Gateway) -> AppState {
        Arc::new(Self {
            sessions: SessionStore::new(db.clone()),
            db,
            gateway,
        })
    }
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    let result = tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?;
    Ok(result?)
}
