pub mod connection;
pub mod content;
pub mod error;
pub mod notifications;
pub mod presence;
pub mod registry;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use parley_db::Database;

pub use error::{DeliveryError, RelayError};
pub use notifications::NotificationCounter;
pub use presence::PresenceBroadcaster;
pub use registry::{ClientHandle, ClientRegistry};
pub use relay::MessageRelay;

/// Tunables for the live messaging layer.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Capacity of each connection's outbound queue
    pub outbound_queue: usize,
    /// Window in which repeated presence refreshes for one user collapse
    pub presence_debounce: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            presence_debounce: Duration::from_millis(100),
        }
    }
}

/// The messaging services, wired together once at startup and shared by
/// handle with every connection and HTTP handler.
#[derive(Clone)]
pub struct Gateway {
    pub registry: ClientRegistry,
    pub presence: PresenceBroadcaster,
    pub notifications: NotificationCounter,
    pub relay: MessageRelay,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(db: Arc<Database>, config: GatewayConfig) -> Self {
        let registry = ClientRegistry::new();
        let presence =
            PresenceBroadcaster::new(db.clone(), registry.clone(), config.presence_debounce);
        let notifications = NotificationCounter::new(db.clone());
        let relay = MessageRelay::new(
            db,
            registry.clone(),
            presence.clone(),
            notifications.clone(),
        );

        Self {
            registry,
            presence,
            notifications,
            relay,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Force-close every live connection opened with `session_token`.
    /// Returns how many connections were told to terminate.
    pub async fn terminate_session(&self, nickname: &str, session_token: &str) -> usize {
        let clients = self.registry.sessions_of(nickname, session_token).await;
        for client in &clients {
            client.terminate();
        }
        if !clients.is_empty() {
            info!(
                "Terminated {} connection(s) of {} for logged out session",
                clients.len(),
                nickname
            );
        }
        clients.len()
    }
}

/// Run a blocking database call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}
