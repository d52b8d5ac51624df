use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use parley_types::events::ServerFrame;

use crate::error::DeliveryError;

/// One live connection (a browser tab or device) of a user.
///
/// Cloning is cheap; every clone feeds the same outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub connection_id: Uuid,
    pub nickname: String,
    pub session_token: String,
    tx: mpsc::Sender<ServerFrame>,
    terminate: CancellationToken,
}

impl ClientHandle {
    /// Create a handle and the receiving end of its bounded outbound queue.
    pub fn new(
        nickname: impl Into<String>,
        session_token: impl Into<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = Self {
            connection_id: Uuid::new_v4(),
            nickname: nickname.into(),
            session_token: session_token.into(),
            tx,
            terminate: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Queue a frame without waiting. A full or closed queue drops the frame.
    pub fn push(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection's writer to send a logout frame and close.
    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.is_cancelled()
    }

    pub fn termination(&self) -> CancellationToken {
        self.terminate.clone()
    }
}

/// Directory of who is connected, and through which connections.
///
/// A user is online exactly when they have an entry here; entries are
/// dropped as soon as their last connection goes away. The lock only ever
/// guards map bookkeeping: readers get snapshots and push after releasing it.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, Vec<ClientHandle>>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client: ClientHandle) {
        let mut clients = self.clients.write().await;
        let nickname = client.nickname.clone();
        let connection_id = client.connection_id;
        let sessions = clients.entry(nickname.clone()).or_default();
        sessions.push(client);

        info!(
            "{} registered connection {} ({} open)",
            nickname,
            connection_id,
            sessions.len()
        );
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn unregister(&self, client: &ClientHandle) -> bool {
        let mut clients = self.clients.write().await;

        let Some(sessions) = clients.get_mut(&client.nickname) else {
            return false;
        };
        let Some(pos) = sessions
            .iter()
            .position(|c| c.connection_id == client.connection_id)
        else {
            return false;
        };

        sessions.remove(pos);
        let remaining = sessions.len();
        if remaining == 0 {
            clients.remove(&client.nickname);
        }

        info!(
            "{} unregistered connection {} ({} open)",
            client.nickname, client.connection_id, remaining
        );
        true
    }

    pub async fn connections_of(&self, nickname: &str) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .get(nickname)
            .cloned()
            .unwrap_or_default()
    }

    /// Connections of `nickname` opened with one particular session token.
    pub async fn sessions_of(&self, nickname: &str, session_token: &str) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .get(nickname)
            .map(|sessions| {
                sessions
                    .iter()
                    .filter(|c| c.session_token == session_token)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Online users, sorted.
    pub async fn all_identities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn online_set(&self) -> HashSet<String> {
        self.clients.read().await.keys().cloned().collect()
    }

    pub async fn is_online(&self, nickname: &str) -> bool {
        self.clients.read().await.contains_key(nickname)
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.values().map(Vec::len).sum()
    }
}
