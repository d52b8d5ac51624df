use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use parley_db::{Database, parse_timestamp};
use parley_types::events::{Notice, ServerFrame};
use parley_types::models::{ConversationEntry, PresenceStatus};

use crate::blocking;
use crate::content::preview;
use crate::notifications::to_count;
use crate::registry::ClientRegistry;

/// Builds each user's conversation list and pushes it to all of their
/// live connections.
#[derive(Clone)]
pub struct PresenceBroadcaster {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    db: Arc<Database>,
    registry: ClientRegistry,
    debounce: Duration,
    /// Users with a refresh already scheduled
    pending: Mutex<HashSet<String>>,
}

impl PresenceBroadcaster {
    pub fn new(db: Arc<Database>, registry: ClientRegistry, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(PresenceInner {
                db,
                registry,
                debounce,
                pending: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// `nickname`'s peers, most recent interaction first. Peers never
    /// messaged are left out.
    pub async fn summary(&self, nickname: &str) -> Result<Vec<ConversationEntry>> {
        let viewer = nickname.to_string();
        let rows = blocking(&self.inner.db, move |db| db.get_conversations(&viewer)).await?;
        let online = self.inner.registry.online_set().await;

        let entries = rows
            .into_iter()
            .map(|row| {
                let last_interaction = parse_timestamp(&row.last_timestamp).unwrap_or_else(|| {
                    warn!(
                        "Corrupt timestamp '{}' between {} and {}",
                        row.last_timestamp, nickname, row.peer
                    );
                    chrono::DateTime::default()
                });
                ConversationEntry {
                    status: PresenceStatus::from_online(online.contains(&row.peer)),
                    last_message: preview(&row.last_content),
                    last_interaction,
                    unread: to_count(row.unread),
                    nickname: row.peer,
                }
            })
            .collect();

        Ok(entries)
    }

    /// Recompute and push `nickname`'s conversation list. Returns how many
    /// connections accepted the update.
    pub async fn refresh(&self, nickname: &str) -> usize {
        let targets = self.inner.registry.connections_of(nickname).await;
        if targets.is_empty() {
            return 0;
        }

        let users = match self.summary(nickname).await {
            Ok(users) => users,
            Err(e) => {
                warn!("Presence refresh for {} failed: {}", nickname, e);
                return 0;
            }
        };

        let frame = ServerFrame::Notice(Notice::UserList { users });
        let mut delivered = 0;
        for client in &targets {
            match client.push(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    "Dropped user list for {} on {}: {}",
                    nickname, client.connection_id, e
                ),
            }
        }
        delivered
    }

    /// Refresh every online user.
    pub async fn refresh_all(&self) {
        for nickname in self.inner.registry.all_identities().await {
            self.refresh(&nickname).await;
        }
    }

    /// Refresh `nickname` after the debounce window. Calls made while a
    /// refresh is already pending for the same user are absorbed by it.
    pub fn schedule_refresh(&self, nickname: &str) {
        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .expect("presence debounce lock poisoned");
            if !pending.insert(nickname.to_string()) {
                return;
            }
        }

        let this = self.clone();
        let nickname = nickname.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.debounce).await;
            this.inner
                .pending
                .lock()
                .expect("presence debounce lock poisoned")
                .remove(&nickname);
            this.refresh(&nickname).await;
        });
    }

    pub async fn schedule_refresh_all(&self) {
        for nickname in self.inner.registry.all_identities().await {
            self.schedule_refresh(&nickname);
        }
    }
}
