use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::{Database, format_timestamp};
use parley_types::events::ServerFrame;
use parley_types::models::ChatMessage;

use crate::blocking;
use crate::content::{MAX_CONTENT_CHARS, sanitize};
use crate::error::RelayError;
use crate::notifications::NotificationCounter;
use crate::presence::PresenceBroadcaster;
use crate::registry::ClientRegistry;

/// Stores direct messages and fans them out to both parties' live sessions.
#[derive(Clone)]
pub struct MessageRelay {
    db: Arc<Database>,
    registry: ClientRegistry,
    presence: PresenceBroadcaster,
    notifications: NotificationCounter,
}

impl MessageRelay {
    pub fn new(
        db: Arc<Database>,
        registry: ClientRegistry,
        presence: PresenceBroadcaster,
        notifications: NotificationCounter,
    ) -> Self {
        Self {
            db,
            registry,
            presence,
            notifications,
        }
    }

    /// Validate, persist and deliver one message.
    ///
    /// `origin` is the connection the message came in on, if any; it does not
    /// get the message echoed back. Live delivery is best effort: a failed
    /// push is logged and the rest of the fan-out continues, since the
    /// message can always be recovered from history.
    pub async fn send(
        &self,
        origin: Option<Uuid>,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> Result<ChatMessage, RelayError> {
        validate(sender, recipient, content)?;

        let who = recipient.to_string();
        if !blocking(&self.db, move |db| db.user_exists(&who)).await? {
            return Err(RelayError::Validation(format!("Unknown recipient '{}'", recipient)));
        }

        let message = ChatMessage {
            from: sender.to_string(),
            to: recipient.to_string(),
            content: content.to_string(),
            // Same precision as the stored row
            timestamp: Utc::now().trunc_subsecs(3),
        };

        let (from, to) = (message.from.clone(), message.to.clone());
        let stored = sanitize(content);
        let timestamp = format_timestamp(message.timestamp);
        blocking(&self.db, move |db| db.insert_message(&from, &to, &stored, &timestamp)).await?;

        // Independent of the insert: a failed bump leaves the message stored.
        if let Err(e) = self.notifications.increment(recipient, sender).await {
            warn!("Failed to count unread {} -> {}: {}", sender, recipient, e);
        }

        let delivered = self.deliver(origin, &message).await;
        info!(
            "{} -> {}: message stored, pushed to {} connection(s)",
            sender, recipient, delivered
        );

        self.presence.refresh(sender).await;
        self.presence.refresh(recipient).await;

        Ok(message)
    }

    /// Push to every connection of the recipient and every connection of the
    /// sender except `origin`. Returns the number of successful pushes.
    async fn deliver(&self, origin: Option<Uuid>, message: &ChatMessage) -> usize {
        let mut targets = self.registry.connections_of(&message.to).await;
        targets.extend(
            self.registry
                .connections_of(&message.from)
                .await
                .into_iter()
                .filter(|c| Some(c.connection_id) != origin),
        );

        let frame = ServerFrame::Chat(message.clone());
        let mut delivered = 0;
        for client in &targets {
            match client.push(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    "Live delivery to {} on {} failed: {}",
                    client.nickname, client.connection_id, e
                ),
            }
        }
        delivered
    }
}

/// Checks that need no storage access.
pub fn validate(sender: &str, recipient: &str, content: &str) -> Result<(), RelayError> {
    if content.trim().is_empty() {
        return Err(RelayError::Validation("Message cannot be empty".into()));
    }
    let len = content.chars().count();
    if !(1..=MAX_CONTENT_CHARS).contains(&len) {
        return Err(RelayError::Validation(format!(
            "Message must be 1-{} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if recipient.trim().is_empty() {
        return Err(RelayError::Validation("Recipient is required".into()));
    }
    if recipient == sender {
        return Err(RelayError::Validation("Cannot send a message to yourself".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientHandle;
    use crate::testing::gateway;
    use parley_types::events::{Notice, ServerFrame};
    use tokio::sync::mpsc;

    /// Chat frames only; user list refreshes are skipped.
    fn chats(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ChatMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Chat(msg) = frame {
                out.push(msg);
            }
        }
        out
    }

    fn user_lists(rx: &mut mpsc::Receiver<ServerFrame>) -> usize {
        let mut n = 0;
        while let Ok(frame) = rx.try_recv() {
            if matches!(frame, ServerFrame::Notice(Notice::UserList { .. })) {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn whitespace_only_is_rejected_without_side_effects() {
        let (gw, db) = gateway(&["alice", "bob"]);

        let err = gw.relay.send(None, "alice", "bob", "  ").await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(db.count_messages_between("alice", "bob").unwrap(), 0);
        assert_eq!(db.get_unread("bob", "alice").unwrap(), 0);
    }

    #[tokio::test]
    async fn length_bounds_are_in_characters() {
        assert!(validate("a", "b", &"x".repeat(MAX_CONTENT_CHARS)).is_ok());
        assert!(validate("a", "b", &"é".repeat(MAX_CONTENT_CHARS)).is_ok());
        assert!(validate("a", "b", &"x".repeat(MAX_CONTENT_CHARS + 1)).is_err());
        assert!(validate("a", "", "hi").is_err());
        assert!(validate("a", "a", "hi").is_err());
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_validation_error() {
        let (gw, db) = gateway(&["alice"]);
        let err = gw.relay.send(None, "alice", "ghost", "hi").await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
        assert_eq!(db.count_messages_between("alice", "ghost").unwrap(), 0);
    }

    #[tokio::test]
    async fn valid_message_is_stored_counted_and_fanned_out() {
        let (gw, db) = gateway(&["alice", "bob"]);
        let (tab1, mut tab1_rx) = ClientHandle::new("alice", "a", 16);
        let (tab2, mut tab2_rx) = ClientHandle::new("alice", "a", 16);
        let (bob1, mut bob1_rx) = ClientHandle::new("bob", "b1", 16);
        let (bob2, mut bob2_rx) = ClientHandle::new("bob", "b2", 16);
        for client in [&tab1, &tab2, &bob1, &bob2] {
            gw.registry.register(client.clone()).await;
        }

        let sent = gw
            .relay
            .send(Some(tab1.connection_id), "alice", "bob", "hi")
            .await
            .unwrap();
        assert_eq!(sent.from, "alice");
        assert_eq!(sent.to, "bob");

        let rows = db.get_history("alice", "bob", 10, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sender, "alice");
        assert_eq!(rows[0].receiver, "bob");
        assert_eq!(db.get_unread("bob", "alice").unwrap(), 1);
        assert_eq!(db.get_unread("alice", "bob").unwrap(), 0);

        assert!(chats(&mut tab1_rx).is_empty());
        assert_eq!(chats(&mut tab2_rx), vec![sent.clone()]);
        assert_eq!(chats(&mut bob1_rx), vec![sent.clone()]);
        assert_eq!(chats(&mut bob2_rx), vec![sent]);
    }

    #[tokio::test]
    async fn send_refreshes_both_conversation_lists() {
        let (gw, _db) = gateway(&["alice", "bob"]);
        let (alice, mut alice_rx) = ClientHandle::new("alice", "a", 16);
        let (bob, mut bob_rx) = ClientHandle::new("bob", "b", 16);
        gw.registry.register(alice.clone()).await;
        gw.registry.register(bob).await;

        gw.relay
            .send(Some(alice.connection_id), "alice", "bob", "hello")
            .await
            .unwrap();

        // The origin tab still gets its own refreshed list.
        assert_eq!(user_lists(&mut alice_rx), 1);
        assert_eq!(user_lists(&mut bob_rx), 1);
    }

    #[tokio::test]
    async fn without_origin_every_sender_tab_is_mirrored() {
        let (gw, _db) = gateway(&["alice", "bob"]);
        let (tab, mut tab_rx) = ClientHandle::new("alice", "a", 16);
        gw.registry.register(tab).await;

        let sent = gw.relay.send(None, "alice", "bob", "via http").await.unwrap();
        assert_eq!(chats(&mut tab_rx), vec![sent]);
    }

    #[tokio::test]
    async fn dead_connection_does_not_block_others() {
        let (gw, db) = gateway(&["alice", "bob"]);
        let (dead, dead_rx) = ClientHandle::new("bob", "b1", 16);
        let (live, mut live_rx) = ClientHandle::new("bob", "b2", 16);
        gw.registry.register(dead).await;
        gw.registry.register(live).await;
        drop(dead_rx);

        let sent = gw.relay.send(None, "alice", "bob", "still here").await.unwrap();
        assert_eq!(chats(&mut live_rx), vec![sent]);
        assert_eq!(db.count_messages_between("alice", "bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn markup_is_stored_escaped() {
        let (gw, db) = gateway(&["alice", "bob"]);
        let raw = "<script>alert('hi')</script>";

        let sent = gw.relay.send(None, "alice", "bob", raw).await.unwrap();
        assert_eq!(sent.content, raw);

        let rows = db.get_history("alice", "bob", 10, 0).unwrap();
        assert!(rows[0].content.contains("&lt;script&gt;"));
    }
}
