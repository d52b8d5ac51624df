use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_types::events::{ChatCommand, Notice, ServerFrame, SessionEvent};

use crate::Gateway;
use crate::error::RelayError;
use crate::registry::ClientHandle;
use crate::relay::MessageRelay;

/// Ping period. Two unanswered pings in a row drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Registry membership of one live connection.
///
/// Created once the session has been validated and the socket upgraded
/// (the connection is then open); `close` moves it to closed exactly once
/// no matter how many terminate paths race to call it.
pub struct Connection {
    client: ClientHandle,
    gateway: Gateway,
    closed: AtomicBool,
}

impl Connection {
    /// Register a new connection for `nickname` and announce it.
    pub async fn open(
        gateway: Gateway,
        nickname: impl Into<String>,
        session_token: impl Into<String>,
    ) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (client, outbound) =
            ClientHandle::new(nickname, session_token, gateway.config().outbound_queue);
        gateway.registry.register(client.clone()).await;

        // Everyone's list shows this user's status.
        gateway.presence.refresh_all().await;

        let conn = Self {
            client,
            gateway,
            closed: AtomicBool::new(false),
        };
        (conn, outbound)
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Leave the registry and schedule a presence pass. Returns `false` if
    /// the connection was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.gateway.registry.unregister(&self.client).await;
        self.gateway.presence.schedule_refresh_all().await;
        true
    }
}

/// Run a WebSocket whose session was already validated at the HTTP upgrade.
pub async fn handle_connection(
    socket: WebSocket,
    gateway: Gateway,
    nickname: String,
    session_token: String,
) {
    let (sender, receiver) = socket.split();

    let (connection, outbound) = Connection::open(gateway.clone(), nickname.clone(), session_token).await;
    let client = connection.client().clone();
    info!("{} connected ({})", nickname, client.connection_id);

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(
        sender,
        outbound,
        client.termination(),
        pong_received.clone(),
    ));
    let mut recv_task = tokio::spawn(read_loop(
        receiver,
        gateway.relay.clone(),
        client.clone(),
        pong_received,
    ));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    connection.close().await;
    info!("{} disconnected ({})", nickname, client.connection_id);
}

/// Drain the outbound queue into the socket, keep the heartbeat going, and
/// say goodbye when the session is terminated.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    terminate: CancellationToken,
    pong_flag: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            biased;

            _ = terminate.cancelled() => {
                if let Some(text) = encode(&ServerFrame::Session(SessionEvent::terminated())) {
                    let _ = sender.send(Message::Text(text.into())).await;
                }
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let Some(text) = encode(&frame) else { continue };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_flag.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    relay: MessageRelay,
    client: ClientHandle,
    pong_flag: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ChatCommand>(&text) {
                Ok(cmd) => handle_inbound(&relay, &client, cmd).await,
                Err(e) => {
                    warn!(
                        "{} ({}) sent an undecodable frame, closing: {} -- raw: {}",
                        client.nickname,
                        client.connection_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    break;
                }
            },
            Message::Pong(_) => {
                pong_flag.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Relay one chat payload received on `client`'s connection.
///
/// The sender is always the connection's own identity. Blank messages are
/// ignored; any other rejection is reported back on this connection only.
pub async fn handle_inbound(relay: &MessageRelay, client: &ClientHandle, cmd: ChatCommand) {
    if cmd.content.trim().is_empty() {
        debug!("{} sent an empty message, ignoring", client.nickname);
        return;
    }

    if let Some(claimed) = cmd.from.as_deref() {
        if claimed != client.nickname {
            warn!(
                "{} ({}) claimed to send as '{}', using session identity",
                client.nickname, client.connection_id, claimed
            );
        }
    }

    let result = relay
        .send(
            Some(client.connection_id),
            &client.nickname,
            &cmd.to,
            &cmd.content,
        )
        .await;

    if let Err(e) = result {
        match &e {
            RelayError::Validation(reason) => {
                debug!("{} -> {} rejected: {}", client.nickname, cmd.to, reason)
            }
            RelayError::Persistence(err) => {
                warn!("{} -> {} not stored: {}", client.nickname, cmd.to, err)
            }
        }
        let notice = ServerFrame::Notice(Notice::Error {
            message: e.client_message(),
        });
        if let Err(push_err) = client.push(notice) {
            debug!("Could not report error to {}: {}", client.connection_id, push_err);
        }
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode outbound frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::gateway;
    use parley_types::models::ChatMessage;

    fn command(from: Option<&str>, to: &str, content: &str) -> ChatCommand {
        ChatCommand {
            from: from.map(str::to_string),
            to: to.to_string(),
            content: content.to_string(),
        }
    }

    fn frames(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    fn chats(frames: &[ServerFrame]) -> Vec<&ChatMessage> {
        frames
            .iter()
            .filter_map(|f| match f {
                ServerFrame::Chat(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn open_registers_and_close_is_guarded() {
        let (gw, _db) = gateway(&["alice"]);

        let (conn, mut rx) = Connection::open(gw.clone(), "alice", "tok").await;
        assert!(gw.registry.is_online("alice").await);
        // Opening pushes the user's own (empty) list.
        assert_eq!(frames(&mut rx).len(), 1);

        assert!(conn.close().await);
        assert!(conn.is_closed());
        assert!(!gw.registry.is_online("alice").await);

        assert!(!conn.close().await);
    }

    #[tokio::test]
    async fn opening_a_second_tab_updates_peers() {
        let (gw, db) = gateway(&["alice", "bob"]);
        db.insert_message("alice", "bob", "hey", "2024-01-01T00:00:00.000Z").unwrap();

        let (_bob, mut bob_rx) = Connection::open(gw.clone(), "bob", "b").await;
        frames(&mut bob_rx);

        let (_alice, _alice_rx) = Connection::open(gw.clone(), "alice", "a").await;
        let pushed = frames(&mut bob_rx);
        match pushed.as_slice() {
            [ServerFrame::Notice(Notice::UserList { users })] => {
                assert_eq!(users[0].nickname, "alice");
                assert_eq!(users[0].status, parley_types::models::PresenceStatus::Online);
            }
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[tokio::test]
    async fn blank_content_is_ignored() {
        let (gw, db) = gateway(&["alice", "bob"]);
        let (conn, mut rx) = Connection::open(gw.clone(), "alice", "a").await;
        frames(&mut rx);

        handle_inbound(&gw.relay, conn.client(), command(None, "bob", " \n\t ")).await;

        assert!(frames(&mut rx).is_empty());
        assert_eq!(db.count_messages_between("alice", "bob").unwrap(), 0);
    }

    #[tokio::test]
    async fn spoofed_sender_is_replaced_by_session_identity() {
        let (gw, db) = gateway(&["alice", "bob", "mallory"]);
        let (mallory, _rx) = Connection::open(gw.clone(), "mallory", "m").await;
        let (_bob, mut bob_rx) = Connection::open(gw.clone(), "bob", "b").await;
        frames(&mut bob_rx);

        handle_inbound(&gw.relay, mallory.client(), command(Some("alice"), "bob", "trust me")).await;

        let pushed = frames(&mut bob_rx);
        let got = chats(&pushed);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].from, "mallory");
        assert_eq!(db.count_messages_between("alice", "bob").unwrap(), 0);
        assert_eq!(db.count_messages_between("mallory", "bob").unwrap(), 1);
    }

    #[tokio::test]
    async fn rejection_is_reported_to_origin_only() {
        let (gw, _db) = gateway(&["alice"]);
        let (tab1, mut rx1) = Connection::open(gw.clone(), "alice", "a").await;
        let (_tab2, mut rx2) = Connection::open(gw.clone(), "alice", "a").await;
        frames(&mut rx1);
        frames(&mut rx2);

        handle_inbound(&gw.relay, tab1.client(), command(None, "nobody", "hello?")).await;

        match frames(&mut rx1).as_slice() {
            [ServerFrame::Notice(Notice::Error { message })] => assert!(message.contains("nobody")),
            other => panic!("unexpected frames {:?}", other),
        }
        assert!(frames(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn second_tab_mirrors_without_echo() {
        let (gw, _db) = gateway(&["alice", "bob"]);
        let (tab1, mut rx1) = Connection::open(gw.clone(), "alice", "a").await;
        let (_tab2, mut rx2) = Connection::open(gw.clone(), "alice", "a").await;
        frames(&mut rx1);
        frames(&mut rx2);

        handle_inbound(&gw.relay, tab1.client(), command(Some("alice"), "bob", "hi")).await;

        assert!(chats(&frames(&mut rx1)).is_empty());
        let mirrored = frames(&mut rx2);
        let got = chats(&mirrored);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "hi");
    }

    #[tokio::test]
    async fn terminate_session_hits_only_that_session() {
        let (gw, _db) = gateway(&["alice"]);
        let (laptop, _rx1) = Connection::open(gw.clone(), "alice", "laptop").await;
        let (phone, _rx2) = Connection::open(gw.clone(), "alice", "phone").await;

        assert_eq!(gw.terminate_session("alice", "laptop").await, 1);
        assert!(laptop.client().is_terminated());
        assert!(!phone.client().is_terminated());

        // Logout racing a natural close still leaves the registry consistent.
        assert!(laptop.close().await);
        assert!(!laptop.close().await);
        assert_eq!(gw.registry.connections_of("alice").await.len(), 1);
    }
}
