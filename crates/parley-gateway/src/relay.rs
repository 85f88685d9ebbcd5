//! The relay core: turns inbound gateway commands into store writes,
//! registry updates and outbound events.
//!
//! Each connection's commands are handled one at a time by its socket task,
//! so handlers for the same connection never interleave. Handlers for
//! different connections do; registries are keyed by connection and each
//! connection only writes its own key. Store calls are the only suspension
//! points and run on the blocking pool.

use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{
    GatewayCommand, GatewayEvent, PrivateMessagePayload, ReactionPayload, SendMessagePayload,
};
use parley_types::models::{ConnectionId, Message, PresenceEntry, Sender, User};

use crate::cache::MessageCache;
use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::RelayError;
use crate::registry::{PresenceRegistry, TypingRegistry};

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RelayCore {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    presence: PresenceRegistry,
    typing: TypingRegistry,
    recent: MessageCache,
}

impl RelayCore {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                db,
                dispatcher,
                presence: PresenceRegistry::new(),
                typing: TypingRegistry::new(),
                recent: MessageCache::default(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    pub fn typing_users(&self) -> &TypingRegistry {
        &self.inner.typing
    }

    /// The in-memory working set, oldest first.
    pub fn recent_messages(&self) -> Vec<Message> {
        self.inner.recent.recent()
    }

    /// Route one inbound command from `conn_id` to its handler.
    pub async fn handle(&self, conn_id: &ConnectionId, cmd: GatewayCommand) -> Result<(), RelayError> {
        match cmd {
            GatewayCommand::UserJoin(username) => self.join(conn_id, username).await,
            GatewayCommand::SendMessage(payload) => self.send_message(conn_id, payload).await,
            GatewayCommand::SendFile(file) => self.send_file(conn_id, file).await,
            GatewayCommand::Typing(is_typing) => {
                self.set_typing(conn_id, is_typing).await;
                Ok(())
            }
            GatewayCommand::PrivateMessage(payload) => self.private_message(conn_id, payload).await,
            GatewayCommand::MessageRead(message_id) => self.message_read(message_id).await,
            GatewayCommand::ReactToMessage(payload) => self.react(payload).await,
        }
    }

    pub async fn join(&self, conn_id: &ConnectionId, username: String) -> Result<(), RelayError> {
        let user = User {
            username: username.clone(),
            connection_id: conn_id.clone(),
            connected_at: chrono::Utc::now(),
        };
        self.store(move |db| db.create_user(&user)).await?;

        let entry = PresenceEntry {
            username,
            id: conn_id.clone(),
        };
        self.inner.presence.add(conn_id.clone(), entry.clone()).await;

        self.broadcast_user_list().await;
        info!("{} joined the chat", entry.username);
        self.inner.dispatcher.broadcast(GatewayEvent::UserJoined(entry)).await;
        Ok(())
    }

    pub async fn send_message(
        &self,
        conn_id: &ConnectionId,
        payload: SendMessagePayload,
    ) -> Result<(), RelayError> {
        let message = Message::new(&self.sender(conn_id).await, conn_id.clone())
            .with_body(payload.message)
            .with_file(payload.file);
        self.insert(&message).await?;

        self.inner.recent.push(message.clone());
        self.inner.dispatcher.broadcast(GatewayEvent::ReceiveMessage(message)).await;
        Ok(())
    }

    /// Like `send_message` but the message carries only a file, and it is not
    /// added to the recent-message working set.
    pub async fn send_file(
        &self,
        conn_id: &ConnectionId,
        file: serde_json::Value,
    ) -> Result<(), RelayError> {
        let message =
            Message::new(&self.sender(conn_id).await, conn_id.clone()).with_file(Some(file));
        self.insert(&message).await?;

        self.inner.dispatcher.broadcast(GatewayEvent::ReceiveMessage(message)).await;
        Ok(())
    }

    /// Ignored for connections that have not joined. Otherwise the typing
    /// roster is re-broadcast even when nothing changed.
    pub async fn set_typing(&self, conn_id: &ConnectionId, is_typing: bool) {
        let Some(entry) = self.inner.presence.get(conn_id).await else {
            debug!(connection = %conn_id, "typing from unjoined connection ignored");
            return;
        };

        if is_typing {
            self.inner.typing.add(conn_id.clone(), entry.username).await;
        } else {
            self.inner.typing.remove(conn_id).await;
        }

        self.broadcast_typing_users().await;
    }

    /// Delivered to the target and echoed to the sender, nobody else.
    pub async fn private_message(
        &self,
        conn_id: &ConnectionId,
        PrivateMessagePayload { to, message }: PrivateMessagePayload,
    ) -> Result<(), RelayError> {
        let message = Message::new(&self.sender(conn_id).await, conn_id.clone())
            .with_body(Some(message))
            .private();
        self.insert(&message).await?;

        let event = GatewayEvent::PrivateMessage(message);
        if to != *conn_id
            && self.inner.dispatcher.send_to(&to, event.clone()).await == Delivery::Dropped
        {
            debug!(connection = %conn_id, "private message target {} is gone", to);
        }
        let _ = self.inner.dispatcher.send_to(conn_id, event).await;
        Ok(())
    }

    /// Marks the message read and tells its sender, if still connected.
    pub async fn message_read(&self, message_id: Uuid) -> Result<(), RelayError> {
        let id = message_id.to_string();
        let Some(sender_id) = self.store(move |db| db.mark_read(&id)).await? else {
            debug!("read receipt for unknown message {}", message_id);
            return Ok(());
        };

        let _ = self
            .inner
            .dispatcher
            .send_to(
                &ConnectionId::from(sender_id),
                GatewayEvent::MessageReadReceipt(message_id),
            )
            .await;
        Ok(())
    }

    pub async fn react(
        &self,
        ReactionPayload {
            message_id,
            reaction,
        }: ReactionPayload,
    ) -> Result<(), RelayError> {
        let id = message_id.to_string();
        let Some(reactions) = self.store(move |db| db.add_reaction(&id, &reaction)).await? else {
            debug!("reaction to unknown message {}", message_id);
            return Ok(());
        };

        self.inner
            .dispatcher
            .broadcast(GatewayEvent::MessageReacted {
                message_id,
                reactions,
            })
            .await;
        Ok(())
    }

    /// Never fails: a store error while deleting the user row is logged and
    /// the in-memory cleanup still happens.
    pub async fn disconnect(&self, conn_id: &ConnectionId) {
        if let Some(entry) = self.inner.presence.get(conn_id).await {
            let id = conn_id.to_string();
            if let Err(e) = self.store(move |db| db.delete_user_by_connection(&id)).await {
                error!(connection = %conn_id, "failed to delete user row: {}", e);
            }

            info!("{} left the chat", entry.username);
            self.inner.dispatcher.broadcast(GatewayEvent::UserLeft(entry)).await;
        }

        self.inner.presence.remove(conn_id).await;
        self.inner.typing.remove(conn_id).await;

        self.broadcast_user_list().await;
        self.broadcast_typing_users().await;
    }

    async fn sender(&self, conn_id: &ConnectionId) -> Sender {
        match self.inner.presence.get(conn_id).await {
            Some(entry) => Sender::Known(entry.username),
            None => Sender::Unknown,
        }
    }

    async fn broadcast_user_list(&self) {
        let users = self.inner.presence.all().await;
        self.inner.dispatcher.broadcast(GatewayEvent::UserList(users)).await;
    }

    async fn broadcast_typing_users(&self) {
        let names = self.inner.typing.all().await;
        self.inner.dispatcher.broadcast(GatewayEvent::TypingUsers(names)).await;
    }

    async fn insert(&self, message: &Message) -> Result<(), RelayError> {
        let message = message.clone();
        self.store(move |db| db.insert_message(&message)).await
    }

    /// Run a blocking store operation off the async runtime.
    async fn store<F, T>(&self, op: F) -> Result<T, RelayError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        let result = tokio::task::spawn_blocking(move || op(db.as_ref())).await?;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RECENT_MESSAGE_CAPACITY;
    use crate::dispatcher::Outbox;

    fn relay() -> RelayCore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        RelayCore::new(db, Dispatcher::new())
    }

    async fn connect(relay: &RelayCore, id: &str) -> (ConnectionId, Outbox) {
        let conn_id = ConnectionId::from(id);
        let outbox = relay.dispatcher().register(conn_id.clone()).await;
        (conn_id, outbox)
    }

    fn text(body: &str) -> SendMessagePayload {
        SendMessagePayload {
            message: Some(body.to_string()),
            file: None,
        }
    }

    fn user_list(events: &[GatewayEvent]) -> Option<Vec<PresenceEntry>> {
        events.iter().rev().find_map(|e| match e {
            GatewayEvent::UserList(users) => Some(users.clone()),
            _ => None,
        })
    }

    fn received(events: Vec<GatewayEvent>) -> Vec<Message> {
        events
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::ReceiveMessage(m) | GatewayEvent::PrivateMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn join_broadcasts_roster_then_notice() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay.join(&a, "ada".into()).await.unwrap();

        let entry = PresenceEntry {
            username: "ada".into(),
            id: a.clone(),
        };
        assert_eq!(
            a_out.drain(),
            [
                GatewayEvent::UserList(vec![entry.clone()]),
                GatewayEvent::UserJoined(entry),
            ]
        );
        assert_eq!(relay.inner.db.list_users().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_after_join_removes_presence() {
        let relay = relay();
        let (a, _a_out) = connect(&relay, "a").await;
        let (b, mut b_out) = connect(&relay, "b").await;

        relay.join(&a, "ada".into()).await.unwrap();
        relay.join(&b, "bob".into()).await.unwrap();
        b_out.drain();

        relay.disconnect(&a).await;

        assert!(relay.presence().get(&a).await.is_none());
        let events = b_out.drain();
        assert!(events.contains(&GatewayEvent::UserLeft(PresenceEntry {
            username: "ada".into(),
            id: a.clone(),
        })));
        let roster = user_list(&events).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, b);

        let users = relay.inner.db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].connection_id, "b");
    }

    #[tokio::test]
    async fn second_join_replaces_user_and_disconnect_clears_it() {
        let relay = relay();
        let (a, _a_out) = connect(&relay, "a").await;

        relay.join(&a, "ada".into()).await.unwrap();
        relay.join(&a, "ada2".into()).await.unwrap();

        let users = relay.inner.db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "ada2");
        assert_eq!(relay.presence().get(&a).await.unwrap().username, "ada2");

        relay.disconnect(&a).await;

        assert!(relay.inner.db.list_users().unwrap().is_empty());
        assert!(relay.presence().is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_without_join_only_rebroadcasts_snapshots() {
        let relay = relay();
        let (a, _a_out) = connect(&relay, "a").await;
        let (_b, mut b_out) = connect(&relay, "b").await;

        relay.disconnect(&a).await;

        assert_eq!(
            b_out.drain(),
            [GatewayEvent::UserList(vec![]), GatewayEvent::TypingUsers(vec![])]
        );
    }

    #[tokio::test]
    async fn messages_from_unjoined_connections_are_anonymous() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay.send_message(&a, text("hello?")).await.unwrap();

        let messages = received(a_out.drain());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "Anonymous");
        assert_eq!(messages[0].sender_id, a);
        assert!(!messages[0].is_private);
    }

    #[tokio::test]
    async fn working_set_keeps_latest_hundred() {
        let relay = relay();
        let (a, _a_out) = connect(&relay, "a").await;
        relay.join(&a, "ada".into()).await.unwrap();

        let total = RECENT_MESSAGE_CAPACITY + 5;
        for i in 0..total {
            relay.send_message(&a, text(&format!("m{i}"))).await.unwrap();
        }

        let recent = relay.recent_messages();
        assert_eq!(recent.len(), RECENT_MESSAGE_CAPACITY);
        assert_eq!(recent[0].message.as_deref(), Some("m5"));
        assert_eq!(
            recent.last().unwrap().message.as_deref(),
            Some(format!("m{}", total - 1).as_str())
        );
        assert_eq!(relay.inner.db.count_messages().unwrap(), total as u64);
    }

    #[tokio::test]
    async fn files_are_broadcast_but_not_cached() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;
        let file = serde_json::json!({"name": "cat.png", "type": "image/png"});

        relay.send_file(&a, file.clone()).await.unwrap();

        let messages = received(a_out.drain());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].file.as_ref(), Some(&file));
        assert!(messages[0].message.is_none());
        assert!(relay.recent_messages().is_empty());
    }

    #[tokio::test]
    async fn typing_requires_presence() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay.set_typing(&a, true).await;
        assert!(a_out.drain().is_empty());

        relay.join(&a, "ada".into()).await.unwrap();
        a_out.drain();

        relay.set_typing(&a, true).await;
        assert_eq!(a_out.drain(), [GatewayEvent::TypingUsers(vec!["ada".into()])]);

        relay.set_typing(&a, false).await;
        relay.set_typing(&a, false).await;
        assert_eq!(
            a_out.drain(),
            [GatewayEvent::TypingUsers(vec![]), GatewayEvent::TypingUsers(vec![])]
        );
    }

    #[tokio::test]
    async fn disconnect_clears_typing() {
        let relay = relay();
        let (a, _a_out) = connect(&relay, "a").await;
        let (_b, mut b_out) = connect(&relay, "b").await;
        relay.join(&a, "ada".into()).await.unwrap();
        relay.set_typing(&a, true).await;
        b_out.drain();

        relay.disconnect(&a).await;

        assert!(relay.typing_users().is_empty().await);
        assert_eq!(b_out.drain().last(), Some(&GatewayEvent::TypingUsers(vec![])));
    }

    #[tokio::test]
    async fn private_message_reaches_only_sender_and_target() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;
        let (b, mut b_out) = connect(&relay, "b").await;
        let (_c, mut c_out) = connect(&relay, "c").await;
        relay.join(&a, "ada".into()).await.unwrap();
        for outbox in [&mut a_out, &mut b_out, &mut c_out] {
            outbox.drain();
        }

        relay
            .private_message(
                &a,
                PrivateMessagePayload {
                    to: b.clone(),
                    message: "psst".into(),
                },
            )
            .await
            .unwrap();

        let to_a = received(a_out.drain());
        let to_b = received(b_out.drain());
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a, to_b);
        assert!(to_a[0].is_private);
        assert_eq!(to_a[0].sender, "ada");
        assert!(c_out.drain().is_empty());
    }

    #[tokio::test]
    async fn private_message_to_vanished_target_still_echoes() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay
            .private_message(
                &a,
                PrivateMessagePayload {
                    to: "gone".into(),
                    message: "hello?".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(received(a_out.drain()).len(), 1);
        assert_eq!(relay.inner.db.count_messages().unwrap(), 1);
    }

    #[tokio::test]
    async fn private_message_to_self_is_delivered_once() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay
            .private_message(
                &a,
                PrivateMessagePayload {
                    to: a.clone(),
                    message: "note to self".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(received(a_out.drain()).len(), 1);
    }

    #[tokio::test]
    async fn read_receipt_goes_to_message_sender_only() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;
        let (_b, mut b_out) = connect(&relay, "b").await;

        relay.send_message(&a, text("read me")).await.unwrap();
        let id = received(a_out.drain())[0].id;
        b_out.drain();

        relay.message_read(id).await.unwrap();

        assert_eq!(a_out.drain(), [GatewayEvent::MessageReadReceipt(id)]);
        assert!(b_out.drain().is_empty());
        assert!(relay.inner.db.get_message(&id.to_string()).unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn read_receipt_for_unknown_message_is_silent() {
        let relay = relay();
        let (_a, mut a_out) = connect(&relay, "a").await;

        relay.message_read(Uuid::new_v4()).await.unwrap();

        assert!(a_out.drain().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_for_departed_sender_is_dropped() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;
        relay.send_message(&a, text("bye")).await.unwrap();
        let id = received(a_out.drain())[0].id;
        relay.dispatcher().unregister(&a).await;

        relay.message_read(id).await.unwrap();

        assert!(relay.inner.db.get_message(&id.to_string()).unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn reactions_count_per_label() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;
        relay.send_message(&a, text("nice")).await.unwrap();
        let message_id = received(a_out.drain())[0].id;

        for reaction in ["👍", "👍", "🎉"] {
            relay
                .react(ReactionPayload {
                    message_id,
                    reaction: reaction.into(),
                })
                .await
                .unwrap();
        }

        let reactions = match a_out.drain().pop() {
            Some(GatewayEvent::MessageReacted { reactions, .. }) => reactions,
            other => panic!("expected message_reacted, got {:?}", other),
        };
        assert_eq!(reactions.get("👍"), Some(&2));
        assert_eq!(reactions.get("🎉"), Some(&1));
    }

    #[tokio::test]
    async fn reaction_to_unknown_message_is_silent() {
        let relay = relay();
        let (_a, mut a_out) = connect(&relay, "a").await;

        relay
            .react(ReactionPayload {
                message_id: Uuid::new_v4(),
                reaction: "👍".into(),
            })
            .await
            .unwrap();

        assert!(a_out.drain().is_empty());
    }

    #[tokio::test]
    async fn handle_routes_commands() {
        let relay = relay();
        let (a, mut a_out) = connect(&relay, "a").await;

        relay.handle(&a, GatewayCommand::UserJoin("ada".into())).await.unwrap();
        relay.handle(&a, GatewayCommand::Typing(true)).await.unwrap();
        relay
            .handle(&a, GatewayCommand::SendMessage(text("hi")))
            .await
            .unwrap();

        let kinds: Vec<_> = a_out.drain().iter().map(GatewayEvent::kind).collect();
        assert_eq!(kinds, ["user_list", "user_joined", "typing_users", "receive_message"]);
    }

    #[tokio::test]
    async fn instances_do_not_share_state() {
        let first = relay();
        let second = relay();
        let (a, _out) = connect(&first, "a").await;

        first.join(&a, "ada".into()).await.unwrap();

        assert_eq!(first.presence().len().await, 1);
        assert!(second.presence().is_empty().await);
    }
}
