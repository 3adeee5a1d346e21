/// Message persistence and live synchronization.
///
/// Messages are an append-only stream per conversation, stored in sled under
/// ordered keys `msg/{conversation_key}/{millis}-{seq}` so a prefix scan
/// yields the authoritative total order. `created_at` and `seq` are assigned
/// here, from the store's clock — never the sender's — so both participants
/// converge on the same order regardless of device clock skew.
///
/// Live subscriptions deliver the full ordered sequence on establishment and
/// again on every append (at-least-once; consumers replace wholesale).
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use crate::feed::{self, Feed, FeedSender};
use crate::types::{BoardEvent, Message};
use chrono::{SecondsFormat, Utc};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

const FEED_BUFFER: usize = 16;

/// Full-snapshot live feed over one conversation's messages
pub type MessageFeed = Feed<Vec<Message>>;

#[derive(Clone)]
pub struct MessageStore {
    db: sled::Db,
    events: broadcast::Sender<BoardEvent>,
}

impl MessageStore {
    /// Create message store
    pub fn new(data_dir: &Path, event_capacity: usize) -> Result<Self> {
        let db = sled::open(data_dir.join("messages.db"))
            .map_err(|e| BoardError::Storage(format!("Failed to open messages DB: {}", e)))?;
        let (events, _) = broadcast::channel(event_capacity);
        Ok(Self { db, events })
    }

    /// Append one immutable message to a conversation stream.
    ///
    /// Validates the at-least-one-of-text-or-attachment invariant, assigns
    /// `created_at` and `seq`, persists, then notifies live feeds.
    pub async fn append(
        &self,
        key: &ConversationKey,
        sender_id: &str,
        text: Option<&str>,
        attachment_url: Option<&str>,
    ) -> Result<Message> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        let attachment_url = attachment_url.filter(|u| !u.is_empty());
        if text.is_none() && attachment_url.is_none() {
            return Err(BoardError::EmptyMessage);
        }

        let now = Utc::now();
        let seq = self
            .db
            .generate_id()
            .map_err(|e| BoardError::Storage(format!("Failed to assign message seq: {}", e)))?;

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            conversation_key: key.as_str().to_string(),
            sender_id: sender_id.to_string(),
            text: text.map(str::to_string),
            attachment_url: attachment_url.map(str::to_string),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            seq,
        };

        let db_key = format!("msg/{}/{:020}-{:020}", key, now.timestamp_millis(), seq);
        let value = serde_json::to_vec(&msg).map_err(BoardError::Serialization)?;
        self.db
            .insert(db_key.as_bytes(), value)
            .map_err(|e| BoardError::Storage(format!("Failed to save message: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| BoardError::Storage(format!("Failed to flush messages DB: {}", e)))?;

        debug!("Appended message {} to {}", msg.id, key);
        // Receiver count may be zero; that just means no live views
        let _ = self.events.send(BoardEvent::MessagesChanged {
            conversation_key: key.clone(),
        });
        Ok(msg)
    }

    /// Full ordered history for one conversation
    pub fn history(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        let prefix = format!("msg/{}/", key);
        let mut messages = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) =
                entry.map_err(|e| BoardError::Storage(format!("History scan failed: {}", e)))?;
            let msg: Message = serde_json::from_slice(&value).map_err(BoardError::Serialization)?;
            msg.validate()?;
            messages.push(msg);
        }
        Ok(messages)
    }

    /// Establish a live feed over one conversation.
    ///
    /// The feed receives the current full snapshot immediately, then the full
    /// snapshot again after every append by any participant. The returned
    /// handle must be closed (or dropped) when the view goes away — an
    /// abandoned open feed is a leaked standing read.
    pub fn subscribe(&self, key: &ConversationKey) -> MessageFeed {
        let (tx, feed) = feed::channel(FEED_BUFFER);
        // Subscribe to change events before taking the initial snapshot so an
        // append between the two is never missed.
        let mut events = self.events.subscribe();
        let store = self.clone();
        let key = key.clone();

        tokio::spawn(async move {
            if !push_snapshot(&store, &key, &tx).await {
                return;
            }
            loop {
                match events.recv().await {
                    Ok(BoardEvent::MessagesChanged { conversation_key })
                        if conversation_key == key =>
                    {
                        if !push_snapshot(&store, &key, &tx).await {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Missed notifications are harmless: the next snapshot
                        // is always the full current sequence.
                        warn!("Message feed for {} lagged {} events, resyncing", key, n);
                        if !push_snapshot(&store, &key, &tx).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        feed
    }

    /// Total stored messages across all conversations
    pub fn count(&self) -> usize {
        self.db.len()
    }
}

async fn push_snapshot(
    store: &MessageStore,
    key: &ConversationKey,
    tx: &FeedSender<Vec<Message>>,
) -> bool {
    match store.history(key) {
        Ok(snapshot) => tx.send(snapshot).await,
        Err(e) => {
            // Keep the feed alive; the next change re-queries
            warn!("Snapshot query failed for {}: {}", key, e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    fn store(dir: &TempDir) -> MessageStore {
        MessageStore::new(dir.path(), 64).unwrap()
    }

    async fn next(feed: &mut MessageFeed) -> Vec<Message> {
        timeout(Duration::from_secs(2), feed.recv())
            .await
            .expect("feed timed out")
            .expect("feed closed")
    }

    #[tokio::test]
    async fn test_append_requires_content() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let err = store.append(&key, "u1", None, None).await.unwrap_err();
        assert!(matches!(err, BoardError::EmptyMessage));
        let err = store.append(&key, "u1", Some("   "), Some("")).await.unwrap_err();
        assert!(matches!(err, BoardError::EmptyMessage));
        assert_eq!(store.history(&key).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_history_is_totally_ordered_across_senders() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        store.append(&key, "u1", Some("first"), None).await.unwrap();
        store.append(&key, "u2", Some("second"), None).await.unwrap();
        store.append(&key, "u1", Some("third"), None).await.unwrap();

        let history = store.history(&key).unwrap();
        let texts: Vec<_> = history.iter().filter_map(|m| m.text.as_deref()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        // Store-assigned order is strict even within one millisecond
        assert!(history.windows(2).all(|w| {
            (w[0].created_at.as_str(), w[0].seq) < (w[1].created_at.as_str(), w[1].seq)
        }));
    }

    #[tokio::test]
    async fn test_streams_are_isolated_per_conversation() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ab = ConversationKey::resolve("a", "b").unwrap();
        let ac = ConversationKey::resolve("a", "c").unwrap();

        store.append(&ab, "a", Some("to b"), None).await.unwrap();
        store.append(&ac, "a", Some("to c"), None).await.unwrap();

        assert_eq!(store.history(&ab).unwrap().len(), 1);
        assert_eq!(store.history(&ac).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_subscribe_sees_appended_message_last() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        store.append(&key, "u1", Some("older"), None).await.unwrap();
        store.append(&key, "u1", Some("hello"), None).await.unwrap();

        let mut feed = store.subscribe(&key);
        let snapshot = next(&mut feed).await;
        let last = snapshot.last().unwrap();
        assert_eq!(last.text.as_deref(), Some("hello"));
        assert_eq!(last.sender_id, "u1");
    }

    #[tokio::test]
    async fn test_live_feed_republishes_full_snapshot_on_append() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let mut feed = store.subscribe(&key);
        assert!(next(&mut feed).await.is_empty());

        store.append(&key, "u2", Some("ping"), None).await.unwrap();
        let snapshot = next(&mut feed).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text.as_deref(), Some("ping"));

        store.append(&key, "u1", Some("pong"), None).await.unwrap();
        let snapshot = next(&mut feed).await;
        // Full sequence, not a delta
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_feed_ignores_other_conversations() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ab = ConversationKey::resolve("a", "b").unwrap();
        let ac = ConversationKey::resolve("a", "c").unwrap();

        let mut feed = store.subscribe(&ab);
        assert!(next(&mut feed).await.is_empty());

        store.append(&ac, "a", Some("elsewhere"), None).await.unwrap();
        store.append(&ab, "b", Some("here"), None).await.unwrap();

        let snapshot = next(&mut feed).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].text.as_deref(), Some("here"));
    }

    #[tokio::test]
    async fn test_close_before_first_snapshot_delivers_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();
        store.append(&key, "u1", Some("already there"), None).await.unwrap();

        let mut feed = store.subscribe(&key);
        feed.close();
        assert_eq!(feed.recv().await, None);
        // Closing again is fine
        feed.close();
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let key = ConversationKey::resolve("u1", "u2").unwrap();
        {
            let store = store(&dir);
            store.append(&key, "u1", Some("persisted"), None).await.unwrap();
        }
        let store = store(&dir);
        let history = store.history(&key).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text.as_deref(), Some("persisted"));
    }
}
