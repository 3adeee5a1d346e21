/// Conversation summary projection and the per-user conversation list.
///
/// One mutable document per conversation key, updated by merge after every
/// successful message append: participants are write-once, the `last_*`
/// fields are last-writer-wins with a monotonic guard so a stale touch can
/// never roll the record backwards. The projection is eventually consistent
/// with the message stream — briefly stale at worst, self-correcting on the
/// next message.
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use crate::feed::{self, Feed, FeedSender};
use crate::types::{BoardEvent, ConversationSummary};
use chrono::{SecondsFormat, Utc};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const FEED_BUFFER: usize = 16;

/// Full-snapshot live feed over one user's conversation list
pub type SummaryFeed = Feed<Vec<ConversationSummary>>;

#[derive(Clone)]
pub struct SummaryStore {
    db: sled::Db,
    events: broadcast::Sender<BoardEvent>,
}

impl SummaryStore {
    /// Create summary store
    pub fn new(data_dir: &Path, event_capacity: usize) -> Result<Self> {
        let db = sled::open(data_dir.join("summaries.db"))
            .map_err(|e| BoardError::Storage(format!("Failed to open summaries DB: {}", e)))?;
        let (events, _) = broadcast::channel(event_capacity);
        Ok(Self { db, events })
    }

    /// Upsert the summary for one conversation: create-if-absent,
    /// merge-if-present. Must only be called after the corresponding message
    /// append succeeded; the caller isolates failures from the send path.
    pub async fn touch(
        &self,
        key: &ConversationKey,
        participants: (&str, &str),
        last_sender_id: &str,
        preview: &str,
    ) -> Result<ConversationSummary> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let seq = self
            .db
            .generate_id()
            .map_err(|e| BoardError::Storage(format!("Failed to assign touch seq: {}", e)))?;

        let db_key = format!("sum/{}", key);
        let existing = self
            .db
            .get(db_key.as_bytes())
            .map_err(|e| BoardError::Storage(format!("Failed to read summary: {}", e)))?;

        let summary = match existing {
            Some(value) => {
                let prev: ConversationSummary =
                    serde_json::from_slice(&value).map_err(BoardError::Serialization)?;
                // Participants are write-once; a touch never changes them.
                // The last_* fields only move forward.
                if (now.as_str(), seq) > (prev.last_activity_at.as_str(), prev.last_seq) {
                    ConversationSummary {
                        conversation_key: prev.conversation_key,
                        participants: prev.participants,
                        last_preview: preview.to_string(),
                        last_sender_id: last_sender_id.to_string(),
                        last_activity_at: now,
                        last_seq: seq,
                    }
                } else {
                    debug!("Stale touch for {} ignored", key);
                    prev
                }
            }
            None => {
                let (a, b) = participants;
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                ConversationSummary {
                    conversation_key: key.as_str().to_string(),
                    participants: (lo.to_string(), hi.to_string()),
                    last_preview: preview.to_string(),
                    last_sender_id: last_sender_id.to_string(),
                    last_activity_at: now,
                    last_seq: seq,
                }
            }
        };

        let value = serde_json::to_vec(&summary).map_err(BoardError::Serialization)?;
        self.db
            .insert(db_key.as_bytes(), value)
            .map_err(|e| BoardError::Storage(format!("Failed to save summary: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| BoardError::Storage(format!("Failed to flush summaries DB: {}", e)))?;

        let _ = self.events.send(BoardEvent::SummariesChanged);
        Ok(summary)
    }

    /// Summary for one conversation, if it exists yet
    pub fn get(&self, key: &ConversationKey) -> Result<Option<ConversationSummary>> {
        let db_key = format!("sum/{}", key);
        match self
            .db
            .get(db_key.as_bytes())
            .map_err(|e| BoardError::Storage(format!("Failed to read summary: {}", e)))?
        {
            Some(value) => {
                let summary =
                    serde_json::from_slice(&value).map_err(BoardError::Serialization)?;
                Ok(Some(summary))
            }
            None => Ok(None),
        }
    }

    /// All conversations involving `user_id`, most recent activity first
    pub fn list_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();
        for entry in self.db.scan_prefix(b"sum/") {
            let (_, value) =
                entry.map_err(|e| BoardError::Storage(format!("Summary scan failed: {}", e)))?;
            let summary: ConversationSummary =
                serde_json::from_slice(&value).map_err(BoardError::Serialization)?;
            if summary.involves(user_id) {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|x, y| {
            (y.last_activity_at.as_str(), y.last_seq).cmp(&(x.last_activity_at.as_str(), x.last_seq))
        });
        Ok(summaries)
    }

    /// Establish the live conversation-list feed for one user. Exactly one of
    /// these is expected per authenticated session; close it on logout or
    /// view exit.
    pub fn subscribe_all(&self, user_id: &str) -> SummaryFeed {
        let (tx, feed) = feed::channel(FEED_BUFFER);
        let mut events = self.events.subscribe();
        let store = self.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            if !push_list(&store, &user_id, &tx).await {
                return;
            }
            loop {
                match events.recv().await {
                    Ok(BoardEvent::SummariesChanged) => {
                        if !push_list(&store, &user_id, &tx).await {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Summary feed for {} lagged {} events, resyncing", user_id, n);
                        if !push_list(&store, &user_id, &tx).await {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        feed
    }

    /// Total summary records (== total conversations)
    pub fn count(&self) -> usize {
        self.db.len()
    }
}

async fn push_list(
    store: &SummaryStore,
    user_id: &str,
    tx: &FeedSender<Vec<ConversationSummary>>,
) -> bool {
    match store.list_for(user_id) {
        Ok(list) => tx.send(list).await,
        Err(e) => {
            warn!("Conversation list query failed for {}: {}", user_id, e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    fn store(dir: &TempDir) -> SummaryStore {
        SummaryStore::new(dir.path(), 64).unwrap()
    }

    #[tokio::test]
    async fn test_touch_creates_then_merges() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let first = store.touch(&key, ("u1", "u2"), "u1", "hi there").await.unwrap();
        let second = store.touch(&key, ("u2", "u1"), "u2", "hello back").await.unwrap();

        // One record, not two
        assert_eq!(store.count(), 1);
        let merged = store.get(&key).unwrap().unwrap();
        assert_eq!(merged.last_sender_id, "u2");
        assert_eq!(merged.last_preview, "hello back");
        // Participants fixed at creation
        assert_eq!(merged.participants, first.participants);
        // Activity moves strictly forward across the two touches
        assert!(second.last_seq > first.last_seq);
        assert!(second.last_activity_at >= first.last_activity_at);
    }

    #[tokio::test]
    async fn test_stale_touch_never_regresses() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        store.touch(&key, ("u1", "u2"), "u1", "newest").await.unwrap();
        let current = store.get(&key).unwrap().unwrap();

        // Force a stale record on disk check: a touch with an older clock is
        // simulated by comparing against a future-dated existing record.
        let mut future = current.clone();
        future.last_activity_at = "2999-01-01T00:00:00.000000000Z".to_string();
        future.last_seq = u64::MAX;
        let db_key = format!("sum/{}", key);
        store
            .db
            .insert(db_key.as_bytes(), serde_json::to_vec(&future).unwrap())
            .unwrap();

        let merged = store.touch(&key, ("u1", "u2"), "u2", "late").await.unwrap();
        assert_eq!(merged.last_preview, "newest");
        assert_eq!(merged.last_sender_id, "u1");
        assert_eq!(merged.last_activity_at, future.last_activity_at);
    }

    #[tokio::test]
    async fn test_list_for_filters_and_orders_by_recency() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ab = ConversationKey::resolve("a", "b").unwrap();
        let ac = ConversationKey::resolve("a", "c").unwrap();
        let bc = ConversationKey::resolve("b", "c").unwrap();

        store.touch(&ab, ("a", "b"), "a", "oldest").await.unwrap();
        store.touch(&bc, ("b", "c"), "b", "not a's").await.unwrap();
        store.touch(&ac, ("a", "c"), "c", "newest").await.unwrap();

        let list = store.list_for("a").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_key, ac.as_str());
        assert_eq!(list[1].conversation_key, ab.as_str());

        assert_eq!(store.list_for("nobody").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_all_republishes_on_touch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let ab = ConversationKey::resolve("a", "b").unwrap();

        let mut feed = store.subscribe_all("a");
        let initial = timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(initial.is_empty());

        store.touch(&ab, ("a", "b"), "b", "ping").await.unwrap();
        let list = timeout(Duration::from_secs(2), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_preview, "ping");
    }
}
