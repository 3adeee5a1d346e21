/// Chat service — the send orchestration and subscription façade.
///
/// Owns the three stores and fixes the dual-write order: attachment upload
/// first (hard prerequisite), then the message append (source of truth), then
/// the summary touch. A failed upload or append aborts the send and reaches
/// the caller; a failed touch only leaves the summary stale, which the next
/// message corrects, so it is logged and never unwinds the send.
use crate::attachment_store::AttachmentStore;
use crate::config::Config;
use crate::conversation::ConversationKey;
use crate::error::Result;
use crate::message_store::{MessageFeed, MessageStore};
use crate::summary_store::{SummaryFeed, SummaryStore};
use crate::types::{ConversationSummary, Message};
use tracing::{info, warn};

/// An attachment payload pending upload: (file name, bytes)
pub type PendingAttachment = (String, Vec<u8>);

#[derive(Clone)]
pub struct ChatService {
    messages: MessageStore,
    summaries: SummaryStore,
    attachments: AttachmentStore,
    preview_len: usize,
}

impl ChatService {
    /// Open all stores under the configured data directory
    pub fn open(config: &Config) -> Result<Self> {
        let data_dir = config.resolved_data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let messages = MessageStore::new(&data_dir, config.event_capacity)?;
        let summaries = SummaryStore::new(&data_dir, config.event_capacity)?;
        let attachments = AttachmentStore::new(&data_dir, config.max_attachment_bytes)?;
        info!("Chat service opened at {:?}", data_dir);

        Ok(Self {
            messages,
            summaries,
            attachments,
            preview_len: config.preview_len,
        })
    }

    /// Key for the conversation between two users. The pair typically comes
    /// from an item listing: (reporter id, current user id).
    pub fn conversation_between(&self, id_a: &str, id_b: &str) -> Result<ConversationKey> {
        ConversationKey::resolve(id_a, id_b)
    }

    /// Send a message from `from` to `to`: upload → append → touch.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        text: Option<&str>,
        attachment: Option<(&str, &[u8])>,
    ) -> Result<Message> {
        let key = ConversationKey::resolve(from, to)?;

        // The upload must resolve its URL before the referencing message
        // exists; a message pointing at a never-uploaded blob is unrecoverable.
        let attachment_url = match attachment {
            Some((file_name, bytes)) => {
                Some(self.attachments.upload(&key, bytes, file_name).await?)
            }
            None => None,
        };

        let msg = self
            .messages
            .append(&key, from, text, attachment_url.as_deref())
            .await?;

        // Summary staleness self-corrects on the next message; the append
        // above already persisted the authoritative content.
        let preview = msg.preview(self.preview_len);
        if let Err(e) = self.summaries.touch(&key, (from, to), from, &preview).await {
            warn!(
                "Summary touch failed for {} after message {}: {}",
                key, msg.id, e
            );
        }

        Ok(msg)
    }

    /// Full ordered history for one conversation
    pub fn history(&self, key: &ConversationKey) -> Result<Vec<Message>> {
        self.messages.history(key)
    }

    /// Live feed over one conversation's messages
    pub fn subscribe(&self, key: &ConversationKey) -> MessageFeed {
        self.messages.subscribe(key)
    }

    /// One-shot conversation list for a user, most recent first
    pub fn conversations_for(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.summaries.list_for(user_id)
    }

    /// Live feed over a user's conversation list
    pub fn subscribe_all(&self, user_id: &str) -> SummaryFeed {
        self.summaries.subscribe_all(user_id)
    }

    /// Serve a stored attachment by its URL path tail
    pub fn open_attachment(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.attachments.get(path)
    }

    /// (message count, conversation count)
    pub fn stats(&self) -> (usize, usize) {
        (self.messages.count(), self.summaries.count())
    }
}
