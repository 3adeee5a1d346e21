/// Client reactive state for one messaging view.
///
/// A `ChatSession` owns the view-side half of the subscription lifecycle: at
/// most one live message feed at a time (the previous one is closed before a
/// new conversation is opened, so a stale feed can never deliver into the
/// wrong view), the transient draft buffer, the pending-attachment flag, and
/// the scroll-to-latest signal. None of this state is persisted.
use crate::chat_service::{ChatService, PendingAttachment};
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use crate::message_store::MessageFeed;
use crate::types::{Message, UserProfile};
use tracing::debug;

pub struct ChatSession {
    service: ChatService,
    /// The authenticated user, as handed over by the identity provider
    user: UserProfile,
    peer_id: Option<String>,
    current: Option<ConversationKey>,
    feed: Option<MessageFeed>,
    messages: Vec<Message>,
    draft: String,
    pending_attachment: Option<PendingAttachment>,
    scroll_generation: u64,
}

impl ChatSession {
    pub fn new(service: ChatService, user: UserProfile) -> Self {
        Self {
            service,
            user,
            peer_id: None,
            current: None,
            feed: None,
            messages: Vec::new(),
            draft: String::new(),
            pending_attachment: None,
            scroll_generation: 0,
        }
    }

    /// Open the conversation with `peer_id`, tearing down any prior feed
    /// first. Reopening the already-open conversation is a no-op.
    pub fn open(&mut self, peer_id: &str) -> Result<()> {
        let key = ConversationKey::resolve(&self.user.id, peer_id)?;
        if self.current.as_ref() == Some(&key) {
            return Ok(());
        }
        self.teardown();
        debug!("Opening conversation {}", key);
        self.feed = Some(self.service.subscribe(&key));
        self.current = Some(key);
        self.peer_id = Some(peer_id.to_string());
        self.messages.clear();
        Ok(())
    }

    /// Await the next snapshot from the live feed and apply it. Returns
    /// `None` once the feed is closed or no conversation is open.
    pub async fn next_update(&mut self) -> Option<&[Message]> {
        let feed = self.feed.as_mut()?;
        let snapshot = feed.recv().await?;
        self.apply(snapshot);
        Some(&self.messages)
    }

    /// Apply one full snapshot wholesale. Duplicate deliveries of the same
    /// sequence leave the state untouched; a changed sequence bumps the
    /// scroll signal exactly once.
    pub fn apply(&mut self, snapshot: Vec<Message>) {
        if snapshot != self.messages {
            self.messages = snapshot;
            self.scroll_generation += 1;
        }
    }

    /// Send the current draft and/or pending attachment. On success the
    /// draft is cleared; on failure the typed text is retained so the user
    /// does not lose it, while the pending-attachment flag is cleared either
    /// way.
    pub async fn send(&mut self) -> Result<Message> {
        let peer = self
            .peer_id
            .clone()
            .ok_or_else(|| BoardError::Subscription("No open conversation".to_string()))?;
        let attachment = self.pending_attachment.take();
        let text = self.draft.trim();
        let text = (!text.is_empty()).then_some(text);

        let result = self
            .service
            .send(
                &self.user.id,
                &peer,
                text,
                attachment.as_ref().map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
            )
            .await;

        if result.is_ok() {
            self.draft.clear();
        }
        result
    }

    /// Close the view. Idempotent; late snapshots from the old feed are
    /// dropped, not applied.
    pub fn close(&mut self) {
        self.teardown();
        self.current = None;
        self.peer_id = None;
        self.messages.clear();
    }

    fn teardown(&mut self) {
        if let Some(mut feed) = self.feed.take() {
            feed.close();
        }
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn attach(&mut self, file_name: impl Into<String>, bytes: Vec<u8>) {
        self.pending_attachment = Some((file_name.into(), bytes));
    }

    pub fn has_pending_attachment(&self) -> bool {
        self.pending_attachment.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_conversation(&self) -> Option<&ConversationKey> {
        self.current.as_ref()
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    /// Bumped once per applied snapshot that changed the view; the UI
    /// scrolls to the latest message when it observes a new value.
    pub fn scroll_generation(&self) -> u64 {
        self.scroll_generation
    }
}
