/// Shared document types for the messaging core
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use serde::{Deserialize, Serialize};

/// Preview text used for attachment-only messages
pub const ATTACHMENT_PREVIEW: &str = "[photo]";

/// Current user as handed over by the identity provider.
/// `None` at the boundary means unauthenticated; the messaging core is never
/// entered in that state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
}

/// One immutable chat message. Created once by the store, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned id
    pub id: String,
    pub conversation_key: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    /// RFC3339, assigned from the store clock — never the sender's clock
    pub created_at: String,
    /// Store-global monotonic counter; total order is (created_at, seq)
    pub seq: u64,
}

impl Message {
    /// Boundary validation for documents read back from the store. A record
    /// that fails this is rejected, not propagated with undefined fields.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.conversation_key.is_empty() || self.sender_id.is_empty() {
            return Err(BoardError::Storage(format!(
                "malformed message document (id={:?})",
                self.id
            )));
        }
        let has_text = self.text.as_deref().is_some_and(|t| !t.is_empty());
        let has_attachment = self
            .attachment_url
            .as_deref()
            .is_some_and(|u| !u.is_empty());
        if !has_text && !has_attachment {
            return Err(BoardError::EmptyMessage);
        }
        Ok(())
    }

    /// Conversation-list preview for this message, truncated to `max_len`
    /// characters. Attachment-only messages preview as a placeholder.
    pub fn preview(&self, max_len: usize) -> String {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text.chars().take(max_len).collect(),
            _ => ATTACHMENT_PREVIEW.to_string(),
        }
    }
}

/// Denormalized summary of one conversation (for list rendering).
/// One per conversation key; merged, not replaced, on every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_key: String,
    /// Fixed at first creation, stored sorted, never changed afterwards
    pub participants: (String, String),
    pub last_preview: String,
    pub last_sender_id: String,
    /// RFC3339, monotonically non-decreasing across touches
    pub last_activity_at: String,
    /// Tiebreaker for equal timestamps; strictly increasing per touch
    pub last_seq: u64,
}

impl ConversationSummary {
    pub fn involves(&self, user_id: &str) -> bool {
        self.participants.0 == user_id || self.participants.1 == user_id
    }
}

/// Change notifications fanned out to live feeds
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// The message stream for one conversation grew
    MessagesChanged { conversation_key: ConversationKey },
    /// Some conversation summary was created or updated
    SummariesChanged,
}
