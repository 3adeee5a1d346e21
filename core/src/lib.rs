/// Foundlink - Real-Time Messaging Core for the Campus Lost&Found Board
///
/// Deterministic conversation identity, an append-only message stream with
/// live full-snapshot subscriptions, a denormalized conversation-summary
/// projection, and an upload-then-publish attachment pipeline — the moving
/// parts behind the board's reporter/claimant chat.

pub mod error;
pub mod config;
pub mod conversation;
pub mod types;
pub mod feed;
pub mod message_store;
pub mod summary_store;
pub mod attachment_store;
pub mod chat_service;
pub mod session;
pub mod api;

pub use attachment_store::AttachmentStore;
pub use chat_service::ChatService;
pub use config::Config;
pub use conversation::ConversationKey;
pub use error::{BoardError, Result};
pub use feed::Feed;
pub use message_store::{MessageFeed, MessageStore};
pub use session::ChatSession;
pub use summary_store::{SummaryFeed, SummaryStore};
pub use types::{ConversationSummary, Message, UserProfile};
