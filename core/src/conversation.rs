/// Conversation identity — canonical key for an unordered pair of participants
use crate::error::{BoardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical conversation key: the two participant ids sorted
/// lexicographically and joined with `_`, so both sides of a chat derive the
/// same key without coordination. Derived, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Resolve the key for a pair of participants, in either order.
    ///
    /// Self-chat (`a == b`) is permitted and yields the degenerate key `a_a`.
    pub fn resolve(id_a: &str, id_b: &str) -> Result<Self> {
        let a = id_a.trim();
        let b = id_b.trim();
        if a.is_empty() {
            return Err(BoardError::InvalidIdentifier(id_a.to_string()));
        }
        if b.is_empty() {
            return Err(BoardError::InvalidIdentifier(id_b.to_string()));
        }
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{}_{}", lo, hi)))
    }

    /// Wrap an already-derived key arriving from outside (URL path, stored
    /// document). Only the non-empty invariant can be checked here.
    pub fn from_raw(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BoardError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
