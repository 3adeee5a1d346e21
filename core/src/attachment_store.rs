/// Attachment storage: upload-then-publish blob pipeline.
///
/// Binary payloads live in sled under path-addressed keys
/// `att/{conversation_key}/{millis}-{seq}-{urlencoded_name}`; the key doubles
/// as the tail of the retrieval URL served by the HTTP layer. Every upload
/// gets a fresh time-qualified path, so a manual retry after a failure never
/// collides with an earlier attempt. An upload must complete before the
/// message referencing its URL is appended — the caller enforces that order.
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use chrono::Utc;
use std::path::Path;
use tracing::{debug, info};

/// URL prefix under which the HTTP layer serves stored blobs
pub const ATTACHMENT_URL_PREFIX: &str = "/api/attachments/";

#[derive(Clone)]
pub struct AttachmentStore {
    db: sled::Db,
    max_bytes: usize,
}

impl AttachmentStore {
    /// Create attachment store
    pub fn new(data_dir: &Path, max_bytes: usize) -> Result<Self> {
        let db = sled::open(data_dir.join("attachments.db"))
            .map_err(|e| BoardError::Storage(format!("Failed to open attachments DB: {}", e)))?;
        info!("Attachment store initialized (max {} bytes)", max_bytes);
        Ok(Self { db, max_bytes })
    }

    /// Store a payload scoped to a conversation and return its durable
    /// retrieval URL. No automatic retry; failures leave no message behind.
    pub async fn upload(
        &self,
        key: &ConversationKey,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String> {
        if bytes.is_empty() {
            return Err(BoardError::Upload("Empty attachment payload".to_string()));
        }
        if bytes.len() > self.max_bytes {
            return Err(BoardError::PayloadTooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let seq = self
            .db
            .generate_id()
            .map_err(|e| BoardError::Upload(format!("Failed to assign upload id: {}", e)))?;
        let path = format!(
            "att/{}/{}-{}-{}",
            key,
            Utc::now().timestamp_millis(),
            seq,
            urlencoding::encode(file_name)
        );

        debug!("Storing attachment at {}: {} bytes", path, bytes.len());
        self.db
            .insert(path.as_bytes(), bytes)
            .map_err(|e| BoardError::Upload(format!("Failed to store attachment: {}", e)))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| BoardError::Upload(format!("Failed to flush attachment store: {}", e)))?;

        Ok(format!("{}{}", ATTACHMENT_URL_PREFIX, path))
    }

    /// Retrieve a stored payload by its path (the URL tail)
    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.db.get(path.as_bytes()) {
            Ok(Some(value)) => Ok(Some(value.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(BoardError::Storage(format!(
                "Failed to fetch attachment: {}",
                e
            ))),
        }
    }

    /// List stored attachment paths for one conversation
    pub fn list(&self, key: &ConversationKey) -> Result<Vec<String>> {
        let prefix = format!("att/{}/", key);
        let mut paths = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (k, _) = entry
                .map_err(|e| BoardError::Storage(format!("Attachment scan failed: {}", e)))?;
            if let Ok(path) = String::from_utf8(k.to_vec()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> AttachmentStore {
        AttachmentStore::new(dir.path(), 1024).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let url = store.upload(&key, b"jpeg bytes", "photo.jpg").await.unwrap();
        assert!(url.starts_with(ATTACHMENT_URL_PREFIX));

        let path = url.trim_start_matches(ATTACHMENT_URL_PREFIX);
        assert_eq!(store.get(path).unwrap(), Some(b"jpeg bytes".to_vec()));
        assert_eq!(store.get("att/u1_u2/0-0-missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_enforces_size_cap() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let big = vec![0u8; 2048];
        let err = store.upload(&key, &big, "huge.bin").await.unwrap_err();
        assert!(matches!(
            err,
            BoardError::PayloadTooLarge { size: 2048, max: 1024 }
        ));
        assert!(store.list(&key).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retried_uploads_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let first = store.upload(&key, b"take one", "photo.jpg").await.unwrap();
        let second = store.upload(&key, b"take two", "photo.jpg").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.list(&key).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_names_are_url_encoded() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ConversationKey::resolve("u1", "u2").unwrap();

        let url = store
            .upload(&key, b"x", "my photo (1).jpg")
            .await
            .unwrap();
        assert!(!url.contains(' '));
        assert!(url.contains("my%20photo"));
    }
}
