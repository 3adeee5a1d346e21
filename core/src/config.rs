/// Configuration management
use crate::error::{BoardError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8600;
const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_PREVIEW_LEN: usize = 80;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Board API listening address (local clients only)
    pub listen_addr: SocketAddr,

    /// Data directory for the message/summary/attachment stores
    /// (defaults to `.foundlink`)
    pub data_dir: Option<PathBuf>,

    /// Hard cap on a single attachment payload
    pub max_attachment_bytes: usize,

    /// Max characters of message text kept in a conversation-list preview
    pub preview_len: usize,

    /// Capacity of the change-notification channel behind live feeds
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{}", DEFAULT_PORT).parse().unwrap(),
            data_dir: None,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            preview_len: DEFAULT_PREVIEW_LEN,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut port = DEFAULT_PORT;
        let mut data_dir: Option<PathBuf> = None;
        let mut max_attachment_bytes = DEFAULT_MAX_ATTACHMENT_BYTES;

        let mut i = 1;
        let mut saw_port = false;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        BoardError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--max-attachment-mb" => {
                    let mb = args.get(i + 1).ok_or_else(|| {
                        BoardError::Config(
                            "--max-attachment-mb requires a number argument".to_string(),
                        )
                    })?;
                    let mb: usize = mb.parse().map_err(|_| {
                        BoardError::Config("--max-attachment-mb must be a number".to_string())
                    })?;
                    max_attachment_bytes = mb * 1024 * 1024;
                    i += 2;
                }
                other if !saw_port => {
                    port = other.parse::<u16>().map_err(|_| {
                        BoardError::Config(format!(
                            "Usage: {} [port] [--data-dir <path>] [--max-attachment-mb <n>]",
                            args.first().map(String::as_str).unwrap_or("board")
                        ))
                    })?;
                    saw_port = true;
                    i += 1;
                }
                other => {
                    return Err(BoardError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Some(p) = std::env::var("FOUNDLINK_PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
        {
            port = p;
        }
        if let Ok(dir) = std::env::var("FOUNDLINK_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }

        let listen_addr = format!("127.0.0.1:{}", port)
            .parse()
            .map_err(|_| BoardError::Config("Invalid listen address".to_string()))?;

        Ok(Self {
            listen_addr,
            data_dir,
            max_attachment_bytes,
            ..Default::default()
        })
    }

    /// Data directory with the default applied
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".foundlink"))
    }
}
