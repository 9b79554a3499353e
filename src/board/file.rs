//! File-backed board adapter.
//!
//! Reads `items.json` and `users.json` from a data directory and appends
//! executed writes to `outbox.jsonl`, one JSON object per line. This is
//! what the CLI drives for local dry-runs and what most integration tests
//! exercise the full pipeline against.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Result, WriteError};

use super::{BoardItem, BoardReader, BoardUser, BoardWriter, WriteOp};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ItemRecord {
    pub board_id: String,
    #[serde(flatten)]
    pub item: BoardItem,
}

#[derive(Debug, Serialize)]
struct OutboxLine<'a> {
    pub at: String,
    #[serde(flatten)]
    pub op: &'a WriteOp,
}

#[derive(Debug, Clone)]
pub struct FileBoard {
    data_dir: PathBuf,
}

impl FileBoard {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("outbox.jsonl")
    }

    async fn read_items(&self) -> Result<Vec<ItemRecord>> {
        let path = self.data_dir.join("items.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl BoardReader for FileBoard {
    async fn fetch_item(&self, board_id: &str, item_id: &str) -> Result<Option<BoardItem>> {
        let items = self.read_items().await?;
        Ok(items
            .into_iter()
            .find(|r| r.board_id == board_id && r.item.id == item_id)
            .map(|r| r.item))
    }

    async fn list_users(&self) -> Result<Vec<BoardUser>> {
        let path = self.data_dir.join("users.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl BoardWriter for FileBoard {
    async fn execute(&self, op: &WriteOp) -> std::result::Result<serde_json::Value, WriteError> {
        let line = OutboxLine {
            at: Utc::now().to_rfc3339(),
            op,
        };
        let mut encoded =
            serde_json::to_string(&line).map_err(|e| WriteError::Network(e.to_string()))?;
        encoded.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.outbox_path())
            .await
            .map_err(|e| WriteError::Network(e.to_string()))?;
        file.write_all(encoded.as_bytes())
            .await
            .map_err(|e| WriteError::Network(e.to_string()))?;

        debug!(kind = op.kind(), item_id = op.item_id(), "Write recorded to outbox");
        Ok(serde_json::json!({ "recorded": true }))
    }
}
