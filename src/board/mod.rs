//! Seams to the external work-management platform.
//!
//! The platform itself (HTTP transport, auth, GraphQL shape) is an
//! external collaborator; this crate only defines the read/write traits
//! the pipeline and queue depend on, plus a file-backed implementation
//! used by the CLI and in tests.

mod file;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WriteError};

pub use file::FileBoard;

/// One external item (lead) with its raw, untyped column values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub column_values: HashMap<String, serde_json::Value>,
}

/// Entry in the platform's user directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardUser {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// One outbound mutation against the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    AssignPerson {
        board_id: String,
        item_id: String,
        column_id: String,
        person_id: i64,
    },
    SetStatus {
        board_id: String,
        item_id: String,
        column_id: String,
        label: String,
    },
    SetText {
        board_id: String,
        item_id: String,
        column_id: String,
        text: String,
    },
}

impl WriteOp {
    pub fn item_id(&self) -> &str {
        match self {
            Self::AssignPerson { item_id, .. }
            | Self::SetStatus { item_id, .. }
            | Self::SetText { item_id, .. } => item_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AssignPerson { .. } => "assign_person",
            Self::SetStatus { .. } => "set_status",
            Self::SetText { .. } => "set_text",
        }
    }
}

/// Thin read client over the platform.
#[async_trait]
pub trait BoardReader: Send + Sync {
    /// Fetch one item; `None` when the board has no such item.
    async fn fetch_item(&self, board_id: &str, item_id: &str) -> Result<Option<BoardItem>>;

    /// The platform's user directory.
    async fn list_users(&self) -> Result<Vec<BoardUser>>;
}

/// Executor for one write attempt. Retry and rate limiting live in the
/// write queue, not here — implementations perform a single call and
/// classify its failure.
#[async_trait]
pub trait BoardWriter: Send + Sync {
    async fn execute(&self, op: &WriteOp) -> std::result::Result<serde_json::Value, WriteError>;
}
