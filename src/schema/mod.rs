//! Admin-defined field schema and board mapping.
//!
//! The schema describes the typed internal fields the router reasons about;
//! the mapping locates each field on the external board and names the
//! columns decisions are written back to. Both are versioned external
//! inputs — the versions participate in proposal idempotency keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Entity a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEntity {
    Lead,
    Agent,
    Deal,
}

/// Declared type of an internal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Status,
    Date,
    Boolean,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Status => "status",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: String,
    pub label: String,
    pub entity: FieldEntity,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Versioned set of field definitions. Immutable once referenced by a
/// proposal; edits produce a new version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSchema {
    pub version: u32,
    pub fields: Vec<FieldDefinition>,
}

impl InternalSchema {
    pub fn field(&self, id: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Active fields of one entity, in declaration order.
    pub fn active_fields(&self, entity: FieldEntity) -> impl Iterator<Item = &FieldDefinition> {
        self.fields
            .iter()
            .filter(move |f| f.active && f.entity == entity)
    }
}

/// Location of one internal field on the external board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardColumnRef {
    pub board_id: String,
    pub column_id: String,
}

/// Columns a routing decision is written back to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WritebackTargets {
    pub assignee_column: Option<String>,
    pub status_column: Option<String>,
    pub reason_column: Option<String>,
}

/// Versioned field-to-column mapping plus writeback targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingConfig {
    pub version: u32,
    pub columns: HashMap<String, BoardColumnRef>,
    #[serde(default)]
    pub writeback: WritebackTargets,
}

impl FieldMappingConfig {
    /// Project an item's raw column values into a field-id keyed map.
    /// Fields mapped to other boards, or to columns absent from the item,
    /// simply do not appear — normalization treats them as missing.
    pub fn raw_values_for(
        &self,
        board_id: &str,
        column_values: &HashMap<String, serde_json::Value>,
    ) -> HashMap<String, serde_json::Value> {
        self.columns
            .iter()
            .filter(|(_, col)| col.board_id == board_id)
            .filter_map(|(field_id, col)| {
                column_values
                    .get(&col.column_id)
                    .map(|v| (field_id.clone(), v.clone()))
            })
            .collect()
    }
}

/// Typed internal primitive a raw column value normalizes to.
///
/// Dates are carried as their canonical RFC 3339 rendering; rule
/// comparisons treat them as strings, which keeps `eq` against
/// configuration values exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Status(String),
    Date(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// String view of text-like values (text, status, date).
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Status(s) | Self::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Bool(_) => "boolean",
            Self::Status(_) => "status",
            Self::Date(_) => "date",
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Text(s) | Self::Status(s) | Self::Date(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}
