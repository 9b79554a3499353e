//! Routing proposals: the idempotent decision record and its lifecycle.

mod store;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RouterError;
use crate::rules::{RoutingRule, RuleAction, RuleExplain};
use crate::schema::FieldValue;
use crate::scoring::AgentScore;

pub use store::{GuardOutcome, InsertOutcome, ProposalStore};

fn store_err(msg: impl fmt::Display) -> RouterError {
    RouterError::Store(msg.to_string())
}

fn store_err_with<E: fmt::Display>(context: &str, err: E) -> RouterError {
    RouterError::Store(format!("{}: {}", context, err))
}

/// Lifecycle of one routing proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Rejected,
    Overridden,
    Applied,
}

impl ProposalStatus {
    pub fn allowed_transitions(&self) -> &'static [ProposalStatus] {
        use ProposalStatus::*;
        match self {
            // Applied is reachable directly from Proposed in AUTO mode.
            Proposed => &[Approved, Rejected, Overridden, Applied],
            Approved => &[Applied],
            Overridden => &[Applied],
            Rejected => &[],
            Applied => &[],
        }
    }

    pub fn can_transition_to(&self, target: ProposalStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Rejected | ProposalStatus::Applied)
    }

    /// Statuses an apply may proceed from.
    pub fn can_apply(&self) -> bool {
        self.can_transition_to(ProposalStatus::Applied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "PROPOSED",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Overridden => "OVERRIDDEN",
            Self::Applied => "APPLIED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROPOSED" => Some(Self::Proposed),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "OVERRIDDEN" => Some(Self::Overridden),
            "APPLIED" => Some(Self::Applied),
            _ => None,
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why-this-agent trace persisted with every proposal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Explainability {
    pub rules: Vec<RuleExplain>,
    pub ranking: Vec<AgentScore>,
}

/// One routing decision instance for one external item, unique per
/// idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingProposal {
    pub id: String,
    pub idempotency_key: String,
    pub board_id: String,
    pub item_id: String,
    pub normalized_values: BTreeMap<String, FieldValue>,
    pub selected_rule: Option<RoutingRule>,
    pub action: RuleAction,
    /// Human-entered assignee decided at propose time: the rule's direct
    /// identifier, or the top-ranked agent of the rule's pool.
    pub assignee: String,
    pub explains: Explainability,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl RoutingProposal {
    pub fn new(
        idempotency_key: String,
        board_id: String,
        item_id: String,
        normalized_values: BTreeMap<String, FieldValue>,
        selected_rule: RoutingRule,
        assignee: String,
        explains: Explainability,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            idempotency_key,
            board_id,
            item_id,
            normalized_values,
            action: selected_rule.then.clone(),
            selected_rule: Some(selected_rule),
            assignee,
            explains,
            status: ProposalStatus::Proposed,
            created_at: Utc::now(),
            decided_at: None,
        }
    }
}

/// Deterministic key from item identity plus every configuration version
/// in effect. Stable contract — do not reorder the segments.
pub fn idempotency_key(
    board_id: &str,
    item_id: &str,
    schema_version: u32,
    mapping_version: u32,
    rules_version: u32,
) -> String {
    format!(
        "{board_id}::{item_id}::schema:{schema_version}::mapping:{mapping_version}::rules:{rules_version}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Approved));
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Rejected));
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Overridden));
        assert!(ProposalStatus::Proposed.can_transition_to(ProposalStatus::Applied));
        assert!(ProposalStatus::Approved.can_transition_to(ProposalStatus::Applied));
        assert!(ProposalStatus::Overridden.can_transition_to(ProposalStatus::Applied));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ProposalStatus::Applied.can_transition_to(ProposalStatus::Approved));
        assert!(!ProposalStatus::Rejected.can_transition_to(ProposalStatus::Applied));
        assert!(!ProposalStatus::Approved.can_transition_to(ProposalStatus::Rejected));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProposalStatus::Rejected.is_terminal());
        assert!(ProposalStatus::Applied.is_terminal());
        assert!(!ProposalStatus::Proposed.is_terminal());
        assert!(!ProposalStatus::Approved.is_terminal());
        assert!(!ProposalStatus::Overridden.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            ProposalStatus::Proposed,
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
            ProposalStatus::Overridden,
            ProposalStatus::Applied,
        ] {
            assert_eq!(ProposalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProposalStatus::parse("DRAFT"), None);
    }

    #[test]
    fn test_idempotency_key_format() {
        assert_eq!(
            idempotency_key("b1", "item-9", 2, 5, 11),
            "b1::item-9::schema:2::mapping:5::rules:11"
        );
    }
}
