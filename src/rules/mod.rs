//! Priority-ordered routing rule evaluation.
//!
//! Rules are admin-configured: a list of AND-ed conditions over normalized
//! field values plus an action. Evaluation walks every enabled rule even
//! after a match — the explain trace is a first-class output and must show
//! each rule's per-condition verdict. Only the first full match (lowest
//! priority number) selects the action.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::schema::FieldValue;

/// Condition operand, deserialized from loosely-typed JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<RuleValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

impl std::fmt::Display for CondOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field_id: String,
    pub op: CondOp,
    pub value: RuleValue,
}

/// What a matched rule routes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleAction {
    /// Score the named agent pool and pick the best fit.
    AssignAgentPool(String),
    /// Assign one specific agent (id, email, or exact name).
    AssignAgentId(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    /// Lower number wins.
    pub priority: i32,
    #[serde(default)]
    pub enabled: bool,
    pub when: Vec<Condition>,
    pub then: RuleAction,
}

/// Versioned rule collection; the version participates in idempotency keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u32,
    pub rules: Vec<RoutingRule>,
}

/// Per-condition verdict inside the explain trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionExplain {
    pub field_id: String,
    pub op: CondOp,
    pub expected: RuleValue,
    pub actual: FieldValue,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExplain {
    pub rule_id: String,
    pub name: String,
    pub priority: i32,
    pub matched: bool,
    pub conditions: Vec<ConditionExplain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub matched: bool,
    pub selected_rule: Option<RoutingRule>,
    pub explains: Vec<RuleExplain>,
}

/// Evaluate every enabled rule against the normalized values.
/// "No match" is a valid outcome, not an error.
pub fn evaluate(values: &BTreeMap<String, FieldValue>, rules: &[RoutingRule]) -> EvaluationOutcome {
    let mut enabled: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
    enabled.sort_by_key(|r| r.priority);

    let mut explains = Vec::with_capacity(enabled.len());
    let mut selected: Option<&RoutingRule> = None;

    for rule in enabled {
        let conditions: Vec<ConditionExplain> = rule
            .when
            .iter()
            .map(|cond| {
                let actual = values.get(&cond.field_id).cloned().unwrap_or(FieldValue::Null);
                let passed = condition_passes(&actual, cond.op, &cond.value);
                ConditionExplain {
                    field_id: cond.field_id.clone(),
                    op: cond.op,
                    expected: cond.value.clone(),
                    actual,
                    passed,
                }
            })
            .collect();

        let matched = !conditions.is_empty() && conditions.iter().all(|c| c.passed);
        if matched && selected.is_none() {
            selected = Some(rule);
        }

        explains.push(RuleExplain {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            priority: rule.priority,
            matched,
            conditions,
        });
    }

    if let Some(rule) = selected {
        debug!(rule_id = %rule.id, priority = rule.priority, "Rule matched");
    }

    EvaluationOutcome {
        matched: selected.is_some(),
        selected_rule: selected.cloned(),
        explains,
    }
}

fn condition_passes(actual: &FieldValue, op: CondOp, expected: &RuleValue) -> bool {
    match op {
        CondOp::Eq => values_equal(actual, expected),
        CondOp::Neq => !values_equal(actual, expected),
        CondOp::Gt | CondOp::Gte | CondOp::Lt | CondOp::Lte => {
            // Ordering comparisons require two numbers; anything else fails.
            let (Some(a), RuleValue::Num(b)) = (actual.as_number(), expected) else {
                return false;
            };
            match op {
                CondOp::Gt => a > *b,
                CondOp::Gte => a >= *b,
                CondOp::Lt => a < *b,
                CondOp::Lte => a <= *b,
                _ => unreachable!(),
            }
        }
        CondOp::In => match expected {
            RuleValue::List(items) => items.iter().any(|item| values_equal(actual, item)),
            _ => false,
        },
        CondOp::Contains => match (actual.as_text(), expected) {
            (Some(haystack), RuleValue::Str(needle)) => haystack.contains(needle.as_str()),
            _ => false,
        },
    }
}

/// Kind-aware equality. `Null` only equals an explicit null operand;
/// mismatched kinds are simply unequal.
fn values_equal(actual: &FieldValue, expected: &RuleValue) -> bool {
    match (actual, expected) {
        (FieldValue::Null, RuleValue::Null) => true,
        (FieldValue::Null, _) | (_, RuleValue::Null) => false,
        (FieldValue::Number(a), RuleValue::Num(b)) => a == b,
        (FieldValue::Bool(a), RuleValue::Bool(b)) => a == b,
        (_, RuleValue::Str(b)) => actual.as_text() == Some(b.as_str()),
        _ => false,
    }
}
