//! Shared builders for integration tests: a file-backed board with two
//! sample leads, a schema/mapping/rule set covering every operator the
//! tests exercise, and a fully wired pipeline over a temp directory.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use lead_router::config::{RouterConfig, RoutingMode};
use lead_router::rules::{CondOp, Condition, RoutingRule, RuleAction, RuleSet, RuleValue};
use lead_router::schema::{
    BoardColumnRef, FieldDefinition, FieldEntity, FieldMappingConfig, FieldType, InternalSchema,
    WritebackTargets,
};
use lead_router::scoring::AgentPerformanceSnapshot;
use lead_router::{FileBoard, ProposalStore, RoutingInputs, RoutingPipeline, WriteQueue};

pub const BOARD: &str = "b1";

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub pipeline: RoutingPipeline,
    pub queue: Arc<WriteQueue>,
    pub board: Arc<FileBoard>,
}

impl TestEnv {
    /// Lines written to the board outbox so far, parsed.
    pub fn outbox(&self) -> Vec<serde_json::Value> {
        let path = self.board.outbox_path();
        if !path.exists() {
            return Vec::new();
        }
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Outbox lines of one op kind (`assign_person`, `set_status`, ...).
    pub fn outbox_of(&self, kind: &str) -> Vec<serde_json::Value> {
        self.outbox()
            .into_iter()
            .filter(|line| line["op"] == json!(kind))
            .collect()
    }
}

pub fn field(id: &str, field_type: FieldType, required: bool) -> FieldDefinition {
    FieldDefinition {
        id: id.into(),
        label: id.into(),
        entity: FieldEntity::Lead,
        field_type,
        required,
        active: true,
    }
}

pub fn schema() -> InternalSchema {
    InternalSchema {
        version: 1,
        fields: vec![
            field("industry", FieldType::Status, true),
            field("budget", FieldType::Number, false),
            field("qualified", FieldType::Boolean, false),
            field("received", FieldType::Date, false),
        ],
    }
}

pub fn mapping() -> FieldMappingConfig {
    let columns = [
        ("industry", "col_industry"),
        ("budget", "col_budget"),
        ("qualified", "col_qualified"),
        ("received", "col_received"),
    ]
    .into_iter()
    .map(|(field_id, column_id)| {
        (
            field_id.to_string(),
            BoardColumnRef {
                board_id: BOARD.into(),
                column_id: column_id.into(),
            },
        )
    })
    .collect();

    FieldMappingConfig {
        version: 1,
        columns,
        writeback: WritebackTargets {
            assignee_column: Some("col_assignee".into()),
            status_column: Some("col_routing_status".into()),
            reason_column: Some("col_routing_reason".into()),
        },
    }
}

pub fn saas_pool_rule(priority: i32, enabled: bool) -> RoutingRule {
    RoutingRule {
        id: "saas-pool".into(),
        name: "SaaS to pool".into(),
        priority,
        enabled,
        when: vec![Condition {
            field_id: "industry".into(),
            op: CondOp::Eq,
            value: RuleValue::Str("SaaS".into()),
        }],
        then: RuleAction::AssignAgentPool("saas".into()),
    }
}

pub fn big_budget_rule(priority: i32) -> RoutingRule {
    RoutingRule {
        id: "big-budget".into(),
        name: "Big budgets to Dana".into(),
        priority,
        enabled: true,
        when: vec![Condition {
            field_id: "budget".into(),
            op: CondOp::Gte,
            value: RuleValue::Num(1000.0),
        }],
        then: RuleAction::AssignAgentId("dana@example.com".into()),
    }
}

pub fn catch_all_rule(priority: i32) -> RoutingRule {
    RoutingRule {
        id: "any-known-industry".into(),
        name: "Known industries to Dana".into(),
        priority,
        enabled: true,
        when: vec![Condition {
            field_id: "industry".into(),
            op: CondOp::In,
            value: RuleValue::List(vec![
                RuleValue::Str("SaaS".into()),
                RuleValue::Str("Fintech".into()),
            ]),
        }],
        then: RuleAction::AssignAgentId("dana@example.com".into()),
    }
}

pub fn snapshots() -> Vec<AgentPerformanceSnapshot> {
    let mut alice = AgentPerformanceSnapshot::empty("alice");
    alice.conversion_rate = Some(0.9);
    alice.industry_win_rates.insert("SaaS".into(), 0.9);

    let mut bob = AgentPerformanceSnapshot::empty("bob");
    bob.conversion_rate = Some(0.4);
    bob.industry_win_rates.insert("SaaS".into(), 0.2);

    vec![alice, bob]
}

pub fn inputs(rules: Vec<RoutingRule>, rules_version: u32) -> RoutingInputs {
    RoutingInputs {
        schema: schema(),
        mapping: mapping(),
        rules: RuleSet {
            version: rules_version,
            rules,
        },
        pools: [("saas".to_string(), vec!["alice".to_string(), "bob".to_string()])]
            .into_iter()
            .collect(),
        snapshots: snapshots(),
    }
}

pub fn default_rules() -> Vec<RoutingRule> {
    vec![saas_pool_rule(1, true), big_budget_rule(2)]
}

pub fn write_board_fixtures(board_dir: &Path) {
    std::fs::create_dir_all(board_dir).unwrap();

    let items = json!([
        {
            "board_id": BOARD,
            "id": "item-saas",
            "name": "Acme (SaaS, big budget)",
            "column_values": {
                "col_industry": {"label": "SaaS"},
                "col_budget": "1,200",
                "col_qualified": "yes",
                "col_received": "2024-01-05"
            }
        },
        {
            "board_id": BOARD,
            "id": "item-retail",
            "name": "Shoply (no matching rule)",
            "column_values": {
                "col_industry": "Retail",
                "col_budget": 500
            }
        },
        {
            "board_id": BOARD,
            "id": "item-budget-only",
            "name": "BigCo (budget rule only)",
            "column_values": {
                "col_industry": "Fintech",
                "col_budget": 2000
            }
        },
        {
            "board_id": BOARD,
            "id": "item-no-industry",
            "name": "Mystery lead",
            "column_values": {
                "col_budget": 800
            }
        }
    ]);
    std::fs::write(board_dir.join("items.json"), items.to_string()).unwrap();

    let users = json!([
        {"id": 3, "name": "alice", "email": "alice@example.com"},
        {"id": 4, "name": "bob", "email": "bob@example.com"},
        {"id": 7, "name": "Dana Reyes", "email": "dana@example.com"}
    ]);
    std::fs::write(board_dir.join("users.json"), users.to_string()).unwrap();
}

pub fn config(mode: RoutingMode) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.routing.mode = mode;
    config
}

/// Wire a pipeline over a fresh temp directory with the default rules.
pub fn env(mode: RoutingMode) -> TestEnv {
    env_with(mode, inputs(default_rules(), 1))
}

pub fn env_with(mode: RoutingMode, inputs: RoutingInputs) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    write_board_fixtures(&dir.path().join("board"));
    reopen(dir, config(mode), inputs)
}

/// Rebuild the pipeline over an existing data directory — same store and
/// outbox, new configuration or rule versions.
pub fn reopen(dir: tempfile::TempDir, config: RouterConfig, inputs: RoutingInputs) -> TestEnv {
    let board = Arc::new(FileBoard::new(dir.path().join("board")));
    let store = ProposalStore::open(dir.path().join("router.db")).unwrap();
    let queue = Arc::new(WriteQueue::new(board.clone(), &config.queue));
    let pipeline = RoutingPipeline::new(inputs, &config, store, Arc::clone(&queue), board.clone());
    TestEnv {
        dir,
        pipeline,
        queue,
        board,
    }
}

pub fn update_item_industry(env: &TestEnv, item_id: &str, industry: &str) {
    let path = env.dir.path().join("board").join("items.json");
    let mut items: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    for item in items.as_array_mut().unwrap() {
        if item["id"] == json!(item_id) {
            item["column_values"]["col_industry"] = json!(industry);
        }
    }
    std::fs::write(path, items.to_string()).unwrap();
}
