pub mod board;
pub mod cli;
pub mod config;
pub mod directory;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod proposal;
pub mod queue;
pub mod rules;
pub mod schema;
pub mod scoring;

pub use board::{BoardItem, BoardReader, BoardUser, BoardWriter, FileBoard, WriteOp};
pub use config::{RouterConfig, RoutingMode, RoutingSettings, ScoringConfig};
pub use directory::UserDirectory;
pub use error::{AssigneeResolutionError, Result, RouterError, WriteError};
pub use normalize::{NormalizationError, NormalizedRecord, normalize};
pub use pipeline::{
    ApplyOutcome, DecideOutcome, Decision, ProposeOutcome, RouteOutcome, RoutingInputs,
    RoutingPipeline,
};
pub use proposal::{
    Explainability, GuardOutcome, ProposalStatus, ProposalStore, RoutingProposal, idempotency_key,
};
pub use queue::{MetricsSnapshot, RetryPolicy, WriteQueue, WriteResult};
pub use rules::{CondOp, Condition, EvaluationOutcome, RoutingRule, RuleAction, RuleSet, RuleValue};
pub use schema::{
    FieldDefinition, FieldEntity, FieldMappingConfig, FieldType, FieldValue, InternalSchema,
};
pub use scoring::{AgentPerformanceSnapshot, AgentScore, Component};
