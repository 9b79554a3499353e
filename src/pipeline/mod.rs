//! The routing decision and apply pipeline.
//!
//! Orchestrates the full path for one lead: project raw column values
//! through the mapping, normalize, evaluate rules, rank candidate agents,
//! persist an idempotent proposal, and push the decision back to the
//! platform through the write queue. Diagnostics (normalization errors,
//! rule traces, score breakdowns) are values carried on the results;
//! only resolution and writeback failures are errors.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::board::{BoardItem, BoardReader, WriteOp};
use crate::config::{RouterConfig, RoutingMode, RoutingSettings, ScoringConfig};
use crate::directory::UserDirectory;
use crate::error::{Result, RouterError};
use crate::normalize::{self, NormalizationError};
use crate::proposal::{
    Explainability, GuardOutcome, InsertOutcome, ProposalStatus, ProposalStore, RoutingProposal,
    idempotency_key,
};
use crate::queue::{WriteQueue, WriteResult};
use crate::rules::{self, RoutingRule, RuleAction, RuleExplain, RuleSet};
use crate::schema::{FieldEntity, FieldMappingConfig, FieldValue, InternalSchema};
use crate::scoring::{self, AgentPerformanceSnapshot, AgentScore};

const APPLY_PRIORITY: i32 = 10;
const STATUS_PRIORITY: i32 = 0;

/// Versioned routing inputs: schema, mapping, rules, agent pools, and the
/// latest performance snapshots. All external collaborator data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingInputs {
    pub schema: InternalSchema,
    pub mapping: FieldMappingConfig,
    pub rules: RuleSet,
    #[serde(default)]
    pub pools: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub snapshots: Vec<AgentPerformanceSnapshot>,
}

/// Full dry-run decision: everything the pipeline would do, with the
/// complete explainability trace, and nothing persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub board_id: String,
    pub item_id: String,
    pub normalized_values: BTreeMap<String, FieldValue>,
    pub normalization_errors: Vec<NormalizationError>,
    /// True when a required field failed normalization; rules were not
    /// evaluated.
    pub blocked: bool,
    pub matched: bool,
    pub selected_rule: Option<RoutingRule>,
    pub explains: Vec<RuleExplain>,
    pub ranking: Vec<AgentScore>,
    pub assignee: Option<String>,
}

#[derive(Debug)]
pub enum ProposeOutcome {
    /// No enabled rule matched; nothing was persisted.
    NoMatch(Box<Decision>),
    Created(Box<RoutingProposal>),
    /// The idempotency key already had a proposal; returned unchanged.
    Existing(Box<RoutingProposal>),
}

#[derive(Debug)]
pub enum DecideOutcome {
    /// Waiting for a manager; a best-effort pending status was written.
    PendingApproval,
    Applied(ApplyOutcome),
}

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied { result: WriteResult },
    /// The guard already existed: some apply attempt came first, so no
    /// external write was re-issued. A successful idempotent outcome.
    AlreadyApplied,
}

#[derive(Debug)]
pub enum RouteOutcome {
    NoMatch(Box<Decision>),
    Pending(Box<RoutingProposal>),
    Applied(Box<RoutingProposal>),
}

pub struct RoutingPipeline {
    schema: InternalSchema,
    mapping: FieldMappingConfig,
    rules: RuleSet,
    pools: HashMap<String, Vec<String>>,
    snapshots: HashMap<String, AgentPerformanceSnapshot>,
    settings: RoutingSettings,
    scoring: ScoringConfig,
    store: ProposalStore,
    queue: Arc<WriteQueue>,
    reader: Arc<dyn BoardReader>,
    directory: UserDirectory,
}

impl RoutingPipeline {
    pub fn new(
        inputs: RoutingInputs,
        config: &RouterConfig,
        store: ProposalStore,
        queue: Arc<WriteQueue>,
        reader: Arc<dyn BoardReader>,
    ) -> Self {
        let snapshots = inputs
            .snapshots
            .into_iter()
            .map(|s| (s.agent_id.clone(), s))
            .collect();
        let directory = UserDirectory::new(
            Arc::clone(&reader),
            Duration::from_secs(config.directory.ttl_secs),
        );
        Self {
            schema: inputs.schema,
            mapping: inputs.mapping,
            rules: inputs.rules,
            pools: inputs.pools,
            snapshots,
            settings: config.routing.clone(),
            scoring: config.scoring.clone(),
            store,
            queue,
            reader,
            directory,
        }
    }

    pub fn store(&self) -> &ProposalStore {
        &self.store
    }

    pub fn metrics(&self) -> crate::queue::MetricsSnapshot {
        self.queue.metrics()
    }

    /// Run the decision engines against one item without persisting or
    /// writing anything.
    pub async fn dry_run(&self, board_id: &str, item_id: &str) -> Result<Decision> {
        let item = self.fetch_item(board_id, item_id).await?;
        Ok(self.decide_item(board_id, &item))
    }

    /// Create (or return the existing) proposal for one item.
    pub async fn propose(&self, board_id: &str, item_id: &str) -> Result<ProposeOutcome> {
        let item = self.fetch_item(board_id, item_id).await?;
        let decision = self.decide_item(board_id, &item);

        if decision.blocked {
            return Err(RouterError::RequiredFields {
                errors: decision.normalization_errors,
            });
        }
        if !decision.matched {
            return Ok(ProposeOutcome::NoMatch(Box::new(decision)));
        }

        let selected_rule = decision
            .selected_rule
            .clone()
            .expect("matched decision carries a rule");
        let assignee = decision.assignee.clone().ok_or_else(|| {
            RouterError::Config(format!(
                "rule '{}' routes to an empty agent pool",
                selected_rule.name
            ))
        })?;

        let key = idempotency_key(
            board_id,
            item_id,
            self.schema.version,
            self.mapping.version,
            self.rules.version,
        );
        let proposal = RoutingProposal::new(
            key,
            board_id.to_string(),
            item_id.to_string(),
            decision.normalized_values,
            selected_rule,
            assignee,
            Explainability {
                rules: decision.explains,
                ranking: decision.ranking,
            },
        );

        match self.store.insert(proposal.clone()).await? {
            InsertOutcome::Inserted => {
                info!(proposal_id = %proposal.id, item_id, "Proposal created");
                Ok(ProposeOutcome::Created(Box::new(proposal)))
            }
            InsertOutcome::Existing(existing) => Ok(ProposeOutcome::Existing(Box::new(existing))),
        }
    }

    /// Act on a freshly proposed decision: hold for approval (manual mode
    /// or a forced-manual trigger) or apply immediately (AUTO).
    pub async fn decide(&self, proposal: &RoutingProposal) -> Result<DecideOutcome> {
        let forced = self.industry_changed(proposal).await?;
        if self.settings.mode == RoutingMode::ManualApproval || forced {
            if forced {
                info!(
                    proposal_id = %proposal.id,
                    "Industry changed since the previous proposal; forcing manual approval"
                );
            }
            self.write_decision_status(proposal, &self.settings.pending_status_label)
                .await;
            return Ok(DecideOutcome::PendingApproval);
        }

        let outcome = self.apply(&proposal.id).await?;
        Ok(DecideOutcome::Applied(outcome))
    }

    /// Propose-then-decide convenience used by the CLI.
    pub async fn route(&self, board_id: &str, item_id: &str) -> Result<RouteOutcome> {
        let proposal = match self.propose(board_id, item_id).await? {
            ProposeOutcome::NoMatch(decision) => return Ok(RouteOutcome::NoMatch(decision)),
            ProposeOutcome::Created(p) | ProposeOutcome::Existing(p) => p,
        };

        if proposal.status != ProposalStatus::Proposed {
            // An earlier run already decided this proposal.
            return Ok(match proposal.status {
                ProposalStatus::Applied => RouteOutcome::Applied(proposal),
                _ => RouteOutcome::Pending(proposal),
            });
        }

        match self.decide(&proposal).await? {
            DecideOutcome::PendingApproval => Ok(RouteOutcome::Pending(proposal)),
            DecideOutcome::Applied(_) => {
                let refreshed = self
                    .store
                    .get(&proposal.id)
                    .await?
                    .ok_or_else(|| RouterError::ProposalNotFound(proposal.id.clone()))?;
                Ok(RouteOutcome::Applied(Box::new(refreshed)))
            }
        }
    }

    pub async fn approve(&self, proposal_id: &str) -> Result<RoutingProposal> {
        self.transition(proposal_id, ProposalStatus::Approved, None)
            .await
    }

    pub async fn reject(&self, proposal_id: &str) -> Result<RoutingProposal> {
        self.transition(proposal_id, ProposalStatus::Rejected, None)
            .await
    }

    /// Manager override: replace the proposed assignee and mark the
    /// proposal Overridden; `apply` then routes to the new assignee.
    pub async fn override_assignee(
        &self,
        proposal_id: &str,
        assignee: &str,
    ) -> Result<RoutingProposal> {
        let assignee = assignee.trim();
        if assignee.is_empty() {
            return Err(crate::error::AssigneeResolutionError::Empty.into());
        }
        self.transition(
            proposal_id,
            ProposalStatus::Overridden,
            Some(assignee.to_string()),
        )
        .await
    }

    /// Push the decision to the platform, exactly once per proposal.
    ///
    /// The guard insert is the serialization point: whoever creates the
    /// row owns the write; everyone else marks the proposal applied and
    /// returns without touching the platform again.
    pub async fn apply(&self, proposal_id: &str) -> Result<ApplyOutcome> {
        let proposal = self
            .store
            .get(proposal_id)
            .await?
            .ok_or_else(|| RouterError::ProposalNotFound(proposal_id.to_string()))?;

        if proposal.status == ProposalStatus::Applied {
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        if !proposal.status.can_apply() {
            return Err(RouterError::InvalidTransition {
                from: proposal.status.to_string(),
                to: ProposalStatus::Applied.to_string(),
            });
        }

        match self.store.begin_apply(&proposal.id).await? {
            GuardOutcome::Already => {
                info!(proposal_id = %proposal.id, "Apply already attempted; marking applied");
                self.mark_applied(&proposal).await?;
                Ok(ApplyOutcome::AlreadyApplied)
            }
            GuardOutcome::Created => {
                let person_id = self.directory.resolve(&proposal.assignee).await?;
                let column_id = self
                    .mapping
                    .writeback
                    .assignee_column
                    .clone()
                    .ok_or(RouterError::MissingWritebackTarget("assignee"))?;

                let result = self
                    .queue
                    .enqueue(
                        WriteOp::AssignPerson {
                            board_id: proposal.board_id.clone(),
                            item_id: proposal.item_id.clone(),
                            column_id,
                            person_id,
                        },
                        APPLY_PRIORITY,
                        Some(format!("apply:{}", proposal.id)),
                    )
                    .await?;

                if !result.success {
                    let failure = result.error.clone();
                    let (message, code, retryable) = failure
                        .map(|f| (f.message, f.code, f.retryable))
                        .unwrap_or_else(|| ("write failed".into(), "UNKNOWN".into(), false));
                    return Err(RouterError::Writeback {
                        message,
                        code,
                        retryable,
                        attempts: result.attempts,
                    });
                }

                self.write_decision_status(&proposal, &self.settings.routed_status_label)
                    .await;
                self.mark_applied(&proposal).await?;
                info!(
                    proposal_id = %proposal.id,
                    assignee = %proposal.assignee,
                    person_id,
                    "Routing decision applied"
                );
                Ok(ApplyOutcome::Applied { result })
            }
        }
    }

    async fn fetch_item(&self, board_id: &str, item_id: &str) -> Result<BoardItem> {
        self.reader
            .fetch_item(board_id, item_id)
            .await?
            .ok_or_else(|| RouterError::ItemNotFound {
                board_id: board_id.to_string(),
                item_id: item_id.to_string(),
            })
    }

    /// Pure decision core shared by dry-run and propose.
    fn decide_item(&self, board_id: &str, item: &BoardItem) -> Decision {
        let raw = self.mapping.raw_values_for(board_id, &item.column_values);
        let record = normalize::normalize(&self.schema, FieldEntity::Lead, &raw);

        if record.has_required_errors() {
            return Decision {
                board_id: board_id.to_string(),
                item_id: item.id.clone(),
                normalized_values: record.values,
                normalization_errors: record.errors,
                blocked: true,
                matched: false,
                selected_rule: None,
                explains: Vec::new(),
                ranking: Vec::new(),
                assignee: None,
            };
        }

        let outcome = rules::evaluate(&record.values, &self.rules.rules);
        let (ranking, assignee) = match &outcome.selected_rule {
            Some(rule) => self.resolve_action(&record.values, &rule.then),
            None => (Vec::new(), None),
        };

        Decision {
            board_id: board_id.to_string(),
            item_id: item.id.clone(),
            normalized_values: record.values,
            normalization_errors: record.errors,
            blocked: false,
            matched: outcome.matched,
            selected_rule: outcome.selected_rule,
            explains: outcome.explains,
            ranking,
            assignee,
        }
    }

    /// Turn a rule action into a concrete assignee, ranking the pool's
    /// agents when the action names a pool.
    fn resolve_action(
        &self,
        values: &BTreeMap<String, FieldValue>,
        action: &RuleAction,
    ) -> (Vec<AgentScore>, Option<String>) {
        match action {
            RuleAction::AssignAgentId(identifier) => (Vec::new(), Some(identifier.clone())),
            RuleAction::AssignAgentPool(pool_id) => {
                let members = self.pools.get(pool_id).cloned().unwrap_or_default();
                if members.is_empty() {
                    warn!(pool_id = %pool_id, "Rule routes to an unknown or empty pool");
                    return (Vec::new(), None);
                }
                let candidates: Vec<AgentPerformanceSnapshot> = members
                    .iter()
                    .map(|agent_id| {
                        self.snapshots
                            .get(agent_id)
                            .cloned()
                            .unwrap_or_else(|| AgentPerformanceSnapshot::empty(agent_id.clone()))
                    })
                    .collect();
                let industry = self.lead_industry(values);
                let ranking = scoring::score(industry.as_deref(), &candidates, &self.scoring);
                let top = ranking.first().map(|s| s.agent_id.clone());
                (ranking, top)
            }
        }
    }

    fn lead_industry(&self, values: &BTreeMap<String, FieldValue>) -> Option<String> {
        values
            .get(&self.scoring.industry_field)
            .and_then(|v| v.as_text())
            .map(String::from)
    }

    async fn industry_changed(&self, proposal: &RoutingProposal) -> Result<bool> {
        if !self.settings.manual_on_industry_change {
            return Ok(false);
        }
        let Some(previous) = self
            .store
            .latest_for_item(&proposal.board_id, &proposal.item_id, &proposal.id)
            .await?
        else {
            return Ok(false);
        };
        let field = &self.scoring.industry_field;
        Ok(previous.normalized_values.get(field) != proposal.normalized_values.get(field))
    }

    async fn transition(
        &self,
        proposal_id: &str,
        to: ProposalStatus,
        assignee: Option<String>,
    ) -> Result<RoutingProposal> {
        let proposal = self
            .store
            .get(proposal_id)
            .await?
            .ok_or_else(|| RouterError::ProposalNotFound(proposal_id.to_string()))?;

        if !proposal.status.can_transition_to(to) {
            return Err(RouterError::InvalidTransition {
                from: proposal.status.to_string(),
                to: to.to_string(),
            });
        }

        self.store
            .update_status(proposal_id, proposal.status, to, Some(Utc::now()), assignee)
            .await?;
        info!(proposal_id, status = %to, "Proposal transitioned");

        self.store
            .get(proposal_id)
            .await?
            .ok_or_else(|| RouterError::ProposalNotFound(proposal_id.to_string()))
    }

    async fn mark_applied(&self, proposal: &RoutingProposal) -> Result<()> {
        match self
            .store
            .update_status(
                &proposal.id,
                proposal.status,
                ProposalStatus::Applied,
                Some(Utc::now()),
                None,
            )
            .await
        {
            Ok(()) => Ok(()),
            // A concurrent apply won the swap; the proposal is Applied,
            // which is all this call wanted.
            Err(RouterError::InvalidTransition { from, .. })
                if from == ProposalStatus::Applied.as_str() =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort status and reason writebacks. Failures are logged and
    /// swallowed — they must never fail the decision that triggered them.
    async fn write_decision_status(&self, proposal: &RoutingProposal, label: &str) {
        if let Some(column_id) = self.mapping.writeback.status_column.clone() {
            let op = WriteOp::SetStatus {
                board_id: proposal.board_id.clone(),
                item_id: proposal.item_id.clone(),
                column_id,
                label: label.to_string(),
            };
            let dedupe = format!("status:{}:{}", proposal.id, label);
            match self.queue.enqueue(op, STATUS_PRIORITY, Some(dedupe)).await {
                Ok(result) if result.success => {}
                Ok(result) => warn!(
                    proposal_id = %proposal.id,
                    attempts = result.attempts,
                    "Status writeback failed"
                ),
                Err(e) => warn!(proposal_id = %proposal.id, error = %e, "Status writeback not scheduled"),
            }
        }

        if let Some(column_id) = self.mapping.writeback.reason_column.clone() {
            let op = WriteOp::SetText {
                board_id: proposal.board_id.clone(),
                item_id: proposal.item_id.clone(),
                column_id,
                text: reason_text(proposal),
            };
            let dedupe = format!("reason:{}:{}", proposal.id, label);
            match self.queue.enqueue(op, STATUS_PRIORITY, Some(dedupe)).await {
                Ok(result) if result.success => {}
                Ok(result) => warn!(
                    proposal_id = %proposal.id,
                    attempts = result.attempts,
                    "Reason writeback failed"
                ),
                Err(e) => warn!(proposal_id = %proposal.id, error = %e, "Reason writeback not scheduled"),
            }
        }
    }
}

fn reason_text(proposal: &RoutingProposal) -> String {
    match &proposal.selected_rule {
        Some(rule) => format!(
            "Rule '{}' routed this lead to {}",
            rule.name, proposal.assignee
        ),
        None => format!("Routed to {}", proposal.assignee),
    }
}
