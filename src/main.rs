use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lead_router::cli::{Cli, Commands, Display, OutputFormat};
use lead_router::config::RouterConfig;
use lead_router::error::{Result, RouterError};
use lead_router::pipeline::{ApplyOutcome, RouteOutcome};
use lead_router::rules::{CondOp, Condition, RoutingRule, RuleAction, RuleSet, RuleValue};
use lead_router::schema::{
    BoardColumnRef, FieldDefinition, FieldEntity, FieldMappingConfig, FieldType, InternalSchema,
    WritebackTargets,
};
use lead_router::{FileBoard, ProposalStore, RoutingInputs, RoutingPipeline, WriteQueue};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("lead_router=debug")
    } else {
        EnvFilter::new("lead_router=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let display = Display::new();

    if matches!(cli.command, Commands::Init) {
        return cmd_init(&cli.data_dir, &display).await;
    }

    let app = App::open(&cli.data_dir).await?;
    let result = app.dispatch(cli.command, &display, cli.output).await;
    // Drain outstanding writebacks before exiting.
    app.queue.shutdown().await;
    result
}

struct App {
    pipeline: RoutingPipeline,
    queue: Arc<WriteQueue>,
}

impl App {
    async fn open(data_dir: &Path) -> Result<Self> {
        let config = RouterConfig::load(data_dir).await?;
        let inputs = load_inputs(data_dir).await?;
        let board = Arc::new(FileBoard::new(data_dir.join("board")));
        let store = ProposalStore::open(data_dir.join("router.db"))?;
        let queue = Arc::new(WriteQueue::new(board.clone(), &config.queue));
        let pipeline = RoutingPipeline::new(inputs, &config, store, Arc::clone(&queue), board);
        Ok(Self { pipeline, queue })
    }

    async fn dispatch(
        &self,
        command: Commands,
        display: &Display,
        output: OutputFormat,
    ) -> Result<()> {
        match command {
            Commands::Init => unreachable!("handled before opening the app"),

            Commands::DryRun { board_id, item_id } => {
                let decision = self.pipeline.dry_run(&board_id, &item_id).await?;
                match output {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&decision)?)
                    }
                    OutputFormat::Text => display.print_decision(&decision),
                }
                Ok(())
            }

            Commands::Route { board_id, item_id } => {
                match self.pipeline.route(&board_id, &item_id).await? {
                    RouteOutcome::NoMatch(decision) => {
                        display.print_message("No rule matched; nothing proposed.");
                        if output == OutputFormat::Json {
                            println!("{}", serde_json::to_string_pretty(&decision)?);
                        } else {
                            display.print_decision(&decision);
                        }
                    }
                    RouteOutcome::Pending(proposal) => {
                        display.print_message("Proposal pending manual approval:");
                        self.emit_proposal(&proposal, display, output)?;
                    }
                    RouteOutcome::Applied(proposal) => {
                        display.print_message("Routing decision applied:");
                        self.emit_proposal(&proposal, display, output)?;
                    }
                }
                Ok(())
            }

            Commands::List { status } => {
                let proposals = self.pipeline.store().list(status.map(Into::into)).await?;
                if output == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&proposals)?);
                } else if proposals.is_empty() {
                    display.print_message("No proposals.");
                } else {
                    for proposal in &proposals {
                        display.print_proposal_summary(proposal);
                    }
                }
                Ok(())
            }

            Commands::Show { proposal_id } => {
                let proposal = self
                    .pipeline
                    .store()
                    .get(&proposal_id)
                    .await?
                    .ok_or(RouterError::ProposalNotFound(proposal_id))?;
                if output == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&proposal)?);
                } else {
                    display.print_proposal_detail(&proposal);
                }
                Ok(())
            }

            Commands::Approve { proposal_id } => {
                let proposal = self.pipeline.approve(&proposal_id).await?;
                self.emit_proposal(&proposal, display, output)
            }

            Commands::Reject { proposal_id } => {
                let proposal = self.pipeline.reject(&proposal_id).await?;
                self.emit_proposal(&proposal, display, output)
            }

            Commands::Override {
                proposal_id,
                assignee,
            } => {
                let proposal = self
                    .pipeline
                    .override_assignee(&proposal_id, &assignee)
                    .await?;
                self.emit_proposal(&proposal, display, output)
            }

            Commands::Apply { proposal_id } => {
                match self.pipeline.apply(&proposal_id).await? {
                    ApplyOutcome::Applied { result } => display.print_message(&format!(
                        "Applied in {} attempt(s), {} ms.",
                        result.attempts, result.duration_ms
                    )),
                    ApplyOutcome::AlreadyApplied => {
                        display.print_message("Already applied; no write re-issued.")
                    }
                }
                Ok(())
            }

            Commands::Metrics => {
                let metrics = self.pipeline.metrics();
                if output == OutputFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&metrics)?);
                } else {
                    display.print_metrics(&metrics);
                }
                Ok(())
            }
        }
    }

    fn emit_proposal(
        &self,
        proposal: &lead_router::RoutingProposal,
        display: &Display,
        output: OutputFormat,
    ) -> Result<()> {
        if output == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(proposal)?);
        } else {
            display.print_proposal_detail(proposal);
        }
        Ok(())
    }
}

async fn cmd_init(data_dir: &Path, display: &Display) -> Result<()> {
    tokio::fs::create_dir_all(data_dir.join("board")).await?;

    let config_path = data_dir.join("config.toml");
    if config_path.exists() {
        display.print_message("config.toml already exists; leaving it unchanged.");
    } else {
        RouterConfig::default().save(data_dir).await?;
        display.print_message(&format!("Wrote {}", config_path.display()));
    }

    let routing_path = data_dir.join("routing.json");
    if routing_path.exists() {
        display.print_message("routing.json already exists; leaving it unchanged.");
    } else {
        let starter = starter_inputs();
        tokio::fs::write(&routing_path, serde_json::to_string_pretty(&starter)?).await?;
        display.print_message(&format!("Wrote {}", routing_path.display()));
    }

    display.print_message("Done. Drop items.json and users.json into board/ to get started.");
    Ok(())
}

async fn load_inputs(data_dir: &Path) -> Result<RoutingInputs> {
    let path = data_dir.join("routing.json");
    if !path.exists() {
        return Err(RouterError::Config(format!(
            "{} not found; run 'lead-router init' first",
            path.display()
        )));
    }
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Minimal starter inputs written by `init`: one required industry field,
/// one rule routing SaaS leads to the default pool.
fn starter_inputs() -> RoutingInputs {
    RoutingInputs {
        schema: InternalSchema {
            version: 1,
            fields: vec![FieldDefinition {
                id: "industry".into(),
                label: "Industry".into(),
                entity: FieldEntity::Lead,
                field_type: FieldType::Status,
                required: true,
                active: true,
            }],
        },
        mapping: FieldMappingConfig {
            version: 1,
            columns: [(
                "industry".to_string(),
                BoardColumnRef {
                    board_id: "board-1".into(),
                    column_id: "industry".into(),
                },
            )]
            .into_iter()
            .collect(),
            writeback: WritebackTargets {
                assignee_column: Some("assignee".into()),
                status_column: Some("routing_status".into()),
                reason_column: Some("routing_reason".into()),
            },
        },
        rules: RuleSet {
            version: 1,
            rules: vec![RoutingRule {
                id: "saas-pool".into(),
                name: "SaaS leads to sales pool".into(),
                priority: 1,
                enabled: true,
                when: vec![Condition {
                    field_id: "industry".into(),
                    op: CondOp::Eq,
                    value: RuleValue::Str("SaaS".into()),
                }],
                then: RuleAction::AssignAgentPool("default".into()),
            }],
        },
        pools: [("default".to_string(), Vec::new())].into_iter().collect(),
        snapshots: Vec::new(),
    }
}
