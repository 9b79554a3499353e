use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::proposal::ProposalStatus;

#[derive(Parser)]
#[command(name = "lead-router")]
#[command(author, version, about = "Routes inbound leads to the best-fit sales agent", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Data directory holding config.toml, routing.json, the board
    /// snapshot files, and the proposal store
    #[arg(long, global = true, env = "LEAD_ROUTER_DATA_DIR", default_value = ".lead-router")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory with a default configuration
    Init,

    /// Evaluate an item and print the decision without persisting anything
    DryRun {
        board_id: String,
        item_id: String,
    },

    /// Create a proposal for an item and run the decide step
    Route {
        board_id: String,
        item_id: String,
    },

    /// List proposals
    List {
        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },

    /// Show one proposal with its full explainability trace
    Show { proposal_id: String },

    /// Approve a pending proposal
    Approve { proposal_id: String },

    /// Reject a pending proposal
    Reject { proposal_id: String },

    /// Replace the proposed assignee and mark the proposal overridden
    Override {
        proposal_id: String,
        assignee: String,
    },

    /// Apply an approved or overridden proposal to the board
    Apply { proposal_id: String },

    /// Print write-queue metrics
    Metrics,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum StatusArg {
    Proposed,
    Approved,
    Rejected,
    Overridden,
    Applied,
}

impl From<StatusArg> for ProposalStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Proposed => ProposalStatus::Proposed,
            StatusArg::Approved => ProposalStatus::Approved,
            StatusArg::Rejected => ProposalStatus::Rejected,
            StatusArg::Overridden => ProposalStatus::Overridden,
            StatusArg::Applied => ProposalStatus::Applied,
        }
    }
}
