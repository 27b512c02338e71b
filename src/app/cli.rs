use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// `cortexd` - background worker for an autonomous agent's cognitive queue.
#[derive(Parser, Debug)]
#[command(name = "cortexd")]
#[command(version)]
#[command(about = "Runs the decision and maintenance loops of a persistent agent.", long_about = None)]
pub struct Cli {
    /// Config file to load instead of ~/.cortexd/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker loops until interrupted or the agent terminates
    Run {
        /// Which loops to run in this process
        #[arg(long, value_enum, default_value_t = RunMode::Both)]
        mode: RunMode,
    },

    /// Show queue counts, consent state and backend selection
    Status,

    /// Add a work item to the queue
    Enqueue {
        /// Call type, e.g. `think`
        call_type: String,

        /// Input document as JSON, e.g. '{"kind":"reflect"}'
        input: String,

        /// Owning heartbeat, for nested calls
        #[arg(long)]
        heartbeat_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Decision,
    Maintenance,
    Both,
}

impl RunMode {
    pub fn runs_decision(self) -> bool {
        matches!(self, Self::Decision | Self::Both)
    }

    pub fn runs_maintenance(self) -> bool {
        matches!(self, Self::Maintenance | Self::Both)
    }
}
