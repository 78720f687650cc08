//! CLI argument parsing for Tangle.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tg",
    about = "Dependency and lifecycle graph for tasks and epics",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/tangle/logs/tangle.log"
)]
pub struct Cli {
    /// Path to the store directory (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Depth ceiling for graph walks (overrides TANGLE_MAX_DEPTH)
    #[arg(long, global = true)]
    pub max_depth: Option<usize>,

    /// Agent identity used when claiming items (overrides TANGLE_AGENT_ID)
    #[arg(short = 'a', long, global = true)]
    pub agent: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new store in the current directory
    Init,

    /// Create a new task or epic
    Create {
        /// Title
        title: String,

        /// Project the item belongs to
        #[arg(short = 'P', long, default_value = "default")]
        project: String,

        /// Create an epic instead of a task
        #[arg(long)]
        epic: bool,

        /// Priority (0=critical, 4=low)
        #[arg(short, long, default_value = "2")]
        priority: u8,

        /// Parent item ID
        #[arg(long)]
        parent: Option<String>,

        /// Labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Option<Vec<String>>,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Epic only: closing instructions
        #[arg(long)]
        closing_instructions: Option<String>,
    },

    /// Show an item with its dependencies and log
    Get {
        /// Item ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List items
    List {
        /// Filter by project
        #[arg(short = 'P', long)]
        project: Option<String>,

        /// Filter by status (open, in_progress, blocked, done, canceled)
        #[arg(short, long)]
        status: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show open items with nothing left to wait on
    Ready {
        /// Project to inspect
        #[arg(short = 'P', long, default_value = "default")]
        project: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Claim an item and set it in progress
    Start {
        /// Item ID
        id: String,
    },

    /// Set an item's status
    Status {
        /// Item ID
        id: String,

        /// New status (open, in_progress, blocked, done, canceled)
        status: String,

        /// Close even if other items still depend on this one
        #[arg(short, long)]
        force: bool,

        /// Close the parent epic too once its last child closes
        #[arg(long)]
        auto_close_epic: bool,
    },

    /// Mark an item done with a results summary
    Complete {
        /// Item ID
        id: String,

        /// Results summary
        #[arg(short, long, default_value = "")]
        results: String,

        /// Close the parent epic too once its last child closes
        #[arg(long)]
        auto_close_epic: bool,
    },

    /// Delete an item
    Delete {
        /// Item ID
        id: String,

        /// Delete even if other items depend on it
        #[arg(short, long)]
        force: bool,

        /// With --force, delete all descendants as well
        #[arg(long)]
        cascade: bool,
    },

    /// Manage dependencies
    Dep {
        #[command(subcommand)]
        command: DepCommand,
    },

    /// Show items that depend on this one
    BlockedBy {
        /// Item ID
        id: String,
    },

    /// Show what completing an item would unblock
    Impact {
        /// Item ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge one item into another, deleting the source
    Merge {
        /// Item to absorb
        source: String,

        /// Item that survives
        target: String,
    },

    /// Audit the graph for cycles and parent/child conflicts
    Doctor {
        /// Remove dependency edges that duplicate parent/child links
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand)]
pub enum DepCommand {
    /// Make ITEM depend on DEPENDS_ON
    Add { item: String, depends_on: String },

    /// Remove a dependency
    Rm { item: String, depends_on: String },

    /// List what an item depends on, including inherited blockers
    List { id: String },
}
