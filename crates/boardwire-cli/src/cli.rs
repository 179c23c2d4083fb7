use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "boardwire",
    about = "Boardwire: lattice-propagation boards behind a validating binder",
    version
)]
pub struct Cli {
    /// Directory holding board snapshots and receipt logs
    #[arg(long, global = true, default_value = ".boardwire")]
    pub store: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a JSON plan to a board's binder
    Apply {
        /// Board identifier
        board: String,

        /// Path to the plan JSON (`-` for stdin)
        plan: String,

        /// Output the receipt as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a board's IR summary or its receipt history
    Show {
        /// Board identifier
        board: String,

        /// List receipts instead of the IR summary
        #[arg(long)]
        receipts: bool,

        /// Only receipts with this status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Only receipts with seq >= this value
        #[arg(long)]
        since: Option<u64>,

        /// At most this many receipts
        #[arg(long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the realized graph lowered from a board's IR
    Lower {
        /// Board identifier
        board: String,

        /// Output the full graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Realize a board and propagate input values to a fixpoint
    Run {
        /// Board identifier
        board: String,

        /// Path to a JSON array of `{"node", "pin", "value"}` inputs (`-` for stdin)
        inputs: String,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Ok,
    Error,
}
