use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use duka_core::{ConflictResolution, EntityKind};

#[derive(Parser)]
#[command(name = "duka")]
#[command(about = "Record sales and stock offline, sync when the network returns")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for API endpoint and credentials
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Override the API base URL for this invocation
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Never contact the server; writes are only queued
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record (JSON payload as argument or on stdin)
    #[command(alias = "add")]
    Create {
        #[arg(value_enum)]
        kind: KindArg,
        /// JSON payload, e.g. '{"name":"Milk","price":60,"stock":20}'
        data: Option<String>,
    },
    /// Replace the payload of an existing record
    Update {
        #[arg(value_enum)]
        kind: KindArg,
        /// Local record id
        id: i64,
        /// JSON payload
        data: Option<String>,
    },
    /// Delete a record
    Delete {
        #[arg(value_enum)]
        kind: KindArg,
        /// Local record id
        id: i64,
    },
    /// List local records of one kind
    List {
        #[arg(value_enum)]
        kind: KindArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay queued changes against the server now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show connectivity, queue and conflict status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List outstanding sync conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a conflict by keeping the local or the server version
    Resolve {
        #[arg(value_enum)]
        kind: KindArg,
        /// Server id the conflict is reported under
        id: i64,
        #[arg(value_enum)]
        resolution: ResolutionArg,
        /// Treat ID as a local record id, for server records several local records collide with
        #[arg(long)]
        local: bool,
    },
    /// Inspect or repair the pending operation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Keep syncing in the foreground until interrupted
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage the API bearer token for a profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    #[value(alias = "products")]
    Product,
    #[value(alias = "customers")]
    Customer,
    #[value(alias = "orders")]
    Order,
    #[value(alias = "sales")]
    Sale,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Product => Self::Product,
            KindArg::Customer => Self::Customer,
            KindArg::Order => Self::Order,
            KindArg::Sale => Self::Sale,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    Local,
    Server,
}

impl From<ResolutionArg> for ConflictResolution {
    fn from(resolution: ResolutionArg) -> Self {
        match resolution {
            ResolutionArg::Local => Self::Local,
            ResolutionArg::Server => Self::Server,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unpark an operation so the next pass retries it
    Retry {
        /// Operation id
        op_id: i64,
    },
    /// Drop an operation without sending it
    Purge {
        /// Operation id
        op_id: i64,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// API base URL, e.g. https://pos.example.com/api
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Seconds between periodic sync passes
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
        /// Per-request timeout in seconds
        #[arg(long, value_name = "SECS")]
        request_timeout_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved configuration
    Show {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a bearer token for the profile in the OS keychain
    Login {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// API bearer token (read from stdin when omitted)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Show whether the profile has a stored token
    Status {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
    /// Remove the stored token
    Logout {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}
