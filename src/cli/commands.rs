//! CLI command definitions

use clap::{Parser, Subcommand, ValueEnum};
use permgate::auth::PermissionMode;

#[derive(Parser)]
#[command(name = "permgate")]
#[command(about = "Scoped, time-limited document store permissions", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = Backend::Postgres, env = "PERMGATE_BACKEND", global = true)]
    pub backend: Backend,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Secret for signing resource tokens (random per process if unset)
    #[arg(long, env = "PERMGATE_TOKEN_SECRET", global = true)]
    pub token_secret: Option<String>,

    /// Secret store the tokens are cached in
    #[arg(long, env = "PERMGATE_VAULT_URL", default_value = "local", global = true)]
    pub vault_url: String,

    /// Cached tokens with less than this many seconds left are reissued
    #[arg(long, env = "PERMGATE_REFRESH_WINDOW_SECS", default_value_t = 600, global = true)]
    pub refresh_window_secs: u64,

    /// Lifetime of issued tokens in seconds
    #[arg(long, env = "PERMGATE_TOKEN_DURATION_SECS", default_value_t = 18000, global = true)]
    pub token_duration_secs: u64,

    /// Mode used when a request does not name one: read or all
    #[arg(long, value_parser = parse_mode, default_value = "all", global = true)]
    pub default_mode: PermissionMode,

    /// Throughput requested for new collections
    #[arg(long, env = "PERMGATE_COLLECTION_THROUGHPUT", default_value_t = 1000, global = true)]
    pub collection_throughput: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// PostgreSQL document and secret store
    Postgres,
    /// In-process stores; nothing survives a restart
    Memory,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "PERMGATE_BIND")]
        bind: String,

        /// Request header carrying the caller's user id
        #[arg(long, default_value = "x-user-id", env = "PERMGATE_IDENTITY_HEADER")]
        identity_header: String,

        /// Keep-warm period in seconds, 0 to disable
        #[arg(long, default_value_t = 240, env = "PERMGATE_WARM_INTERVAL_SECS")]
        warm_interval_secs: u64,
    },

    /// Issue (or fetch the cached) token for a collection
    ///
    /// Examples:
    ///   permgate token db1 coll1 --user alice
    ///   permgate token db1 coll1 --user alice --mode read --inspect
    Token {
        /// Database id
        database: String,

        /// Collection id
        collection: String,

        /// User id (anonymous if omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Permission mode: read or all
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<PermissionMode>,

        /// Token lifetime in seconds (defaults to the configured duration)
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Verify the token and print its payload
        #[arg(long)]
        inspect: bool,
    },

    /// Make sure a database and collection exist
    Ensure {
        /// Database id
        database: String,

        /// Collection id
        collection: String,
    },

    /// Initialize the database schema
    Init,

    /// Show backend status and statistics
    Status,
}

fn parse_mode(s: &str) -> Result<PermissionMode, String> {
    PermissionMode::parse(s)
        .ok_or_else(|| format!("Invalid permission mode: {}. Must be read or all", s))
}
