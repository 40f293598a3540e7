use clap::{Args, Subcommand};

/// Where the legacy timeouts live and where they should go.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    #[arg(
        long,
        help = "Legacy timeout store connection string (falls back to TIMEOUT_MIGRATION_SOURCE)"
    )]
    pub source: Option<String>,

    #[arg(
        long,
        help = "Source backend: sled, postgres or mysql. Detected from the connection string when omitted"
    )]
    pub source_kind: Option<String>,

    #[arg(
        long,
        help = "Native delayed store connection string (falls back to TIMEOUT_MIGRATION_TARGET)"
    )]
    pub target: Option<String>,

    #[arg(
        long,
        help = "Target backend: sled, postgres or mysql. Detected from the connection string when omitted"
    )]
    pub target_kind: Option<String>,

    #[arg(long, help = "Load environment variables from this file before resolving connections")]
    pub env_file: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List endpoints owning timeouts due at or after the cutoff
    ListEndpoints {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "Cutoff as RFC 3339 timestamp or YYYY-MM-DD date (UTC)")]
        cutoff: String,

        #[arg(long, help = "Print the endpoints as JSON")]
        json: bool,
    },
    /// Check whether the target can take each endpoint, without changing anything
    Preview {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "Cutoff as RFC 3339 timestamp or YYYY-MM-DD date (UTC)")]
        cutoff: String,

        #[arg(long = "endpoint", help = "Only check this endpoint; repeatable")]
        endpoints: Vec<String>,

        #[arg(long, help = "Print the previews as JSON")]
        json: bool,
    },
    /// Migrate timeouts, or resume the migration in progress
    Migrate {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "Cutoff as RFC 3339 timestamp or YYYY-MM-DD date (UTC)")]
        cutoff: String,

        #[arg(long = "endpoint", help = "Only migrate this endpoint; repeatable")]
        endpoints: Vec<String>,

        #[arg(long, help = "Timeouts per batch")]
        batch_size: Option<usize>,

        #[arg(long, help = "Concurrent staging writes per batch")]
        max_concurrency: Option<usize>,

        #[arg(
            long = "param",
            value_name = "KEY=VALUE",
            help = "Run parameter recorded with the run; repeatable"
        )]
        params: Vec<String>,

        #[arg(long, help = "Print the final report as JSON")]
        json: bool,
    },
    /// Abort the migration in progress and hand its timeouts back to the legacy store
    Abort {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
}
