mod config;
mod console;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{init_logging, load_config, ConfigOverrides};
use console::{parse_timestamp, HistoryRequest};
use lumen_core::pager::{DEFAULT_PAGE_LIMIT, MAX_EXPORT_LIMIT};
use lumen_core::{ExportFormat, HistoryFilters, HistoryTable, Role};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Lighting fleet operator console", long_about = None)]
struct Cli {
    /// Dashboard API base URL [env: LUMEN_API_URL]
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Bearer token [env: LUMEN_TOKEN]
    #[arg(long, global = true)]
    token: Option<String>,
    /// Caller role used to gate privileged actions [env: LUMEN_ROLE]
    #[arg(long, global = true)]
    role: Option<Role>,
    /// Skip the push stream and rely on polling
    #[arg(long, global = true)]
    no_stream: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print live events as NDJSON
    Watch {
        #[arg(long = "type")]
        types: Vec<String>,
        #[arg(long = "kind")]
        kinds: Vec<String>,
    },
    /// Follow the job list
    Jobs {
        /// Fetch once and exit
        #[arg(long)]
        once: bool,
    },
    /// Page through a history table
    History {
        table: HistoryTable,
        #[arg(long, default_value_t = i64::from(DEFAULT_PAGE_LIMIT))]
        limit: i64,
        #[arg(long, conflicts_with = "after_id")]
        offset: Option<u64>,
        #[arg(long)]
        after_id: Option<i64>,
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Download a history table
    Export {
        table: HistoryTable,
        #[arg(long)]
        format: ExportFormat,
        #[arg(long, default_value_t = i64::from(MAX_EXPORT_LIMIT))]
        limit: i64,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Inspect or prune a table's retention
    Retention {
        table: HistoryTable,
        #[command(subcommand)]
        action: RetentionCommands,
    },
}

#[derive(Subcommand)]
enum RetentionCommands {
    Status {
        /// Keep polling every N seconds
        #[arg(long)]
        follow: Option<u64>,
    },
    Run {
        #[arg(long)]
        max_rows: Option<u64>,
        #[arg(long)]
        max_days: Option<u64>,
    },
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long)]
    q: Option<String>,
    #[arg(long = "type")]
    event_type: Option<String>,
    #[arg(long, value_parser = parse_timestamp)]
    since: Option<f64>,
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<f64>,
}

impl From<FilterArgs> for HistoryFilters {
    fn from(args: FilterArgs) -> Self {
        HistoryFilters {
            text: args.q,
            event_type: args.event_type,
            since: args.since,
            until: args.until,
        }
    }
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            token: self.token.clone(),
            role: self.role,
            no_stream: self.no_stream,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.overrides());
    init_logging();
    info!(
        event = "console_start",
        api_url = %config.api_url,
        stream_enabled = config.stream_enabled,
        role = %config.role
    );

    match cli.command {
        Commands::Watch { types, kinds } => console::watch(&config, types, kinds).await,
        Commands::Jobs { once } => console::jobs(&config, once).await,
        Commands::History {
            table,
            limit,
            offset,
            after_id,
            filters,
            pages,
        } => {
            let request = HistoryRequest {
                table,
                limit,
                offset,
                after_id,
                filters: filters.into(),
                pages,
            };
            console::history(&config, request).await
        }
        Commands::Export {
            table,
            format,
            limit,
            out,
            filters,
        } => console::export(&config, table, format, limit, filters.into(), out).await,
        Commands::Retention { table, action } => match action {
            RetentionCommands::Status { follow } => {
                let follow = follow.map(|secs| Duration::from_secs(secs.max(1)));
                console::retention_status(&config, table, follow).await
            }
            RetentionCommands::Run { max_rows, max_days } => {
                console::retention_run(&config, table, max_rows, max_days).await
            }
        },
    }
}
