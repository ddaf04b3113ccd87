//! erpsync CLI - runs the ERP to CRM sync from the command line.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use erpsync::EntityKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "erpsync")]
#[command(version)]
#[command(about = "One-way batch sync from Epicor to HubSpot")]
#[command(
    long_about = "erpsync reads parts, customers, contacts, quotes and sales orders from an \
Epicor ERP and mirrors them into HubSpot as products, companies, contacts, deals and \
line items. Runs are idempotent: records are matched on their ERP keys, and deal \
stages never move backward."
)]
#[command(after_long_help = r#"EXAMPLES
    Sync everything:
        $ erpsync run

    Sync only quotes and orders with more parallelism:
        $ erpsync run --only quotes,orders -c 8

    Keep a JSON report of records that need attention:
        $ erpsync run --failed-records ./failed.json

    Check that both systems are reachable:
        $ erpsync check

CONFIGURATION
    erpsync reads configuration from (later overrides earlier):
      1. ~/.config/erpsync/config.toml (or $XDG_CONFIG_HOME/erpsync/config.toml)
      2. ./erpsync.toml
      3. Environment variables (ERPSYNC_ prefix, "__" between section and key)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    ERPSYNC_EPICOR__BASE_URL        Epicor OData base URL
    ERPSYNC_EPICOR__COMPANY         Epicor company identifier
    ERPSYNC_EPICOR__USERNAME        Epicor user
    ERPSYNC_EPICOR__PASSWORD        Epicor password
    ERPSYNC_EPICOR__API_KEY         Epicor API key
    ERPSYNC_HUBSPOT__TOKEN          HubSpot private app token
    ERPSYNC_SYNC__CONCURRENCY       Records of one kind in flight (default: 4)
    RUST_LOG                        Log filter (default: erpsync=info,erpsync_cli=info)

EXIT STATUS
    0  every kind synced without errors
    1  partial: some records or kinds failed
    2  nothing ran (configuration or connectivity failure)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full sync
    Run(RunArgs),
    /// Check connectivity to the ERP and the CRM
    Check,
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Clone, clap::Args)]
struct RunArgs {
    /// Only sync these kinds (comma separated: parts,customers,contacts,quotes,orders)
    #[arg(long, value_delimiter = ',')]
    only: Vec<EntityKind>,

    /// Maximum records of one kind processed concurrently (default from config or 4)
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Write failed records as JSON to this path (overrides config)
    #[arg(long)]
    failed_records: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("erpsync=info,erpsync_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        return match commands::meta::handle_completions(*shell) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::from(2)
            }
        };
    }

    // Configuration (config files -> env vars -> defaults)
    let config = config::Config::load();

    let result = match cli.command {
        Commands::Run(args) => {
            let shutdown = shutdown::setup_shutdown_handler();
            commands::run::handle_run(args, &config, shutdown).await
        }
        Commands::Check => commands::check::handle_check(&config).await,
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
    }
}
