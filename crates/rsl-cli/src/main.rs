mod config;

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use config::{ExtractArgs, PostgresArgs, TransformArgs};
use rsl_sync::IngestSummary;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for "the API session could not be established", so an
/// orchestrator's retry wrapper sees a non-success step.
const EXIT_SOURCE_UNAVAILABLE: u8 = 2;

const DEFAULT_SUBCOMMAND: &str = "extract";

#[derive(Debug, Parser)]
#[command(name = "rsl-cli")]
#[command(about = "Load top subreddit posts into the raw_posts staging table")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch one page of top posts and upsert them.
    Extract(ExtractArgs),
    /// Run the downstream dbt transform.
    Transform(TransformArgs),
    /// Extract, then transform if extraction succeeded.
    Run {
        #[command(flatten)]
        extract: ExtractArgs,
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Create the staging table if it does not exist.
    Migrate(PostgresArgs),
}

impl Cli {
    /// Parses argv, running `extract` when no subcommand is named. Top-level
    /// flags then belong to `extract`, so a bare `rsl-cli` driven by env vars works.
    fn try_parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut argv: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let names_subcommand = argv.get(1).and_then(|arg| arg.to_str()).is_some_and(|first| {
            matches!(first, "help" | "-h" | "--help")
                || Self::command().find_subcommand(first).is_some()
        });
        if !argv.is_empty() && !names_subcommand {
            argv.insert(1, OsString::from(DEFAULT_SUBCOMMAND));
        }
        Self::try_parse_from(argv)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::try_parse_args(std::env::args_os()).unwrap_or_else(|err| err.exit());
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Extract(args) => {
            let summary = extract(&args).await?;
            Ok(exit_code_for(&summary))
        }
        Commands::Transform(args) => {
            args.to_step().run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { extract: args, transform } => {
            let summary = extract(&args).await?;
            if !summary.outcome.is_success() {
                warn!("extraction did not succeed; transform not started");
                return Ok(exit_code_for(&summary));
            }
            transform.to_step().run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Migrate(args) => {
            rsl_sync::ensure_staging_schema(&args.to_config()).await?;
            info!("staging table ready");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn extract(args: &ExtractArgs) -> Result<IngestSummary> {
    let config = args.to_config()?;
    let summary = rsl_sync::run_ingest(&config).await?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string(&summary).context("serializing run summary")?
        );
    } else {
        println!("{summary}");
    }
    Ok(summary)
}

fn exit_code_for(summary: &IngestSummary) -> ExitCode {
    if summary.outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_SOURCE_UNAVAILABLE)
    }
}
