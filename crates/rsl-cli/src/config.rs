//! Flag/environment binding for the trigger binary. Library crates never read
//! the environment; this module turns parsed arguments into explicit configs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use rsl_core::{ListingRequest, TimeFilter};
use rsl_reddit::{RedditConfig, RedditCredentials};
use rsl_storage::PostgresConfig;
use rsl_sync::{IngestConfig, TransformStep};

#[derive(Debug, Clone, Args)]
pub struct RedditArgs {
    /// OAuth application id.
    #[arg(long, env = "REDDIT_CLIENT_ID")]
    pub client_id: String,
    #[arg(long, env = "REDDIT_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,
    /// Descriptive user agent, e.g. "staging-loader/0.1 by u/someone".
    #[arg(long, env = "REDDIT_USER_AGENT")]
    pub user_agent: String,
    #[arg(long, env = "REDDIT_HTTP_TIMEOUT_SECS", default_value_t = 20)]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct ListingArgs {
    #[arg(long, env = "SUBREDDIT")]
    pub subreddit: String,
    /// hour, day, week, month, year or all.
    #[arg(long, env = "TIME_FILTER", default_value = "day")]
    pub time_filter: TimeFilter,
    #[arg(long, env = "POST_LIMIT", default_value_t = 10)]
    pub limit: u32,
}

#[derive(Debug, Clone, Args)]
pub struct PostgresArgs {
    #[arg(long = "pg-host", env = "POSTGRES_HOST", default_value = "localhost")]
    pub host: String,
    #[arg(long = "pg-port", env = "POSTGRES_PORT", default_value_t = 5432)]
    pub port: u16,
    #[arg(long = "pg-database", env = "POSTGRES_DB")]
    pub database: String,
    #[arg(long = "pg-user", env = "POSTGRES_USER")]
    pub user: String,
    #[arg(long = "pg-password", env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, Clone, Args)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub reddit: RedditArgs,
    #[command(flatten)]
    pub listing: ListingArgs,
    #[command(flatten)]
    pub postgres: PostgresArgs,
    /// Print the run summary as JSON instead of a log line.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Args)]
pub struct TransformArgs {
    #[arg(long = "dbt-project-dir", env = "DBT_PROJECT_DIR")]
    pub project_dir: PathBuf,
    /// Defaults to the project directory.
    #[arg(long = "dbt-profiles-dir", env = "DBT_PROFILES_DIR")]
    pub profiles_dir: Option<PathBuf>,
    #[arg(long = "dbt-bin", env = "DBT_BIN", default_value = "dbt")]
    pub program: String,
}

impl RedditArgs {
    pub fn to_config(&self) -> RedditConfig {
        let mut config = RedditConfig::new(RedditCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            user_agent: self.user_agent.clone(),
        });
        config.timeout = Duration::from_secs(self.http_timeout_secs.max(1));
        config
    }
}

impl PostgresArgs {
    pub fn to_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

impl ExtractArgs {
    pub fn to_config(&self) -> Result<IngestConfig> {
        let request = ListingRequest::new(
            self.listing.subreddit.clone(),
            self.listing.time_filter,
            self.listing.limit,
        )
        .context("invalid listing parameters")?;
        Ok(IngestConfig {
            reddit: self.reddit.to_config(),
            request,
            postgres: self.postgres.to_config(),
        })
    }
}

impl TransformArgs {
    pub fn to_step(&self) -> TransformStep {
        let profiles_dir = self
            .profiles_dir
            .clone()
            .unwrap_or_else(|| self.project_dir.clone());
        let mut step = TransformStep::dbt(self.project_dir.clone(), profiles_dir);
        step.program = self.program.clone();
        step
    }
}
