//! Ingestion routine: fetch one page of top posts, ensure the staging table,
//! and bulk-upsert the rows. Also hosts the downstream transform step.

pub mod transform;

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rsl_core::{ListingRequest, RawPost};
use rsl_reddit::{FetchError, PostSource, RedditClient, RedditConfig, SourceError};
use rsl_storage::{PgConnectOptions, PostgresConfig, StagingStore, StorageError, RAW_POSTS_TABLE};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use transform::{TransformError, TransformStep};

pub const CRATE_NAME: &str = "rsl-sync";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub reddit: RedditConfig,
    pub request: ListingRequest,
    pub postgres: PostgresConfig,
}

/// How a run ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Loaded { fetched: usize, inserted: u64 },
    /// The listing was empty; storage was not touched.
    Empty,
    SubredditNotFound { subreddit: String },
    /// The API session could not be established; extraction was skipped.
    SourceUnavailable { reason: String },
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, IngestOutcome::SourceUnavailable { .. })
    }

    pub fn inserted(&self) -> u64 {
        match self {
            IngestOutcome::Loaded { inserted, .. } => *inserted,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub source: String,
    pub request: ListingRequest,
    pub table: String,
    pub outcome: IngestOutcome,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ingest {}: run_id={} subreddit={} time_filter={} limit={} ",
            if self.outcome.is_success() { "complete" } else { "skipped" },
            self.run_id,
            self.request.subreddit,
            self.request.time_filter,
            self.request.limit
        )?;
        match &self.outcome {
            IngestOutcome::Loaded { fetched, inserted } => {
                write!(f, "fetched={fetched} inserted={inserted} table={}", self.table)
            }
            IngestOutcome::Empty => f.write_str("fetched=0 inserted=0"),
            IngestOutcome::SubredditNotFound { .. } => f.write_str("subreddit not found"),
            IngestOutcome::SourceUnavailable { reason } => write!(f, "source unavailable: {reason}"),
        }
    }
}

pub struct IngestPipeline {
    source: Box<dyn PostSource>,
    storage: PgConnectOptions,
    table: String,
}

impl IngestPipeline {
    pub fn new(reddit: RedditConfig, postgres: &PostgresConfig) -> Self {
        Self::with_source(
            Box::new(RedditClient::new(reddit)),
            postgres.connect_options(),
        )
    }

    pub fn with_source(source: Box<dyn PostSource>, storage: PgConnectOptions) -> Self {
        Self {
            source,
            storage,
            table: RAW_POSTS_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Runs connect → fetch → project → ensure-schema → upsert → close once.
    ///
    /// API connection failures and missing subreddits are reported through
    /// [`IngestOutcome`]; storage failures and other fetch failures are errors.
    pub async fn run_once(&self, request: &ListingRequest) -> Result<IngestSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!(
            "ingest",
            %run_id,
            source = self.source.source_id(),
            subreddit = %request.subreddit
        );

        let outcome = self.ingest(request).instrument(span).await?;

        Ok(IngestSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            source: self.source.source_id().to_string(),
            request: request.clone(),
            table: self.table.clone(),
            outcome,
        })
    }

    async fn ingest(&self, request: &ListingRequest) -> Result<IngestOutcome> {
        let posts = match self.source.fetch_top(request).await {
            Ok(posts) => posts,
            Err(SourceError::Connect(err)) => {
                warn!(error = %err, "api connection failed; skipping extraction");
                return Ok(IngestOutcome::SourceUnavailable {
                    reason: err.to_string(),
                });
            }
            Err(SourceError::Fetch(FetchError::SubredditNotFound { subreddit })) => {
                warn!(%subreddit, "subreddit not found; skipping extraction");
                return Ok(IngestOutcome::SubredditNotFound { subreddit });
            }
            Err(SourceError::Fetch(err)) => {
                return Err(err).context("fetching top posts");
            }
        };

        if posts.is_empty() {
            info!("listing returned no posts; nothing to load");
            return Ok(IngestOutcome::Empty);
        }

        let fetched = posts.len();
        let inserted = self.load(&posts).await?;
        info!(fetched, inserted, table = %self.table, "inserted rows into staging table");
        Ok(IngestOutcome::Loaded { fetched, inserted })
    }

    async fn load(&self, posts: &[RawPost]) -> Result<u64> {
        let mut store = StagingStore::connect_with(&self.storage)
            .await
            .context("connecting to staging database")?
            .with_table(self.table.clone())
            .context("selecting staging table")?;

        let written = write_posts(&mut store, posts).await;
        let closed = store.close().await;

        let inserted = written.context("loading raw posts")?;
        if let Err(err) = closed {
            warn!(error = %err, "staging connection did not close cleanly");
        }
        Ok(inserted)
    }
}

async fn write_posts(store: &mut StagingStore, posts: &[RawPost]) -> Result<u64, StorageError> {
    store.ensure_raw_table_exists().await?;
    store.insert_raw_posts(posts).await
}

pub async fn ensure_staging_schema(postgres: &PostgresConfig) -> Result<()> {
    let mut store = StagingStore::connect(postgres)
        .await
        .context("connecting to staging database")?;
    let created = store.ensure_raw_table_exists().await;
    let closed = store.close().await;
    created.context("creating staging table")?;
    closed.context("closing staging connection")?;
    Ok(())
}

pub async fn run_ingest(config: &IngestConfig) -> Result<IngestSummary> {
    IngestPipeline::new(config.reddit.clone(), &config.postgres)
        .run_once(&config.request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsl_core::TimeFilter;

    fn summary(outcome: IngestOutcome) -> IngestSummary {
        IngestSummary {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            source: "reddit".into(),
            request: ListingRequest::new("rust", TimeFilter::Day, 10).unwrap(),
            table: RAW_POSTS_TABLE.into(),
            outcome,
        }
    }

    #[test]
    fn only_source_unavailable_is_a_failure() {
        assert!(IngestOutcome::Loaded { fetched: 1, inserted: 0 }.is_success());
        assert!(IngestOutcome::Empty.is_success());
        assert!(IngestOutcome::SubredditNotFound { subreddit: "x".into() }.is_success());
        assert!(!IngestOutcome::SourceUnavailable { reason: "down".into() }.is_success());
    }

    #[test]
    fn summary_line_reports_counts() {
        let line = summary(IngestOutcome::Loaded { fetched: 10, inserted: 7 }).to_string();
        assert!(line.starts_with("ingest complete: run_id="));
        assert!(line.contains("subreddit=rust time_filter=day limit=10"));
        assert!(line.ends_with("fetched=10 inserted=7 table=raw_posts"));

        let skipped = summary(IngestOutcome::SourceUnavailable { reason: "401".into() }).to_string();
        assert!(skipped.starts_with("ingest skipped:"));
        assert!(skipped.ends_with("source unavailable: 401"));
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(IngestOutcome::Loaded { fetched: 3, inserted: 2 }).unwrap();
        assert_eq!(json["status"], "loaded");
        assert_eq!(json["inserted"], 2);

        let json = serde_json::to_value(IngestOutcome::Empty).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "empty" }));
    }
}
