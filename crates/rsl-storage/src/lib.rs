//! Postgres staging storage: schema bootstrap and idempotent bulk insert of
//! projected posts into `raw_posts`.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use rsl_core::RawPost;
use sqlx::postgres::{PgConnection, Postgres};
use sqlx::{Connection, FromRow, QueryBuilder};
use thiserror::Error;
use tracing::{debug, info};

pub use sqlx::postgres::PgConnectOptions;

pub const CRATE_NAME: &str = "rsl-storage";

pub const RAW_POSTS_TABLE: &str = "raw_posts";

const RAW_POST_COLUMNS: [&str; 10] = [
    "id",
    "title",
    "author",
    "num_comments",
    "upvote_ratio",
    "score",
    "created_utc",
    "over_18",
    "url",
    "subreddit",
];

/// Postgres caps a statement at 65535 bind parameters.
const MAX_ROWS_PER_STATEMENT: usize = u16::MAX as usize / RAW_POST_COLUMNS.len();

#[derive(Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PostgresConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .application_name("rsl")
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connecting to postgres: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("invalid connection url: {0}")]
    InvalidUrl(#[source] sqlx::Error),
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("creating table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("inserting into {table}: {source}")]
    Insert {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("querying {table}: {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("closing postgres connection: {0}")]
    Close(#[source] sqlx::Error),
}

fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            title TEXT,
            author TEXT,
            num_comments INTEGER,
            upvote_ratio REAL,
            score INTEGER,
            created_utc TIMESTAMP,
            over_18 BOOLEAN,
            url TEXT,
            subreddit TEXT
        )"
    )
}

#[derive(Debug, FromRow)]
struct RawPostRow {
    id: String,
    title: Option<String>,
    author: Option<String>,
    num_comments: Option<i32>,
    upvote_ratio: Option<f32>,
    score: Option<i32>,
    created_utc: Option<NaiveDateTime>,
    over_18: Option<bool>,
    url: Option<String>,
    subreddit: Option<String>,
}

/// Columns are nullable at the SQL level; rows this crate wrote always have them set.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPost {
    pub id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub num_comments: Option<i32>,
    pub upvote_ratio: Option<f32>,
    pub score: Option<i32>,
    pub created_utc: Option<chrono::DateTime<chrono::Utc>>,
    pub over_18: Option<bool>,
    pub url: Option<String>,
    pub subreddit: Option<String>,
}

impl From<RawPostRow> for StoredPost {
    fn from(row: RawPostRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            author: row.author,
            num_comments: row.num_comments,
            upvote_ratio: row.upvote_ratio,
            score: row.score,
            created_utc: row.created_utc.map(|ts| ts.and_utc()),
            over_18: row.over_18,
            url: row.url,
            subreddit: row.subreddit,
        }
    }
}

pub struct StagingStore {
    conn: PgConnection,
    table: String,
}

impl fmt::Debug for StagingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl StagingStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        Self::connect_with(&config.connect_options()).await
    }

    pub async fn connect_url(url: &str) -> Result<Self, StorageError> {
        let options = PgConnectOptions::from_str(url).map_err(StorageError::InvalidUrl)?;
        Self::connect_with(&options).await
    }

    pub async fn connect_with(options: &PgConnectOptions) -> Result<Self, StorageError> {
        let conn = PgConnection::connect_with(options)
            .await
            .map_err(StorageError::Connect)?;
        debug!(host = options.get_host(), "postgres connection opened");
        Ok(Self {
            conn,
            table: RAW_POSTS_TABLE.to_string(),
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self, StorageError> {
        let table = table.into();
        if !is_valid_table_name(&table) {
            return Err(StorageError::InvalidTableName(table));
        }
        self.table = table;
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the staging table if it is missing. Never alters an existing table.
    pub async fn ensure_raw_table_exists(&mut self) -> Result<(), StorageError> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&mut self.conn)
            .await
            .map_err(|source| StorageError::Schema {
                table: self.table.clone(),
                source,
            })?;
        debug!(table = %self.table, "staging table ensured");
        Ok(())
    }

    /// Bulk insert with `ON CONFLICT (id) DO NOTHING` in one transaction.
    /// Returns the number of rows actually inserted; conflicting ids are skipped.
    pub async fn insert_raw_posts(&mut self, posts: &[RawPost]) -> Result<u64, StorageError> {
        if posts.is_empty() {
            return Ok(0);
        }

        let table = self.table.clone();
        let insert_err = |source| StorageError::Insert {
            table: table.clone(),
            source,
        };

        let mut tx = self.conn.begin().await.map_err(insert_err)?;
        let mut inserted = 0u64;
        for chunk in posts.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} ({}) ",
                RAW_POST_COLUMNS.join(", ")
            ));
            qb.push_values(chunk, |mut b, post| {
                b.push_bind(post.id.clone())
                    .push_bind(post.title.clone())
                    .push_bind(post.author.clone())
                    .push_bind(post.num_comments)
                    .push_bind(post.upvote_ratio)
                    .push_bind(post.score)
                    .push_bind(post.created_utc.naive_utc())
                    .push_bind(post.over_18)
                    .push_bind(post.url.clone())
                    .push_bind(post.subreddit.clone());
            });
            qb.push(" ON CONFLICT (id) DO NOTHING");

            let result = qb.build().execute(&mut *tx).await.map_err(insert_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(insert_err)?;

        info!(
            table = %self.table,
            batch = posts.len(),
            inserted,
            skipped = posts.len() as u64 - inserted,
            "staging upsert committed"
        );
        Ok(inserted)
    }

    pub async fn count_rows(&mut self) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&mut self.conn)
            .await
            .map_err(|source| StorageError::Query {
                table: self.table.clone(),
                source,
            })
    }

    pub async fn fetch_post(&mut self, id: &str) -> Result<Option<StoredPost>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            RAW_POST_COLUMNS.join(", "),
            self.table
        );
        let row = sqlx::query_as::<_, RawPostRow>(&sql)
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|source| StorageError::Query {
                table: self.table.clone(),
                source,
            })?;
        Ok(row.map(StoredPost::from))
    }

    pub async fn drop_table(&mut self) -> Result<(), StorageError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.table);
        sqlx::query(&sql)
            .execute(&mut self.conn)
            .await
            .map_err(|source| StorageError::Schema {
                table: self.table.clone(),
                source,
            })?;
        Ok(())
    }

    pub async fn close(self) -> Result<(), StorageError> {
        self.conn.close().await.map_err(StorageError::Close)?;
        debug!("postgres connection closed");
        Ok(())
    }
}
