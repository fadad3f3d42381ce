//! Reddit API connector: app-only OAuth session, top-listing fetch, and
//! projection of listing children into staging rows.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};
use rsl_core::{ListingRequest, RawPost};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "rsl-reddit";

pub const DEFAULT_AUTH_BASE_URL: &str = "https://www.reddit.com";
pub const DEFAULT_API_BASE_URL: &str = "https://oauth.reddit.com";

const DELETED_AUTHOR: &str = "[deleted]";

const POST_KIND: &str = "t3";

#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub credentials: RedditCredentials,
    pub auth_base_url: String,
    pub api_base_url: String,
    pub timeout: Duration,
}

impl RedditConfig {
    pub fn new(credentials: RedditCredentials) -> Self {
        Self {
            credentials,
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.auth_base_url = base_url.clone();
        self.api_base_url = base_url;
        self
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("token request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("token endpoint rejected credentials (http {status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("post {id}: field {field} value {value} is out of range")]
    OutOfRange {
        id: String,
        field: &'static str,
        value: String,
    },
    #[error("post payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("subreddit r/{subreddit} not found or inaccessible")]
    SubredditNotFound { subreddit: String },
    #[error("listing request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("listing body could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingDisposition {
    Content,
    NotFound,
    Failed,
}

/// Nonexistent subreddits redirect to the search page; banned and private
/// ones answer 404 or 403.
pub fn classify_listing_status(status: StatusCode) -> ListingDisposition {
    if status.is_success() {
        ListingDisposition::Content
    } else if status.is_redirection()
        || status == StatusCode::NOT_FOUND
        || status == StatusCode::FORBIDDEN
    {
        ListingDisposition::NotFound
    } else {
        ListingDisposition::Failed
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    /// A string code on the OAuth path, a number on the JSON error path.
    #[serde(default)]
    error: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<ListingChild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingChild {
    pub kind: String,
    pub data: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub score: i64,
    pub created_utc: f64,
    #[serde(default)]
    pub over_18: bool,
    pub url: String,
}

pub fn epoch_seconds_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

fn out_of_range(id: &str, field: &'static str, value: impl fmt::Display) -> ProjectionError {
    ProjectionError::OutOfRange {
        id: id.to_string(),
        field,
        value: value.to_string(),
    }
}

pub fn project_post(post: PostData, subreddit: &str) -> Result<RawPost, ProjectionError> {
    let num_comments = i32::try_from(post.num_comments)
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| out_of_range(&post.id, "num_comments", post.num_comments))?;
    let score =
        i32::try_from(post.score).map_err(|_| out_of_range(&post.id, "score", post.score))?;
    if !(0.0..=1.0).contains(&post.upvote_ratio) {
        return Err(out_of_range(&post.id, "upvote_ratio", post.upvote_ratio));
    }
    let created_utc = epoch_seconds_to_utc(post.created_utc)
        .ok_or_else(|| out_of_range(&post.id, "created_utc", post.created_utc))?;
    let author = post
        .author
        .filter(|name| !name.is_empty() && name != DELETED_AUTHOR);

    Ok(RawPost {
        id: post.id,
        title: post.title,
        author,
        num_comments,
        upvote_ratio: post.upvote_ratio as f32,
        score,
        created_utc,
        over_18: post.over_18,
        url: post.url,
        subreddit: subreddit.to_string(),
    })
}

pub fn project_listing(listing: Listing, subreddit: &str) -> Result<Vec<RawPost>, ProjectionError> {
    listing
        .data
        .children
        .into_iter()
        .filter(|child| child.kind == POST_KIND)
        .map(|child| {
            let post: PostData = serde_json::from_value(child.data)?;
            project_post(post, subreddit)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RedditClient {
    config: RedditConfig,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Self {
        Self { config }
    }

    pub async fn connect(&self) -> Result<RedditSession, ConnectError> {
        let creds = &self.config.credentials;
        let http = reqwest::Client::builder()
            .gzip(true)
            .timeout(self.config.timeout)
            .user_agent(creds.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ConnectError::Client)?;

        let token_url = format!(
            "{}/api/v1/access_token",
            self.config.auth_base_url.trim_end_matches('/')
        );
        let resp = http
            .post(&token_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(ConnectError::Request)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(ConnectError::Request)?;
        let parsed = serde_json::from_slice::<TokenResponse>(&body).ok();

        match parsed {
            Some(TokenResponse {
                access_token: Some(token),
                ..
            }) if status.is_success() && !token.is_empty() => {
                debug!(client_id = %creds.client_id, "obtained app-only access token");
                Ok(RedditSession {
                    http,
                    access_token: token,
                    api_base_url: self.config.api_base_url.trim_end_matches('/').to_string(),
                })
            }
            other => Err(ConnectError::Rejected {
                status: status.as_u16(),
                message: match other.and_then(|t| t.error) {
                    Some(JsonValue::String(code)) => code,
                    Some(code) => code.to_string(),
                    None => String::from_utf8_lossy(&body).trim().to_string(),
                },
            }),
        }
    }
}

pub struct RedditSession {
    http: reqwest::Client,
    access_token: String,
    api_base_url: String,
}

impl fmt::Debug for RedditSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditSession")
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

impl RedditSession {
    /// Fetches one page of top posts and projects it. Redirects are not followed,
    /// so a missing subreddit shows up as [`FetchError::SubredditNotFound`].
    pub async fn top_posts(&self, request: &ListingRequest) -> Result<Vec<RawPost>, FetchError> {
        let url = format!("{}/r/{}/top", self.api_base_url, request.subreddit);
        let limit = request.limit.to_string();
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("t", request.time_filter.as_str()),
                ("limit", limit.as_str()),
                ("raw_json", "1"),
            ])
            .send()
            .await?;

        let status = resp.status();
        match classify_listing_status(status) {
            ListingDisposition::Content => {}
            ListingDisposition::NotFound => {
                let location = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                debug!(status = status.as_u16(), location, "listing not available");
                return Err(FetchError::SubredditNotFound {
                    subreddit: request.subreddit.clone(),
                });
            }
            ListingDisposition::Failed => {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }
        }

        let listing = resp.json::<Listing>().await.map_err(FetchError::Decode)?;
        Ok(project_listing(listing, &request.subreddit)?)
    }
}

#[async_trait]
pub trait PostSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_top(&self, request: &ListingRequest) -> Result<Vec<RawPost>, SourceError>;
}

#[async_trait]
impl PostSource for RedditClient {
    fn source_id(&self) -> &'static str {
        "reddit"
    }

    async fn fetch_top(&self, request: &ListingRequest) -> Result<Vec<RawPost>, SourceError> {
        let span = info_span!(
            "reddit_fetch",
            subreddit = %request.subreddit,
            time_filter = %request.time_filter,
            limit = request.limit
        );
        async {
            let session = self.connect().await?;
            let posts = session.top_posts(request).await?;
            drop(session);
            Ok::<_, SourceError>(posts)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_json(id: &str, author: JsonValue, created_utc: f64) -> JsonValue {
        json!({
            "id": id,
            "title": format!("title {id}"),
            "author": author,
            "num_comments": 12,
            "upvote_ratio": 0.97,
            "score": 345,
            "created_utc": created_utc,
            "over_18": false,
            "url": format!("https://example.com/{id}"),
            "selftext": "ignored",
        })
    }

    #[test]
    fn epoch_seconds_convert_to_absolute_timestamp() {
        let ts = epoch_seconds_to_utc(1_700_000_000.0).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20+00:00");

        let fractional = epoch_seconds_to_utc(1_700_000_000.5).unwrap();
        assert_eq!(fractional.timestamp_subsec_millis(), 500);

        assert!(epoch_seconds_to_utc(f64::NAN).is_none());
        assert!(epoch_seconds_to_utc(1e20).is_none());
    }

    #[test]
    fn projection_maps_fields_and_attaches_subreddit() {
        let post: PostData =
            serde_json::from_value(post_json("abc123", json!("spez"), 1_700_000_000.0)).unwrap();
        let row = project_post(post, "rust").unwrap();

        assert_eq!(row.id, "abc123");
        assert_eq!(row.title, "title abc123");
        assert_eq!(row.author.as_deref(), Some("spez"));
        assert_eq!(row.num_comments, 12);
        assert!((row.upvote_ratio - 0.97).abs() < f32::EPSILON);
        assert_eq!(row.score, 345);
        assert_eq!(row.created_utc.to_rfc3339(), "2023-11-14T22:13:20+00:00");
        assert!(!row.over_18);
        assert_eq!(row.url, "https://example.com/abc123");
        assert_eq!(row.subreddit, "rust");
    }

    #[test]
    fn missing_or_deleted_author_projects_to_none() {
        for author in [JsonValue::Null, json!("[deleted]"), json!("")] {
            let post: PostData =
                serde_json::from_value(post_json("x1", author, 1_700_000_000.0)).unwrap();
            assert_eq!(project_post(post, "rust").unwrap().author, None);
        }

        let mut raw = post_json("x2", JsonValue::Null, 1_700_000_000.0);
        raw.as_object_mut().unwrap().remove("author");
        let post: PostData = serde_json::from_value(raw).unwrap();
        assert_eq!(project_post(post, "rust").unwrap().author, None);
    }

    #[test]
    fn negative_score_is_kept_but_negative_comments_are_rejected() {
        let mut raw = post_json("neg", json!("a"), 1_700_000_000.0);
        raw["score"] = json!(-17);
        let post: PostData = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(project_post(post, "rust").unwrap().score, -17);

        raw["num_comments"] = json!(-1);
        let post: PostData = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            project_post(post, "rust"),
            Err(ProjectionError::OutOfRange { field: "num_comments", .. })
        ));
    }

    #[test]
    fn listing_projection_keeps_order_and_skips_non_posts() {
        let listing: Listing = serde_json::from_value(json!({
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    { "kind": "t3", "data": post_json("b", json!("x"), 1.0) },
                    { "kind": "t1", "data": { "body": "a comment" } },
                    { "kind": "t3", "data": post_json("a", json!("y"), 2.0) },
                ]
            }
        }))
        .unwrap();

        let rows = project_listing(listing, "rust").unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
    }

    #[test]
    fn status_classification_separates_not_found() {
        assert_eq!(classify_listing_status(StatusCode::OK), ListingDisposition::Content);
        assert_eq!(classify_listing_status(StatusCode::FOUND), ListingDisposition::NotFound);
        assert_eq!(
            classify_listing_status(StatusCode::MOVED_PERMANENTLY),
            ListingDisposition::NotFound
        );
        assert_eq!(classify_listing_status(StatusCode::NOT_FOUND), ListingDisposition::NotFound);
        assert_eq!(classify_listing_status(StatusCode::FORBIDDEN), ListingDisposition::NotFound);
        assert_eq!(
            classify_listing_status(StatusCode::INTERNAL_SERVER_ERROR),
            ListingDisposition::Failed
        );
        assert_eq!(
            classify_listing_status(StatusCode::TOO_MANY_REQUESTS),
            ListingDisposition::Failed
        );
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = RedditCredentials {
            client_id: "id".into(),
            client_secret: "hunter2".into(),
            user_agent: "ua".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
