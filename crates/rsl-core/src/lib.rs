//! Core domain model for the Reddit staging loader.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "rsl-core";

/// Largest page the listing endpoint will return in one request.
pub const MAX_LISTING_LIMIT: u32 = 100;

/// One post projected to the `raw_posts` staging row shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub num_comments: i32,
    pub upvote_ratio: f32,
    pub score: i32,
    pub created_utc: DateTime<Utc>,
    pub over_18: bool,
    pub url: String,
    pub subreddit: String,
}

/// Ranking window used when asking for "top" posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub const ALL: [TimeFilter; 6] = [
        TimeFilter::Hour,
        TimeFilter::Day,
        TimeFilter::Week,
        TimeFilter::Month,
        TimeFilter::Year,
        TimeFilter::All,
    ];

    /// Value of the `t` query parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| RequestError::UnknownTimeFilter(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("unknown time filter {0:?} (expected hour, day, week, month, year or all)")]
    UnknownTimeFilter(String),
    #[error("subreddit name must not be empty")]
    EmptySubreddit,
    #[error("subreddit name {0:?} contains characters outside [A-Za-z0-9_]")]
    InvalidSubreddit(String),
    #[error("limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { got: u32, max: u32 },
}

/// A bounded request for the top posts of one subreddit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRequest {
    pub subreddit: String,
    pub time_filter: TimeFilter,
    pub limit: u32,
}

impl ListingRequest {
    /// Builds a request, rejecting names that would escape the `/r/{name}` path
    /// segment and limits the API cannot serve in one page.
    pub fn new(
        subreddit: impl Into<String>,
        time_filter: TimeFilter,
        limit: u32,
    ) -> Result<Self, RequestError> {
        let raw = subreddit.into();
        let trimmed = raw.trim();
        let subreddit = trimmed.strip_prefix("r/").unwrap_or(trimmed).to_string();

        if subreddit.is_empty() {
            return Err(RequestError::EmptySubreddit);
        }
        if !subreddit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(RequestError::InvalidSubreddit(subreddit));
        }
        if limit == 0 || limit > MAX_LISTING_LIMIT {
            return Err(RequestError::LimitOutOfRange {
                got: limit,
                max: MAX_LISTING_LIMIT,
            });
        }

        Ok(Self {
            subreddit,
            time_filter,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_filter_parses_case_insensitively() {
        assert_eq!("day".parse::<TimeFilter>().unwrap(), TimeFilter::Day);
        assert_eq!(" WEEK ".parse::<TimeFilter>().unwrap(), TimeFilter::Week);
        assert_eq!("All".parse::<TimeFilter>().unwrap(), TimeFilter::All);
        assert!(matches!(
            "fortnight".parse::<TimeFilter>(),
            Err(RequestError::UnknownTimeFilter(_))
        ));
    }

    #[test]
    fn time_filter_wire_format_is_lowercase() {
        for tf in TimeFilter::ALL {
            let json = serde_json::to_string(&tf).unwrap();
            assert_eq!(json, format!("\"{}\"", tf.as_str()));
            assert_eq!(tf.to_string().parse::<TimeFilter>().unwrap(), tf);
        }
        assert_eq!(TimeFilter::default(), TimeFilter::Day);
    }

    #[test]
    fn listing_request_normalizes_prefix() {
        let req = ListingRequest::new(" r/rust ", TimeFilter::Day, 10).unwrap();
        assert_eq!(req.subreddit, "rust");
        assert_eq!(req.limit, 10);
    }

    #[test]
    fn listing_request_rejects_bad_input() {
        assert_eq!(
            ListingRequest::new("", TimeFilter::Day, 10),
            Err(RequestError::EmptySubreddit)
        );
        assert!(matches!(
            ListingRequest::new("rust/../admin", TimeFilter::Day, 10),
            Err(RequestError::InvalidSubreddit(_))
        ));
        assert_eq!(
            ListingRequest::new("rust", TimeFilter::Day, 0),
            Err(RequestError::LimitOutOfRange { got: 0, max: 100 })
        );
        assert_eq!(
            ListingRequest::new("rust", TimeFilter::Day, 101),
            Err(RequestError::LimitOutOfRange { got: 101, max: 100 })
        );
        assert!(ListingRequest::new("rust", TimeFilter::Day, 100).is_ok());
    }
}
