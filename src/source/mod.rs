//! Pluggable article sources.
//!
//! Every source turns its origin (a search API, a homepage) into a flat list
//! of [`Article`]s. Sources do not sort and do not deduplicate; the pipeline
//! does both.

pub mod atlantic;
pub mod guardian;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::observe::Observer;

pub trait Source {
    /// Used as the article `source_id`, so it must stay stable across runs.
    fn name(&self) -> &str;

    /// Fetches every article published on or after `since`. A transport
    /// failure aborts the whole fetch.
    fn fetch(&self, since: NaiveDate, observer: &dyn Observer) -> anyhow::Result<Vec<Article>>;
}

/// Substring markers identifying items that are not plain articles
/// (live blogs, crosswords, puzzles).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exclusions {
    markers: Vec<String>,
}

impl Exclusions {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the first marker found in `id`, if any.
    pub fn matching(&self, id: &str) -> Option<&str> {
        self.markers
            .iter()
            .map(String::as_str)
            .find(|marker| !marker.is_empty() && id.contains(marker))
    }
}

impl Default for Exclusions {
    fn default() -> Self {
        Self::new(["/live/", "crosswords/", "puzzles/"])
    }
}

/// Parses the timestamp formats sources publish: RFC 3339, a bare
/// `%Y-%m-%dT%H:%M:%S` (taken as UTC) or a bare date.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN).and_utc());
    }
    anyhow::bail!("unrecognized timestamp: {raw:?}")
}
