use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};

/// A single news item as produced by a [`crate::source::Source`].
#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub content: Content,
    /// Name of the source the article came from. Part of the dedup key.
    pub source_id: String,
    pub section: Option<String>,
    pub url: Option<String>,
}

/// Article body markup, either already known or fetched when rendered.
#[derive(Debug, Clone)]
pub enum Content {
    Inline(String),
    Deferred(DeferredContent),
}

impl Content {
    pub fn resolve(&self) -> anyhow::Result<String> {
        match self {
            Content::Inline(html) => Ok(html.clone()),
            Content::Deferred(deferred) => deferred.fetch(),
        }
    }
}

type FetchFn = dyn Fn() -> anyhow::Result<String>;

/// Fetch-on-demand handle for article bodies that are not embedded in the
/// source response.
#[derive(Clone)]
pub struct DeferredContent {
    url: String,
    fetch: Rc<FetchFn>,
}

impl DeferredContent {
    pub fn new(url: impl Into<String>, fetch: impl Fn() -> anyhow::Result<String> + 'static) -> Self {
        Self {
            url: url.into(),
            fetch: Rc::new(fetch),
        }
    }

    pub fn fetch(&self) -> anyhow::Result<String> {
        (self.fetch)()
    }
}

impl fmt::Debug for DeferredContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredContent")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Reduces `input` to a URL-safe identifier: characters that are neither
/// alphanumeric nor whitespace are dropped, whitespace runs become `-`, and
/// the result is lower-cased.
pub fn safe_identifier(input: &str) -> String {
    let kept = input
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>();
    kept.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
