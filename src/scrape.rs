use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{ACCEPT, USER_AGENT};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::ScrapeArgs;

const DEFAULT_USER_AGENT: &str = concat!("news2epub/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("fetch {url}: {error:#}")]
    Transport { url: String, error: anyhow::Error },
    #[error("content container `{selector}` not found in {url}")]
    MissingContainer { url: String, selector: String },
    #[error("invalid selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Where the article body lives on a page: the first element matching
/// `container`, and within it every element matching `item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRules {
    pub container: String,
    #[serde(default = "default_item")]
    pub item: String,
}

fn default_item() -> String {
    "p".to_owned()
}

impl ContentRules {
    pub fn new(container: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            item: item.into(),
        }
    }
}

impl Default for ContentRules {
    fn default() -> Self {
        Self::new("div.content__article-body", default_item())
    }
}

pub fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|err| ScrapeError::InvalidSelector {
        selector: selector.to_owned(),
        message: err.to_string(),
    })
}

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("build http client")
}

/// GETs `url` and returns the response body, failing on non-2xx statuses.
pub fn fetch_html(client: &reqwest::blocking::Client, url: &str) -> anyhow::Result<String> {
    let response = client
        .get(url)
        .header(USER_AGENT, DEFAULT_USER_AGENT)
        .header(ACCEPT, "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
        .send()
        .with_context(|| format!("GET {url}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("GET {url}: HTTP {status}");
    }
    response.text().context("read response body")
}

/// Concatenates the outer HTML of the body items inside the content
/// container, in document order.
pub fn extract_body(document: &Html, rules: &ContentRules) -> Result<Option<String>, ScrapeError> {
    let container_selector = parse_selector(&rules.container)?;
    let item_selector = parse_selector(&rules.item)?;

    let Some(container) = document.select(&container_selector).next() else {
        return Ok(None);
    };

    Ok(Some(
        container
            .select(&item_selector)
            .map(|item: ElementRef<'_>| item.html())
            .collect::<String>(),
    ))
}

/// Prints what the given rules extract from one page, to check selectors
/// against a site's current markup.
pub fn run(args: ScrapeArgs) -> anyhow::Result<()> {
    let url = Url::parse(&args.url).context("parse --url")?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("--url must be http/https: {url}");
    }

    let client = http_client(Duration::from_secs(args.timeout_secs.max(1)))?;
    let scraper = Scraper::new(client, ContentRules::new(args.container, args.item));
    let body = scraper.scrape(url.as_str())?;
    println!("{body}");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Scraper {
    client: reqwest::blocking::Client,
    rules: ContentRules,
}

impl Scraper {
    pub fn new(client: reqwest::blocking::Client, rules: ContentRules) -> Self {
        Self { client, rules }
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    pub fn scrape(&self, url: &str) -> Result<String, ScrapeError> {
        let document = self.fetch_document(url)?;
        self.extract_document(url, &document)
    }

    pub fn fetch_document(&self, url: &str) -> Result<Html, ScrapeError> {
        let html = fetch_html(&self.client, url).map_err(|error| ScrapeError::Transport {
            url: url.to_owned(),
            error,
        })?;
        Ok(Html::parse_document(&html))
    }

    pub fn extract_document(&self, url: &str, document: &Html) -> Result<String, ScrapeError> {
        let body = extract_body(document, &self.rules)?;
        let body = body.ok_or_else(|| ScrapeError::MissingContainer {
            url: url.to_owned(),
            selector: self.rules.container.clone(),
        })?;
        tracing::debug!(url, bytes = body.len(), "scraped article body");
        Ok(body)
    }
}
