use anyhow::Context as _;
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::article::{Article, Content, DeferredContent};
use crate::formats::{SearchEnvelope, SearchErrorEnvelope, SearchResponse, SearchResult};
use crate::observe::{Event, Observer};
use crate::scrape::{ContentRules, Scraper};
use crate::source::{Exclusions, Source, parse_timestamp};

pub const API_KEY_ENV: &str = "GUARDIAN_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// Falls back to `GUARDIAN_API_KEY` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub section: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Ask the API for `fields.body` so most articles need no scraping.
    #[serde(default = "default_embedded_body")]
    pub embedded_body: bool,
    #[serde(default)]
    pub exclude: Exclusions,
    #[serde(default)]
    pub content: ContentRules,
}

fn default_name() -> String {
    "guardian".to_owned()
}

fn default_base_url() -> String {
    "https://content.guardianapis.com".to_owned()
}

fn default_page_size() -> u32 {
    50
}

fn default_embedded_body() -> bool {
    true
}

#[derive(Debug)]
pub struct GuardianSource {
    settings: GuardianSettings,
    api_key: String,
    scraper: Scraper,
}

impl GuardianSource {
    pub fn new(settings: GuardianSettings, client: reqwest::blocking::Client) -> anyhow::Result<Self> {
        let api_key = match settings.api_key.clone() {
            Some(key) if !key.trim().is_empty() => key,
            _ => std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "{API_KEY_ENV} is not set and source `{}` has no api_key",
                        settings.name
                    )
                })?,
        };
        let scraper = Scraper::new(client, settings.content.clone());

        Ok(Self {
            settings,
            api_key,
            scraper,
        })
    }

    fn search(&self, since: NaiveDate, page: u32) -> anyhow::Result<SearchResponse> {
        let endpoint = search_endpoint(&self.settings.base_url);
        let mut query = vec![
            ("api-key", self.api_key.clone()),
            ("section", self.settings.section.clone()),
            ("from-date", since.format("%Y-%m-%d").to_string()),
            ("page", page.to_string()),
            ("page-size", self.settings.page_size.to_string()),
        ];
        if self.settings.embedded_body {
            query.push(("show-fields", "body".to_owned()));
        }

        let response = self
            .scraper
            .client()
            .get(&endpoint)
            .query(&query)
            .header(USER_AGENT, concat!("news2epub/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/json")
            .send()
            .with_context(|| format!("GET {endpoint} (page {page})"))?;

        let status = response.status();
        let raw = response.text().context("read search response body")?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            anyhow::bail!("search API error ({status}) on page {page}: {message}");
        }

        let envelope: SearchEnvelope =
            serde_json::from_str(&raw).with_context(|| format!("parse search page {page}"))?;
        let response = envelope.response;
        if !response.status.is_empty() && response.status != "ok" {
            let message = response.message.as_deref().unwrap_or("no message");
            anyhow::bail!("search API returned status {:?}: {message}", response.status);
        }
        Ok(response)
    }

    fn collect(
        &self,
        response: SearchResponse,
        page: u32,
        pages: u32,
        articles: &mut Vec<Article>,
        observer: &dyn Observer,
    ) -> anyhow::Result<()> {
        observer.event(Event::PageFetched {
            source: &self.settings.name,
            page,
            pages,
            results: response.results.len(),
        });

        for result in response.results {
            let excluded = self
                .settings
                .exclude
                .matching(&result.id)
                .or_else(|| self.settings.exclude.matching(&result.web_url));
            if let Some(marker) = excluded {
                observer.event(Event::ArticleExcluded {
                    source: &self.settings.name,
                    id: &result.id,
                    marker,
                });
                continue;
            }
            let article = self
                .normalize(result)
                .with_context(|| format!("normalize result on page {page}"))?;
            articles.push(article);
        }
        Ok(())
    }

    fn normalize(&self, result: SearchResult) -> anyhow::Result<Article> {
        let published_at = parse_timestamp(&result.web_publication_date)
            .with_context(|| format!("parse webPublicationDate of {}", result.id))?;

        let embedded = result
            .fields
            .and_then(|fields| fields.body)
            .filter(|body| !body.trim().is_empty());
        let content = match embedded {
            Some(body) => Content::Inline(body),
            None => {
                let scraper = self.scraper.clone();
                let url = result.web_url.clone();
                Content::Deferred(DeferredContent::new(result.web_url.clone(), move || {
                    Ok(scraper.scrape(&url)?)
                }))
            }
        };

        Ok(Article {
            title: result.web_title,
            published_at,
            content,
            source_id: self.settings.name.clone(),
            section: result
                .section_name
                .or_else(|| Some(self.settings.section.clone())),
            url: Some(result.web_url),
        })
    }
}

impl Source for GuardianSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn fetch(&self, since: NaiveDate, observer: &dyn Observer) -> anyhow::Result<Vec<Article>> {
        let first = self.search(since, 1).context("search page 1")?;
        let pages = first.pages.max(1);

        let mut articles = Vec::new();
        self.collect(first, 1, pages, &mut articles, observer)?;
        for page in 2..=pages {
            let response = self
                .search(since, page)
                .with_context(|| format!("search page {page} of {pages}"))?;
            self.collect(response, page, pages, &mut articles, observer)?;
        }

        Ok(articles)
    }
}

pub fn search_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/search")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let envelope: SearchErrorEnvelope = serde_json::from_str(raw_json).ok()?;
    Some(envelope.response.message)
}
