//! Section top stories scraped from a magazine homepage.
//!
//! The homepage has no publication dates, so every story page is fetched up
//! front to read its metadata; the body is extracted from the same response.

use anyhow::Context as _;
use chrono::NaiveDate;
use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::article::{Article, Content};
use crate::formats::ParselyPage;
use crate::observe::{Event, Observer};
use crate::scrape::{ContentRules, Scraper, fetch_html, parse_selector};
use crate::source::{Source, parse_timestamp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtlanticSettings {
    #[serde(default = "default_name")]
    pub name: String,
    pub section: String,
    #[serde(default = "default_homepage")]
    pub homepage: String,
    /// Selector for story links; `{section}` is replaced by `section`.
    #[serde(default = "default_links")]
    pub links: String,
    #[serde(default = "default_metadata")]
    pub metadata: String,
    #[serde(default = "default_content")]
    pub content: ContentRules,
}

fn default_name() -> String {
    "atlantic".to_owned()
}

fn default_homepage() -> String {
    "https://www.theatlantic.com/".to_owned()
}

fn default_links() -> String {
    "ul#nav-channels li.nav-channel.{section} li.dropdown-item a[href]".to_owned()
}

fn default_metadata() -> String {
    "meta[name=\"parsely-page\"]".to_owned()
}

fn default_content() -> ContentRules {
    ContentRules::new("div.article-content[itemprop=\"articleBody\"]", "p")
}

#[derive(Debug)]
pub struct AtlanticSource {
    settings: AtlanticSettings,
    scraper: Scraper,
}

impl AtlanticSource {
    pub fn new(settings: AtlanticSettings, client: reqwest::blocking::Client) -> Self {
        let scraper = Scraper::new(client, settings.content.clone());
        Self { settings, scraper }
    }

    fn story_links(&self, homepage_html: &str) -> anyhow::Result<Vec<String>> {
        let base = Url::parse(&self.settings.homepage).context("parse homepage url")?;
        let links_selector = self
            .settings
            .links
            .replace("{section}", &self.settings.section);
        let selector = parse_selector(&links_selector)?;
        let document = Html::parse_document(homepage_html);

        let mut links: Vec<String> = Vec::new();
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = base.join(href) else {
                tracing::debug!(href, "ignoring unresolvable story link");
                continue;
            };
            let resolved = resolved.to_string();
            if !links.contains(&resolved) {
                links.push(resolved);
            }
        }
        Ok(links)
    }

    fn story(&self, url: &str) -> anyhow::Result<Article> {
        let document = self.scraper.fetch_document(url)?;

        let meta_selector = parse_selector(&self.settings.metadata)?;
        let meta_json = document
            .select(&meta_selector)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .ok_or_else(|| {
                anyhow::anyhow!("page metadata `{}` not found", self.settings.metadata)
            })?;
        let meta: ParselyPage =
            serde_json::from_str(meta_json).context("parse page metadata json")?;
        let published_at = parse_timestamp(&meta.pub_date).context("parse pub_date")?;

        let body = self.scraper.extract_document(url, &document)?;

        Ok(Article {
            title: meta.title,
            published_at,
            content: Content::Inline(body),
            source_id: self.settings.name.clone(),
            section: meta.section.or_else(|| Some(self.settings.section.clone())),
            url: Some(url.to_owned()),
        })
    }
}

impl Source for AtlanticSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn fetch(&self, since: NaiveDate, observer: &dyn Observer) -> anyhow::Result<Vec<Article>> {
        let homepage_html = fetch_html(self.scraper.client(), &self.settings.homepage)
            .context("fetch homepage")?;
        let links = self.story_links(&homepage_html)?;
        observer.event(Event::PageFetched {
            source: &self.settings.name,
            page: 1,
            pages: 1,
            results: links.len(),
        });

        let mut articles = Vec::new();
        for url in &links {
            match self.story(url) {
                Ok(article) if article.published_at.date_naive() < since => {
                    tracing::debug!(url = %url, "story predates --from; dropping");
                }
                Ok(article) => articles.push(article),
                Err(err) => observer.event(Event::ArticleSkipped {
                    title: url.as_str(),
                    url: Some(url.as_str()),
                    error: &err,
                }),
            }
        }
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOMEPAGE: &str = r#"<html><body>
<ul id="nav-channels">
  <li class="nav-channel politics">
    <ul>
      <li class="dropdown-item"><a href="/politics/archive/2015/03/one/1/">One</a></li>
      <li class="dropdown-item"><a href="https://www.theatlantic.com/politics/archive/2015/03/two/2/">Two</a></li>
      <li class="dropdown-item"><a href="/politics/archive/2015/03/one/1/">One again</a></li>
    </ul>
  </li>
  <li class="nav-channel business">
    <ul><li class="dropdown-item"><a href="/business/x/">Biz</a></li></ul>
  </li>
</ul>
</body></html>"#;

    #[test]
    fn story_links_are_scoped_to_section_resolved_and_deduplicated() -> anyhow::Result<()> {
        let settings: AtlanticSettings = serde_yaml::from_str("section: politics\n")?;
        let source = AtlanticSource::new(settings, reqwest::blocking::Client::new());
        let links = source.story_links(HOMEPAGE)?;
        assert_eq!(
            links,
            vec![
                "https://www.theatlantic.com/politics/archive/2015/03/one/1/",
                "https://www.theatlantic.com/politics/archive/2015/03/two/2/",
            ]
        );
        Ok(())
    }
}
