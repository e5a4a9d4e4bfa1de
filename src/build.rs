use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{Local, NaiveDate};

use crate::article::Article;
use crate::cli::BuildArgs;
use crate::config::{Config, expand_home};
use crate::epub::NothingToPublish;
use crate::ledger::{Ledger, filter_unseen};
use crate::observe::{Event, Observer, TracingObserver};
use crate::source::Source;

/// Everything a publication run needs besides its sources.
#[derive(Debug, Clone)]
pub struct Plan {
    pub since: NaiveDate,
    pub title: String,
    pub lang: String,
    /// Section name for articles whose source reports none.
    pub default_section: String,
    pub ledger_path: PathBuf,
    pub out_dir: PathBuf,
    pub force: bool,
}

#[derive(Debug, Default)]
pub struct Outcome {
    /// Path of the written EPUB; `None` when there was nothing new.
    pub document: Option<PathBuf>,
    pub chapters: usize,
    pub failed_sources: Vec<String>,
}

pub fn run(args: BuildArgs) -> anyhow::Result<Outcome> {
    let config_path = expand_home(&args.config);
    let config = Config::load(&config_path)?;

    let since = match args.from_date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("--from must be YYYY-MM-DD: {raw}"))?,
        None => Local::now().date_naive(),
    };
    let today = Local::now().format("%A %d %B %Y").to_string();

    let plan = Plan {
        since,
        title: args.title.unwrap_or_else(|| format!("News for {today}")),
        lang: config.language.clone(),
        default_section: format!("Headlines for {today}"),
        ledger_path: expand_home(args.ledger.as_deref().unwrap_or(&config.ledger)),
        out_dir: expand_home(args.out_dir.as_deref().unwrap_or(&config.out_dir)),
        force: args.force,
    };

    let client = crate::scrape::http_client(config.timeout())?;
    let sources = config
        .sources
        .into_iter()
        .map(|source| {
            let name = source.name().to_owned();
            source
                .into_source(client.clone())
                .with_context(|| format!("configure source `{name}`"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        since = %plan.since,
        sources = sources.len(),
        ledger = %plan.ledger_path.display(),
        "build: start"
    );
    publish(&plan, &sources, &TracingObserver)
}

/// fetch → filter unseen → render → write → commit.
///
/// A source that fails to fetch is recorded in [`Outcome::failed_sources`]
/// and the remaining sources are still published. The ledger is only written
/// after the document is.
pub fn publish(
    plan: &Plan,
    sources: &[Box<dyn Source>],
    observer: &dyn Observer,
) -> anyhow::Result<Outcome> {
    let ledger = Ledger::load(&plan.ledger_path).context("load ledger")?;

    let mut outcome = Outcome::default();
    let mut fetched = Vec::new();
    for source in sources {
        match source.fetch(plan.since, observer) {
            Ok(articles) => {
                observer.event(Event::SourceFetched {
                    source: source.name(),
                    articles: articles.len(),
                });
                fetched.extend(articles);
            }
            Err(err) => {
                observer.event(Event::SourceFailed {
                    source: source.name(),
                    error: &err,
                });
                outcome.failed_sources.push(source.name().to_owned());
            }
        }
    }

    let fetched_count = fetched.len();
    let unseen = filter_unseen(fetched, &ledger);
    observer.event(Event::Deduplicated {
        fetched: fetched_count,
        unseen: unseen.len(),
    });

    let sections = group_by_section(unseen, &plan.default_section);
    let document = match crate::epub::build(&plan.title, &plan.lang, sections, observer) {
        Ok(document) => document,
        Err(err) if err.downcast_ref::<NothingToPublish>().is_some() => {
            observer.event(Event::NothingToPublish);
            return Ok(outcome);
        }
        Err(err) => return Err(err).context("build document"),
    };

    let path = crate::epub::write(&document, &plan.out_dir, plan.force).context("write epub")?;
    outcome.chapters = document.chapters().count();
    observer.event(Event::DocumentWritten {
        path: &path.to_string_lossy(),
        chapters: outcome.chapters,
    });

    let committed = crate::ledger::commit(&ledger, document.articles(), &plan.ledger_path)
        .context("commit ledger")?;
    observer.event(Event::LedgerCommitted {
        path: &plan.ledger_path.to_string_lossy(),
        hashes: committed.len(),
    });

    outcome.document = Some(path);
    Ok(outcome)
}

fn group_by_section(
    articles: Vec<Article>,
    default_section: &str,
) -> BTreeMap<String, Vec<Article>> {
    let mut sections: BTreeMap<String, Vec<Article>> = BTreeMap::new();
    for article in articles {
        let name = article
            .section
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_section.to_owned());
        sections.entry(name).or_default().push(article);
    }
    sections
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;
    use crate::article::{Content, DeferredContent};
    use crate::ledger::ArticleHash;
    use crate::observe::RecordingObserver;

    struct FakeSource {
        name: &'static str,
        articles: Vec<Article>,
        fail: bool,
    }

    impl Source for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        fn fetch(
            &self,
            _since: NaiveDate,
            _observer: &dyn Observer,
        ) -> anyhow::Result<Vec<Article>> {
            if self.fail {
                anyhow::bail!("connection refused");
            }
            Ok(self.articles.clone())
        }
    }

    fn article(source: &str, title: &str, day: u32) -> Article {
        Article {
            title: title.to_owned(),
            published_at: Utc.with_ymd_and_hms(2015, 3, day, 9, 0, 0).unwrap(),
            content: Content::Inline(format!("<p>{title}</p>")),
            source_id: source.to_owned(),
            section: None,
            url: None,
        }
    }

    fn plan(dir: &std::path::Path) -> Plan {
        Plan {
            since: NaiveDate::from_ymd_opt(2015, 3, 1).unwrap(),
            title: "Test News".to_owned(),
            lang: "en".to_owned(),
            default_section: "Headlines".to_owned(),
            ledger_path: dir.join("published.ledger"),
            out_dir: dir.join("out"),
            force: false,
        }
    }

    fn source(name: &'static str, articles: Vec<Article>) -> Box<dyn Source> {
        Box::new(FakeSource {
            name,
            articles,
            fail: false,
        })
    }

    #[test]
    fn publishes_only_unseen_articles_and_commits_them() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        let a = article("guardian", "A", 1);
        let b = article("guardian", "B", 2);
        crate::ledger::commit(&Ledger::default(), [&a], &plan.ledger_path)?;

        let observer = RecordingObserver::default();
        let sources = [source("guardian", vec![a.clone(), b.clone()])];
        let outcome = publish(&plan, &sources, &observer)?;

        let path = outcome.document.expect("document written");
        assert_eq!(path, plan.out_dir.join("test-news.epub"));
        assert_eq!(outcome.chapters, 1);
        assert!(observer.lines().contains(&"dedup 2 1".to_owned()));

        let ledger = Ledger::load(&plan.ledger_path)?;
        assert_eq!(ledger.len(), 2);
        assert!(ledger.contains(&ArticleHash::of(&a)));
        assert!(ledger.contains(&ArticleHash::of(&b)));
        Ok(())
    }

    #[test]
    fn second_run_with_same_title_keeps_first_book() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        let a = article("guardian", "A", 1);
        let b = article("guardian", "B", 2);

        let observer = RecordingObserver::default();
        let first = publish(&plan, &[source("guardian", vec![a.clone()])], &observer)?;
        let second = publish(
            &plan,
            &[source("guardian", vec![a.clone(), b.clone()])],
            &observer,
        )?;

        let first = first.document.expect("first document");
        let second = second.document.expect("second document");
        assert_eq!(first, plan.out_dir.join("test-news.epub"));
        assert_eq!(second, plan.out_dir.join("test-news-2.epub"));
        assert!(first.exists());

        let archive = zip::ZipArchive::new(std::fs::File::open(&first)?)?;
        assert!(archive.file_names().any(|name| name == "OEBPS/chapter-a.xhtml"));
        let archive = zip::ZipArchive::new(std::fs::File::open(&second)?)?;
        let chapters = archive
            .file_names()
            .filter(|name| name.starts_with("OEBPS/chapter-"))
            .collect::<Vec<_>>();
        assert_eq!(chapters, vec!["OEBPS/chapter-b.xhtml"]);

        let ledger = Ledger::load(&plan.ledger_path)?;
        assert!(ledger.contains(&ArticleHash::of(&a)));
        assert!(ledger.contains(&ArticleHash::of(&b)));
        Ok(())
    }

    #[test]
    fn nothing_new_leaves_ledger_and_output_untouched() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        let a = article("guardian", "A", 1);
        crate::ledger::commit(&Ledger::default(), [&a], &plan.ledger_path)?;
        let before = std::fs::read_to_string(&plan.ledger_path)?;

        let observer = RecordingObserver::default();
        let outcome = publish(&plan, &[source("guardian", vec![a])], &observer)?;

        assert!(outcome.document.is_none());
        assert!(outcome.failed_sources.is_empty());
        assert!(!plan.out_dir.exists());
        assert_eq!(std::fs::read_to_string(&plan.ledger_path)?, before);
        assert!(observer.lines().contains(&"nothing to publish".to_owned()));
        Ok(())
    }

    #[test]
    fn failed_source_does_not_stop_others() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        let sources: Vec<Box<dyn Source>> = vec![
            Box::new(FakeSource {
                name: "broken",
                articles: Vec::new(),
                fail: true,
            }),
            source("atlantic", vec![article("atlantic", "Kept", 2)]),
        ];

        let observer = RecordingObserver::default();
        let outcome = publish(&plan, &sources, &observer)?;

        assert_eq!(outcome.failed_sources, vec!["broken".to_owned()]);
        assert_eq!(outcome.chapters, 1);
        assert!(observer.lines().contains(&"failed broken".to_owned()));
        Ok(())
    }

    #[test]
    fn skipped_articles_are_not_committed() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        let good = article("guardian", "Good", 1);
        let mut bad = article("guardian", "Bad", 2);
        bad.content = Content::Deferred(DeferredContent::new("https://example.test/bad", || {
            anyhow::bail!("content container missing")
        }));

        let observer = RecordingObserver::default();
        let sources = [source("guardian", vec![good.clone(), bad.clone()])];
        let outcome = publish(&plan, &sources, &observer)?;
        assert_eq!(outcome.chapters, 1);

        let ledger = Ledger::load(&plan.ledger_path)?;
        assert!(ledger.contains(&ArticleHash::of(&good)));
        assert!(!ledger.contains(&ArticleHash::of(&bad)));
        Ok(())
    }

    #[test]
    fn corrupt_ledger_aborts_before_fetching() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let plan = plan(temp.path());
        std::fs::write(&plan.ledger_path, "garbage\n")?;

        let observer = RecordingObserver::default();
        let sources = [source("guardian", vec![article("guardian", "A", 1)])];
        let err = publish(&plan, &sources, &observer).unwrap_err();
        assert!(format!("{err:#}").contains("corrupt ledger"));
        assert!(observer.lines().is_empty());
        Ok(())
    }

    #[test]
    fn articles_without_section_use_default() {
        let mut with_section = article("guardian", "A", 1);
        with_section.section = Some("World news".to_owned());
        let sections = group_by_section(
            vec![with_section, article("guardian", "B", 2)],
            "Headlines",
        );
        assert_eq!(
            sections.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Headlines", "World news"]
        );
    }
}
