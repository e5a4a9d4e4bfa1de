//! Diagnostics sink passed explicitly to sources, the document builder and
//! the pipeline driver.

#[derive(Debug)]
pub enum Event<'a> {
    PageFetched {
        source: &'a str,
        page: u32,
        pages: u32,
        results: usize,
    },
    ArticleExcluded {
        source: &'a str,
        id: &'a str,
        marker: &'a str,
    },
    ArticleSkipped {
        title: &'a str,
        url: Option<&'a str>,
        error: &'a anyhow::Error,
    },
    SourceFetched {
        source: &'a str,
        articles: usize,
    },
    SourceFailed {
        source: &'a str,
        error: &'a anyhow::Error,
    },
    Deduplicated {
        fetched: usize,
        unseen: usize,
    },
    NothingToPublish,
    DocumentWritten {
        path: &'a str,
        chapters: usize,
    },
    LedgerCommitted {
        path: &'a str,
        hashes: usize,
    },
}

pub trait Observer {
    fn event(&self, event: Event<'_>);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn event(&self, event: Event<'_>) {
        match event {
            Event::PageFetched {
                source,
                page,
                pages,
                results,
            } => tracing::debug!(source, page, pages, results, "fetched search page"),
            Event::ArticleExcluded { source, id, marker } => {
                tracing::info!(source, id, marker, "skipping excluded article")
            }
            Event::ArticleSkipped { title, url, error } => {
                tracing::warn!(title, url, error = %format!("{error:#}"), "skipping article")
            }
            Event::SourceFetched { source, articles } => {
                tracing::info!(source, articles, "fetched source")
            }
            Event::SourceFailed { source, error } => {
                tracing::error!(source, error = %format!("{error:#}"), "source fetch failed")
            }
            Event::Deduplicated { fetched, unseen } => {
                tracing::info!(fetched, unseen, "filtered already published articles")
            }
            Event::NothingToPublish => tracing::info!("nothing new to publish"),
            Event::DocumentWritten { path, chapters } => {
                tracing::info!(path, chapters, "wrote epub")
            }
            Event::LedgerCommitted { path, hashes } => {
                tracing::info!(path, hashes, "committed ledger")
            }
        }
    }
}

/// Keeps a one-line rendering of every event.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingObserver {
    lines: std::cell::RefCell<Vec<String>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

#[cfg(test)]
impl Observer for RecordingObserver {
    fn event(&self, event: Event<'_>) {
        let line = match event {
            Event::PageFetched { source, page, .. } => format!("page {source} {page}"),
            Event::ArticleExcluded { source, id, .. } => format!("excluded {source} {id}"),
            Event::ArticleSkipped { title, .. } => format!("skipped {title}"),
            Event::SourceFetched { source, articles } => format!("fetched {source} {articles}"),
            Event::SourceFailed { source, .. } => format!("failed {source}"),
            Event::Deduplicated { fetched, unseen } => format!("dedup {fetched} {unseen}"),
            Event::NothingToPublish => "nothing to publish".to_owned(),
            Event::DocumentWritten { chapters, .. } => format!("written {chapters}"),
            Event::LedgerCommitted { hashes, .. } => format!("committed {hashes}"),
        };
        self.lines.borrow_mut().push(line);
    }
}
