use std::collections::BTreeSet;
use std::fmt;
use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest as _, Sha256};

use crate::article::Article;

/// Dedup key of an article: SHA-256 over `source_id`, publication date and
/// title. A retitled or re-dated republish gets a new hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArticleHash(String);

impl ArticleHash {
    pub fn compute(source_id: &str, published_at: &DateTime<Utc>, title: &str) -> Self {
        let date = published_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut hasher = Sha256::new();
        hasher.update(format!("{source_id}_{date}_{title}").as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn of(article: &Article) -> Self {
        Self::compute(&article.source_id, &article.published_at, &article.title)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let valid = raw.len() == 64
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            anyhow::bail!("not a sha256 hex digest: {raw:?}");
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes of every article published by earlier runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    hashes: BTreeSet<ArticleHash>,
}

impl Ledger {
    /// Reads the ledger at `path`. A missing file is an empty ledger; a file
    /// that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "ledger not found; starting empty");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read ledger: {}", path.display()));
            }
        };

        let mut hashes = BTreeSet::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let hash = ArticleHash::parse(line).with_context(|| {
                format!("corrupt ledger {} at line {}", path.display(), idx + 1)
            })?;
            hashes.insert(hash);
        }

        Ok(Self { hashes })
    }

    pub fn contains(&self, hash: &ArticleHash) -> bool {
        self.hashes.contains(hash)
    }

    pub fn insert(&mut self, hash: ArticleHash) -> bool {
        self.hashes.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn union_with(&mut self, other: &Ledger) {
        self.hashes.extend(other.hashes.iter().cloned());
    }

    fn write_atomic(&self, path: &Path) -> anyhow::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create ledger dir: {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("create ledger temp file in {}", parent.display()))?;
        for hash in &self.hashes {
            writeln!(tmp, "{hash}").context("write ledger entry")?;
        }
        tmp.flush().context("flush ledger")?;
        tmp.as_file().sync_all().context("sync ledger")?;
        tmp.persist(path)
            .map_err(|err| err.error)
            .with_context(|| format!("replace ledger: {}", path.display()))?;
        Ok(())
    }
}

impl FromIterator<ArticleHash> for Ledger {
    fn from_iter<I: IntoIterator<Item = ArticleHash>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

/// Keeps the articles whose hash is not in `ledger`, in their original order.
pub fn filter_unseen(articles: Vec<Article>, ledger: &Ledger) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|article| !ledger.contains(&ArticleHash::of(article)))
        .collect()
}

/// Adds the hashes of `new_articles` to the ledger stored at `path` and
/// returns what was written. The file is re-read first so hashes committed
/// since `ledger` was loaded are kept.
pub fn commit<'a>(
    ledger: &Ledger,
    new_articles: impl IntoIterator<Item = &'a Article>,
    path: &Path,
) -> anyhow::Result<Ledger> {
    let mut merged = Ledger::load(path).context("re-read ledger before commit")?;
    merged.union_with(ledger);
    for article in new_articles {
        merged.insert(ArticleHash::of(article));
    }
    merged.write_atomic(path)?;
    Ok(merged)
}
