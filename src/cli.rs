use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Turn recent news into an EPUB, skipping articles already published.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch, deduplicate, render and commit in one run.
    Build(BuildArgs),
    /// Print the body a content selector extracts from one page.
    Scrape(ScrapeArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Configuration file (YAML).
    #[arg(long, default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Fetch news since a date (YYYY-MM-DD). Defaults to today.
    #[arg(long = "from")]
    pub from_date: Option<String>,

    /// Directory the .epub file is written to (overrides config `out_dir`).
    #[arg(long)]
    pub out_dir: Option<String>,

    /// Book title (default: "News for <date>").
    #[arg(long)]
    pub title: Option<String>,

    /// Publication ledger path (overrides config `ledger`).
    #[arg(long)]
    pub ledger: Option<String>,

    /// Overwrite `<title>.epub` instead of writing `<title>-2.epub`, ...
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Page to fetch (must be http/https).
    #[arg(long)]
    pub url: String,

    /// CSS selector of the element holding the article body.
    #[arg(long, default_value = "div.content__article-body")]
    pub container: String,

    /// CSS selector of the body items inside the container.
    #[arg(long, default_value = "p")]
    pub item: String,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}
