use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    news2epub::logging::init().context("init logging")?;

    let cli = news2epub::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        news2epub::cli::Command::Build(args) => {
            let outcome = news2epub::build::run(args).context("build")?;
            match &outcome.document {
                Some(path) => println!("{}", path.display()),
                None if outcome.failed_sources.is_empty() => {
                    println!("Nothing new to publish.")
                }
                None => {}
            }
            if !outcome.failed_sources.is_empty() {
                anyhow::bail!(
                    "build: failed to fetch from: {}",
                    outcome.failed_sources.join(", ")
                );
            }
        }
        news2epub::cli::Command::Scrape(args) => {
            news2epub::scrape::run(args).context("scrape")?;
        }
    }

    Ok(())
}
