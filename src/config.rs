use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::source::Source;
use crate::source::atlantic::{AtlanticSettings, AtlanticSource};
use crate::source::guardian::{GuardianSettings, GuardianSource};

pub const DEFAULT_CONFIG_PATH: &str = "~/.news2epub.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_ledger")]
    pub ledger: String,
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Guardian(GuardianSettings),
    Atlantic(AtlanticSettings),
}

fn default_language() -> String {
    "en".to_owned()
}

fn default_ledger() -> String {
    "~/.news2epub/published.ledger".to_owned()
}

fn default_out_dir() -> String {
    "~".to_owned()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = match std::fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                anyhow::bail!("couldn't find configuration file {}", path.display());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read config: {}", path.display()));
            }
        };
        Self::from_yaml(&yaml).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("deserialize config yaml")?;
        if config.sources.is_empty() {
            anyhow::bail!("config must list at least one source");
        }

        let mut names = Vec::new();
        for source in &config.sources {
            let name = source.name();
            if names.contains(&name) {
                anyhow::bail!("duplicate source name `{name}`; set `name` to tell them apart");
            }
            names.push(name);
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Guardian(settings) => &settings.name,
            SourceConfig::Atlantic(settings) => &settings.name,
        }
    }

    pub fn into_source(self, client: reqwest::blocking::Client) -> anyhow::Result<Box<dyn Source>> {
        Ok(match self {
            SourceConfig::Guardian(settings) => Box::new(GuardianSource::new(settings, client)?),
            SourceConfig::Atlantic(settings) => Box::new(AtlanticSource::new(settings, client)),
        })
    }
}

/// Expands a leading `~` against `HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}
