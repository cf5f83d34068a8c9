use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use seqrow::{DEFAULT_BUSY_TIMEOUT, GeneratorConfig, Registry, SqliteSource};
use serde::Deserialize;

/// Command line arguments for the `seqrow` binary.
///
/// Every flag can also be set through the environment; a `.env` file in the
/// working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seqrow",
    version,
    about = "Allocate unique, monotonic IDs from a SQLite sequence table"
)]
pub struct CliArgs {
    /// Path to the JSON file describing datasources and generators.
    ///
    /// Environment variable: `SEQROW_CONFIG`
    #[arg(long, short, env = "SEQROW_CONFIG", default_value = "seqrow.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the sequence table of every configured generator.
    Init,
    /// Allocate ids for a name and print one per line.
    Next {
        /// The logical name to allocate for.
        name: String,
        /// How many ids to allocate.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
    },
    /// Allocate one contiguous range and print its start, count and step.
    Range {
        /// The logical name to allocate for.
        name: String,
        /// Number of ids in the range.
        count: u64,
    },
}

/// The contents of the config file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub datasources: BTreeMap<String, DatasourceConfig>,
    pub generators: BTreeMap<String, GeneratorConfig>,
}

/// A SQLite database file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasourceConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[allow(clippy::cast_possible_truncation)]
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT.as_millis() as u64
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file `{}`", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file `{}`", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        if config.generators.is_empty() {
            bail!("at least one generator must be configured");
        }
        Ok(config)
    }

    /// Builds the registry, resolving datasource paths relative to `base`.
    pub fn registry(&self, base: &Path) -> anyhow::Result<Registry> {
        let mut builder = Registry::builder();
        for (name, datasource) in &self.datasources {
            let source = SqliteSource::new(base.join(&datasource.path))
                .with_busy_timeout(Duration::from_millis(datasource.busy_timeout_ms));
            builder = builder.datasource(name.clone(), Arc::new(source));
        }
        for (name, generator) in &self.generators {
            builder = builder.generator(name.clone(), generator.clone());
        }
        builder.build().context("inconsistent generator configuration")
    }
}
