#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::{
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::Context;
use clap::Parser;
use config::{CliArgs, Command, FileConfig};
use seqrow::Registry;
use telemetry::init_logging;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    init_logging()?;

    let config = FileConfig::load(&args.config)?;
    // Relative database paths are resolved against the config file.
    let base = args.config.parent().unwrap_or_else(|| Path::new("."));
    let registry = config.registry(base)?;

    let mut generators: Vec<_> = registry.configured().collect();
    generators.sort_unstable();
    tracing::debug!(
        config = %args.config.display(),
        ?generators,
        command = ?args.command,
        "starting"
    );
    run(&registry, &args.command, &mut BufWriter::new(io::stdout().lock()))
}

fn run(registry: &Registry, command: &Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            registry
                .create_tables()
                .context("failed to create sequence tables")?;
            tracing::info!("sequence tables are ready");
        }
        Command::Next { name, count } => {
            let ids = registry
                .next_ids(name, *count)
                .with_context(|| format!("failed to allocate {count} ids for `{name}`"))?;
            for id in ids {
                writeln!(out, "{id}")?;
            }
        }
        Command::Range { name, count } => {
            let range = registry
                .allocate(name, *count)
                .with_context(|| format!("failed to allocate a range of {count} for `{name}`"))?;
            writeln!(
                out,
                "start={} count={} step={} end={}",
                range.start(),
                range.count(),
                range.step(),
                range.end()
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(registry: &Registry, command: Command) -> String {
        let mut out = Vec::new();
        run(registry, &command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn init_then_allocate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileConfig::parse(
            r#"{
                "datasources": { "db": { "path": "ids.db" } },
                "generators": { "orders": { "dialect": "sqlite", "fetch_size": 4, "step_size": 10 } }
            }"#,
        )
        .unwrap()
        .registry(dir.path())
        .unwrap();

        assert_eq!(output(&registry, Command::Init), "");
        assert_eq!(
            output(
                &registry,
                Command::Next {
                    name: "orders".into(),
                    count: 3
                }
            ),
            "0\n10\n20\n"
        );
        assert_eq!(
            output(
                &registry,
                Command::Range {
                    name: "orders".into(),
                    count: 2
                }
            ),
            "start=40 count=2 step=10 end=60\n"
        );
    }

    #[test]
    fn allocation_without_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileConfig::parse(
            r#"{
                "datasources": { "db": { "path": "ids.db" } },
                "generators": { "orders": { "dialect": "sqlite" } }
            }"#,
        )
        .unwrap()
        .registry(dir.path())
        .unwrap();

        let err = run(
            &registry,
            &Command::Next {
                name: "orders".into(),
                count: 1,
            },
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("failed to allocate 1 ids for `orders`"));
    }
}
