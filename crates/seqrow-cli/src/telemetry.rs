//! Console logging.
//!
//! Spans and events from `seqrow` (refills, first-row creation, create-race
//! retries) are printed to stderr through `tracing_subscriber::fmt`, so that
//! stdout carries nothing but allocated ids. The level comes from `RUST_LOG`
//! and defaults to `info`:
//!
//! ```bash
//! RUST_LOG=seqrow=debug seqrow next orders -n 5
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_logging() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_file(true)
                .compact(),
        )
        .try_init()?;
    Ok(())
}
