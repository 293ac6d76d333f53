//! Log subscriber setup.
//!
//! Logs go to stderr so `--json` output on stdout stays parseable.
//!
//! - `RUST_LOG` - full filter override
//! - `LINEAGE_LOG_FORMAT` - output format (pretty, json, compact)

use std::env;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber. `verbose` raises the default level.
pub fn init(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("lineage_migrate={},lineage_cli={}", level, level))
    });

    let format = env::var("LINEAGE_LOG_FORMAT").unwrap_or_default();
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_ok() {
        tracing::debug!(level, format = %format, "Logging initialized");
    }
}
