//! Logging setup
//!
//! Console output through `tracing_subscriber::fmt`, filtered by `RUST_LOG`
//! or a verbosity level, plus an optional JSONL file per process:
//!
//! ```text
//! <logs_dir>/
//! ├── 2026-10-16_cli.jsonl
//! └── 2026-10-16_desktop.jsonl
//! ```
//!
//! Query with jq:
//!
//! ```bash
//! jq 'select(.level == "warn")' logs/*.jsonl
//! ```

mod layer;

use std::path::PathBuf;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub use layer::{JsonlLayer, LogLine};

/// Logging options
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace. Ignored when `RUST_LOG` is set.
    pub verbosity: u8,
    /// Write a JSONL file here when set
    pub logs_dir: Option<PathBuf>,
    /// File name suffix identifying this process
    pub instance: String,
}

impl LogConfig {
    pub fn filter_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Install the global subscriber.
///
/// Returns the JSONL file path when file logging is enabled. Calling this
/// after a global subscriber is already installed leaves the existing one
/// in place.
pub fn init_logging(config: &LogConfig) -> std::io::Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let jsonl = match &config.logs_dir {
        Some(dir) => Some(JsonlLayer::new(dir, config.instance.as_str())?),
        None => None,
    };
    let path = jsonl.as_ref().map(|l| l.log_path().to_path_buf());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(jsonl)
        .try_init();

    Ok(path)
}
