//! Default log sink.
//!
//! The library only emits `tracing` events. Embedders install their own
//! subscriber; the `watchtower` binary calls [`init`].

use tracing_subscriber::EnvFilter;

use crate::error::{Result, WatchError};

/// Installs a fmt subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. Fails if the filter
/// does not parse or a global subscriber is already installed.
pub fn init(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| WatchError::Config(format!("invalid log filter {level:?}: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| WatchError::Config(format!("logging already initialised: {e}")))
}
