//! Tracing subscriber setup for binaries and demos.
//!
//! The library itself only emits `tracing` events. Programs that want them on
//! stderr call [`init_tracing`] once at startup; the filter comes from
//! `RUST_LOG` and defaults to `info`.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<Result<(), InitError>> = OnceLock::new();

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InitError {
    /// Another global subscriber was installed first.
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadySet(String),
}

/// Installs a formatting subscriber for the current process.
///
/// Repeat calls return the outcome of the first one.
///
/// # Errors
/// Fails if some other code already installed a global subscriber.
pub fn init_tracing() -> Result<(), InitError> {
    INITIALISED
        .get_or_init(|| {
            let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal());
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| InitError::AlreadySet(e.to_string()))
        })
        .clone()
}
