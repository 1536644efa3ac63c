//! Logging setup for the CLI binary.
//!
//! Logs go to stderr so command output on stdout stays machine readable.
//! `RUST_LOG` overrides the default `warn` level; `simulate` raises it to
//! `info` so stage transitions are visible while a page runs.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}
