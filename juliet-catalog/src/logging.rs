//! Tracing setup for the harness binaries and tests.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Installs the global subscriber.
///
/// `JULIET_LOG` takes the usual `EnvFilter` directives, e.g.
/// `JULIET_LOG=juliet_catalog::analyzer=debug`. Falls back to `juliet=info`
/// when unset or invalid. Events go to stderr so that stdout stays usable
/// for `--json` output. Safe to call more than once.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("JULIET_LOG")
            .unwrap_or_else(|_| EnvFilter::new("juliet=info"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    });
}
