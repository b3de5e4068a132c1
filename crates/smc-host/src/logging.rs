//! Log output for the host program.
//!
//! Library crates log through the `log` facade; records are bridged into a
//! `tracing` subscriber that formats them.

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT_LOGGING: Once = Once::new();

/// Install the global subscriber
///
/// `RUST_LOG` wins when set; otherwise `debug` selects the verbose level.
pub fn init(debug: bool) {
    INIT_LOGGING.call_once(|| {
        let default_level = if debug { "debug" } else { "info" };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(debug)
            .with_thread_names(true);

        // Already initialised by an embedding test harness is fine.
        let _ = tracing_subscriber::registry()
            .with(fmt_layer)
            .with(env_filter)
            .try_init();
    });
}
