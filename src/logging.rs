use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crate-specific filter variable; `RUST_LOG` is consulted when it is unset.
pub const LOG_ENV: &str = "EXAMSYNC_LOG";

/// Installs the global subscriber. Output goes to stderr because stdout
/// carries IPC responses. Calling this twice is harmless.
pub fn init() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter)
        .try_init();
}
