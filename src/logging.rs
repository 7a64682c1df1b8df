//! Route tracing output to stderr, keeping stdout free for streamed translations.

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
pub fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
