use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber
///
/// `RUST_LOG` wins over `default_filter` when set. Calling twice is harmless.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
