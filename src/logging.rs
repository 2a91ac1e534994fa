use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-controlled filter (`RUST_LOG`),
/// defaulting to `info`.
///
/// Safe to call more than once; later calls are no-ops. Tests call this
/// freely.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Errors only if a subscriber is already installed.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
