use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

// Console logging, filtered by RUST_LOG. Fails if a global subscriber is
// already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
