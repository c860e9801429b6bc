//! Tracing subscriber setup for whatever process embeds the harvester.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. `RUST_LOG` wins over the default
/// `gcwatch=info`. Returns `false` when a subscriber was already installed.
pub fn init(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gcwatch=info,gcwatch_sdk=info"));
    let result = if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    result.is_ok()
}
