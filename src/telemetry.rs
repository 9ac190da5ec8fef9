//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Calling this more than once is
/// harmless; only the first call installs a subscriber.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pin_transfer={level},warn")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("info");
        tracing::info!("subscriber installed");
    }
}
