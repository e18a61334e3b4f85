use std::any::Any;

use anyhow::anyhow;
use tracing_forest::ForestLayer;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

/// Keeps the profiler alive. Profiles are written out when it drops, so hold
/// it until the program exits.
#[must_use = "dropping the guard stops profiling"]
pub struct LogGuard {
    _profile: Option<Box<dyn Any>>,
}

/// Initializes the global tracing subscriber.
///
/// The default `Level` is `INFO`. It can be overridden with `RUST_LOG`.
pub fn init_logger() -> anyhow::Result<LogGuard> {
    if cfg!(feature = "tracing-profile") || cfg!(feature = "perfetto") {
        use tracing_profile::init_tracing;
        let guard = init_tracing().map_err(|_| anyhow!("failed to initialize tracing-profile"))?;
        Ok(LogGuard {
            _profile: Some(Box::new(guard)),
        })
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(ForestLayer::default())
            .try_init()?;
        Ok(LogGuard { _profile: None })
    }
}

#[cfg(all(test, not(any(feature = "tracing-profile", feature = "perfetto"))))]
mod tests {
    use super::*;

    #[test]
    fn test_logger_installs_once() {
        let guard = init_logger().unwrap();
        assert!(guard._profile.is_none());
        assert!(init_logger().is_err());
    }
}
