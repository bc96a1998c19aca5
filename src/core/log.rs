// Process-wide tracing setup. Safe to call more than once; only the first call
// installs the subscriber.
use std::sync::Once;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, filter::Targets, fmt, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

static INIT: Once = Once::new();

pub fn init_logging(verbose: bool) {
    INIT.call_once(|| {
        let (level_filter, level) = if verbose {
            (LevelFilter::DEBUG, "debug")
        } else {
            (LevelFilter::WARN, "warn")
        };
        let app_filter = Targets::new().with_target("coinwatch", level_filter);
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        // A test harness may already own the global subscriber.
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().pretty().without_time())
            .with(app_filter)
            .with(env_filter)
            .try_init();
    });
}
