//! Tracing subscriber setup shared by every Siteport front-end

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the level filter for a verbosity count.
///
/// `RUST_LOG` wins when set so operators can target single modules.
pub fn level_filter(verbose: u8, quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("error");
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    }
}

/// Install the global fmt subscriber.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(verbose: u8, quiet: bool) {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(level_filter(verbose, quiet))
        .try_init();
}
