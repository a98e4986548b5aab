//! Structured logging.
//!
//! # Responsibilities
//! - Map the configured level name onto a tracing filter
//! - Install the subscriber once, at startup
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over the configured level when it is set
//! - Components never change the level after startup

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a level name to a filter. Names are case-insensitive.
///
/// `fatal` and `panic` have no tracing equivalent and map to `error`;
/// `none` and `disabled` turn logging off.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" => Some(LevelFilter::WARN),
        "error" | "fatal" | "panic" => Some(LevelFilter::ERROR),
        "none" | "disabled" => Some(LevelFilter::OFF),
        _ => None,
    }
}

/// Install the global subscriber for the given level name.
///
/// Unknown names disable logging; validation rejects them before this runs.
pub fn init_logging(level: &str) {
    let level = parse_level(level).unwrap_or(LevelFilter::OFF);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
