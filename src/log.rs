//! Logging for the simulation engine, built on the `log` facade with a
//! `log4rs` console appender. This is internal diagnostics, not to be
//! confused with _reporting_, which records model-level statistics through
//! the [`Reporter`](crate::reporting::Reporter) sink.
//!
//! Logging is disabled by default. Call [`enable_logging`] (everything) or
//! [`set_log_level`] once, early; subsequent calls adjust the level filter
//! without reinstalling the logger.

pub use log::{debug, error, info, trace, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::Handle;
use std::sync::Mutex;
use std::sync::OnceLock;

// Logging disabled until a level is set explicitly.
const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;

static LOG_HANDLE: OnceLock<Mutex<Handle>> = OnceLock::new();

fn build_config(level: LevelFilter) -> Config {
    let stdout = ConsoleAppender::builder().build();
    Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .expect("valid logging configuration")
}

/// Enables the logger with no level filter / full logging. Equivalent to
/// `set_log_level(LevelFilter::Trace)`.
pub fn enable_logging() {
    set_log_level(LevelFilter::Trace);
}

/// Disables logging completely.
pub fn disable_logging() {
    set_log_level(DEFAULT_LOG_LEVEL);
}

/// Sets the global log level, installing the logger on first use. A foreign
/// logger already occupying the `log` facade leaves the level unchanged.
pub fn set_log_level(level: LevelFilter) {
    let config = build_config(level);
    if let Some(handle) = LOG_HANDLE.get() {
        handle.lock().unwrap().set_config(config);
        return;
    }
    if let Ok(handle) = log4rs::init_config(config) {
        _ = LOG_HANDLE.set(Mutex::new(handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_level_twice_reuses_handle() {
        set_log_level(LevelFilter::Info);
        set_log_level(LevelFilter::Warn);
        info!("logger reconfigured");
    }
}
