// Copyright (c) 2021 MASSA LABS <info@massa.net>

//! Structured trace events and subscriber setup shared by the workspace.

use displaydoc::Display;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

/// Emit a structured trace event: an event name and a JSON object of parameters.
#[macro_export]
macro_rules! switchyard_trace {
    ($evt:expr, $params:tt) => {
        tracing::trace!("switchyard_trace:{}:{}", $evt, serde_json::json!($params));
    };
}

/// logging error
#[non_exhaustive]
#[derive(Display, Error, Debug)]
pub enum LoggingError {
    /// A global tracing subscriber is already installed: {0}
    AlreadyInitialized(String),
}

/// Map a numeric verbosity (as found in settings) to a level filter.
/// 0: error, 1: warn, 2: info, 3: debug, 4 and above: trace
pub fn level_filter(level: usize) -> LevelFilter {
    match level {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber.
///
/// Fails instead of panicking if one is already installed so that callers
/// (tests in particular) decide what to do about it.
pub fn setup_tracing(level: usize) -> Result<(), LoggingError> {
    use tracing_subscriber::prelude::*;
    let tracing_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(level_filter(level));
    tracing_subscriber::registry()
        .with(tracing_layer)
        .try_init()
        .map_err(|err| LoggingError::AlreadyInitialized(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(0), LevelFilter::ERROR);
        assert_eq!(level_filter(2), LevelFilter::INFO);
        assert_eq!(level_filter(3), LevelFilter::DEBUG);
        assert_eq!(level_filter(12), LevelFilter::TRACE);
    }

    #[test]
    #[serial]
    fn test_setup_tracing_twice() {
        setup_tracing(4).expect("first setup must succeed");
        switchyard_trace!("test_event", { "version": 2, "height": 10 });
        assert!(matches!(
            setup_tracing(2),
            Err(LoggingError::AlreadyInitialized(_))
        ));
    }
}
