//! Tracing subscriber setup and span macros
//!
//! Output is chosen with `LOG_FORMAT`: `json` (default, one object per line),
//! `pretty` (multi-line, colored) or `compact` (single line, colored, no
//! target).
//!
//! Other variables read by [`init_default_logging`]:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO (default), DEBUG or TRACE
//! - `LOG_SPANS`: `true` adds span open/close events
//! - `RUST_LOG`: replaces the whole filter when set
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG mqtt-presence run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Case-insensitive; anything unrecognized is JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global subscriber; panics if one is already set
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let mut filter = EnvFilter::new(level.to_string());

    // Broker client and TLS internals only at warn
    for directive in ["rumqttc=warn", "rustls=warn", "tokio=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    if let Ok(rust_log) = env::var("RUST_LOG") {
        filter = EnvFilter::new(rust_log);
    }

    let subscriber = tracing_subscriber::registry().with(filter);

    let events = span_events(include_spans);
    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_span_events(events))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().pretty().with_ansi(true).with_span_events(events))
                .init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(events);
            subscriber.with(layer).init();
        }
    }
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// [`init_logging`] driven by `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() {
    let level = env::var("LOG_LEVEL")
        .map(|value| parse_level(&value))
        .unwrap_or(Level::INFO);
    let format = env::var("LOG_FORMAT")
        .map(|value| LogFormat::parse(&value))
        .unwrap_or(LogFormat::Json);
    let include_spans = env::var("LOG_SPANS")
        .map(|value| parse_flag(&value))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Parse a log level name, defaulting to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_flag(s: &str) -> bool {
    s.to_lowercase() == "true"
}

/// Span around coordinator work; pass fields only, e.g. `op = "run"`
#[macro_export]
macro_rules! coordinator_span {
    ($($field:tt)*) => {
        tracing::info_span!("coordinator", $($field)*)
    };
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Create a presence publish span
#[macro_export]
macro_rules! presence_span {
    ($($field:tt)*) => {
        tracing::info_span!("presence_publish", $($field)*)
    };
}

pub use {coordinator_span, mqtt_span, presence_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        let cases = [
            ("json", LogFormat::Json),
            ("PRETTY", LogFormat::Pretty),
            ("CoMpAcT", LogFormat::Compact),
            ("xml", LogFormat::Json),
            ("", LogFormat::Json),
        ];
        for (input, expected) in cases {
            assert_eq!(LogFormat::parse(input), expected, "Failed for input: '{input}'");
        }
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("verbose", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_log_spans_flag_only_accepts_true() {
        for input in ["true", "TRUE", "True"] {
            assert!(parse_flag(input), "Failed for input: '{input}'");
        }
        for input in ["false", "", "yes", "1"] {
            assert!(!parse_flag(input), "Failed for input: '{input}'");
        }
    }

    #[test]
    fn test_span_events_follow_flag() {
        assert_eq!(span_events(false), FmtSpan::NONE);
        assert_eq!(span_events(true), FmtSpan::NEW | FmtSpan::CLOSE);
    }

    #[test]
    fn test_span_macros_take_fields_only() {
        let span = crate::coordinator_span!(op = "run", client_id = "device-1");
        let _ = crate::mqtt_span!(op = "connect", attempt = 1u64);
        let _ = crate::presence_span!(op = "debounced", qualifier = "paused");
        drop(span);
    }
}
