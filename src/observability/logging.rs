//! Structured logging system using tracing crate
//!
//! ## Log Format Options
//!
//! `LOG_FORMAT` selects the output format:
//!
//! - `json` - Structured JSON for production and log aggregation systems
//! - `pretty` - Human-readable multi-line output with colors
//! - `compact` - Terminal-friendly single-line output
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty or compact (default json)
//! - `LOG_SPANS`: emit span open/close events (default false)
//! - `RUST_LOG`: full filter override (env_logger syntax)
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG wabridge run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies that are chatty at INFO
const NOISY_TARGETS: [&str; 5] = [
    "rumqttc=warn",
    "hyper=warn",
    "reqwest=warn",
    "warp=warn",
    "tokio=warn",
];

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a `LOG_LEVEL` value; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Parse a `LOG_SPANS` value; only "true" (any case) enables span events
pub fn parse_spans_flag(s: &str) -> bool {
    s.eq_ignore_ascii_case("true")
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    NOISY_TARGETS
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::new(level.to_string()), |filter, directive| {
            filter.add_directive(directive)
        })
}

/// Initialize logging with manual configuration
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let span_events = if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let _ = match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_span_events(span_events))
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
    };
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = parse_spans_flag(&env::var("LOG_SPANS").unwrap_or_default());

    init_logging(level, format, include_spans);
}

/// Span around the handling of one inbound message
#[macro_export]
macro_rules! message_span {
    ($($field:tt)*) => {
        tracing::info_span!("message_handling", $($field)*)
    };
}

/// Span around a workflow routing decision and backend call
#[macro_export]
macro_rules! route_span {
    ($($field:tt)*) => {
        tracing::info_span!("workflow_route", $($field)*)
    };
}

/// Span around an MQTT operation
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

/// Span around a session lifecycle operation
#[macro_export]
macro_rules! lifecycle_span {
    ($($field:tt)*) => {
        tracing::info_span!("lifecycle_event", $($field)*)
    };
}

pub use {lifecycle_span, message_span, mqtt_span, route_span};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("CoMpAcT"), LogFormat::Compact);
    }

    #[test]
    fn test_log_format_parse_invalid_defaults_to_json() {
        for input in ["invalid", "", "xml"] {
            assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
        }
    }

    #[test]
    fn test_parse_level() {
        let cases = [
            ("ERROR", Level::ERROR),
            ("warn", Level::WARN),
            ("Info", Level::INFO),
            ("debug", Level::DEBUG),
            ("TRACE", Level::TRACE),
            ("invalid", Level::INFO),
            ("", Level::INFO),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_level(input), expected, "Failed for input: {input}");
        }
    }

    #[test]
    fn test_parse_spans_flag() {
        assert!(parse_spans_flag("true"));
        assert!(parse_spans_flag("TRUE"));
        assert!(!parse_spans_flag("false"));
        assert!(!parse_spans_flag("1"));
        assert!(!parse_spans_flag(""));
    }

    #[test]
    fn test_noisy_targets_are_valid_directives() {
        for directive in NOISY_TARGETS {
            assert!(
                directive
                    .parse::<tracing_subscriber::filter::Directive>()
                    .is_ok(),
                "{directive} should parse"
            );
        }
    }

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        init_logging(Level::INFO, LogFormat::Compact, false);
        init_logging(Level::DEBUG, LogFormat::Json, true);
    }
}
