//! Logging setup for service-container
//!
//! The container logs through `tracing` under the `service_container`
//! target. This module wires a `tracing-subscriber` formatter for binaries
//! that do not bring their own.
//!
//! # Features
//!
//! - `logging` - emit container events (default)
//! - `logging-json` - JSON formatter (production)
//! - `logging-pretty` - human-readable formatter (development)
//!
//! Without one of the formatter features the `init*` functions do nothing.
//!
//! # Example
//!
//! ```rust,ignore
//! use service_container::logging;
//!
//! // Format picked from the enabled features
//! logging::init();
//!
//! // Only container events, including fast-path traces
//! logging::builder()
//!     .trace()
//!     .container_only()
//!     .compact()
//!     .init();
//! ```

use tracing::Level;

/// Target every container event is logged under
pub const LOG_TARGET: &str = "service_container";

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Multi-line, colored output
    Pretty,
    /// Single-line output
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(feature = "logging-json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Builder for the global subscriber
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::default(),
            target: None,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum level to record
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Record everything, including cache hits and waits
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Record lifecycle events (the default)
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Record only warnings: recovered panics, refused waits, failed closes
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Restrict output to a single target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Restrict output to container events
    pub fn container_only(self) -> Self {
        self.with_target_filter(LOG_TARGET)
    }

    /// Include file names in log output
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in log output
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread IDs in log output
    ///
    /// Handy next to `context_id` when untangling concurrent resolutions.
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    /// Include thread names in log output
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// JSON output
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Pretty output
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Compact output
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// The `EnvFilter` directive this builder installs
    pub fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{target}={}", self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the subscriber, failing if one is already set.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> Result<(), tracing_subscriber::util::TryInitError> {
        use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let layer = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => layer.json().boxed(),
            // JSON needs the `logging-json` feature
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(EnvFilter::new(self.directive()))
            .with(layer)
            .try_init()
    }

    /// Install the subscriber unless one is already set.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        let _ = self.try_init();
    }

    /// No-op without a formatter feature
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

/// Create a new logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with the format picked from the enabled features
pub fn init() {
    builder().init();
}

/// Initialize JSON output at debug level
///
/// ```json
/// {"timestamp":"2026-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Service constructed","service":"db","context_id":3},"target":"service_container"}
/// ```
pub fn init_json() {
    builder().json().debug().init();
}

/// Initialize pretty output at debug level
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Initialize debug output restricted to container events
pub fn init_container_only() {
    builder().container_only().debug().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::default());
        assert!(builder.target.is_none());
        assert_eq!(builder.directive(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .compact()
            .with_thread_ids()
            .container_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Compact);
        assert!(builder.with_thread_ids);
        assert_eq!(builder.directive(), "service_container=TRACE");
    }
}
