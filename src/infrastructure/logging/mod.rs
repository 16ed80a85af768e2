//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty stdout formatting
//! - Rolling JSON log files through tracing-appender

pub mod logger;

pub use logger::{parse_log_level, LoggerImpl};
