//! Installs the global subscriber, so this file holds a single test.

use arbiter::domain::models::{LoggingConfig, RotationPolicy};
use arbiter::infrastructure::logging::LoggerImpl;

#[test]
fn test_logger_writes_rolling_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: "debug".to_string(),
        log_dir: Some(dir.path().to_path_buf()),
        rotation: RotationPolicy::Never,
        ..LoggingConfig::default()
    };

    let logger = LoggerImpl::init(&config).unwrap();
    assert!(logger.has_file_output());
    tracing::info!(task_id = "abc", "structured event");

    // Dropping the guard flushes the non-blocking writer
    drop(logger);

    let contents = std::fs::read_to_string(dir.path().join("arbiter.log")).unwrap();
    let line = contents
        .lines()
        .find(|l| l.contains("structured event"))
        .expect("event written to file");
    let json: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(json["fields"]["task_id"], "abc");

    // A second global subscriber is refused
    assert!(LoggerImpl::init(&LoggingConfig::default()).is_err());
}
