// Installs the global subscriber, so this binary holds a single test.

use std::fs;

use commitscope::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};
use tempfile::TempDir;
use tracing::{info, instrument, warn};

#[test]
fn test_file_logging_writes_json_lines() {
    let temp_dir = TempDir::new().unwrap();
    let config = LogConfig {
        level: "info".to_string(),
        format: LogFormat::Json,
        log_dir: Some(temp_dir.path().to_path_buf()),
        enable_console: false,
        rotation: RotationPolicy::Never,
    };

    let logger = LoggerImpl::init(&config).unwrap();

    info!(task_id = "t-1", "task admitted");
    tracing::debug!("below the default level");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(run_attempt("openai"));

    // A second install must fail while one is active.
    assert!(LoggerImpl::init(&config).is_err());

    // Dropping the guard flushes the non-blocking writer.
    drop(logger);

    let log_files: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_str().is_some_and(|s| s.contains("commitscope.log")))
        .collect();
    assert_eq!(log_files.len(), 1, "expected a single log file");

    let contents = fs::read_to_string(log_files[0].path()).unwrap();
    assert!(contents.contains("task admitted"));
    assert!(contents.contains("\"task_id\":\"t-1\""));
    assert!(contents.contains("provider attempt failed"));
    assert!(contents.contains("run_attempt"), "span name should be recorded");
    assert!(!contents.contains("below the default level"));

    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        serde_json::from_str::<serde_json::Value>(line).expect("every line is JSON");
    }
}

#[instrument]
async fn run_attempt(provider: &str) {
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    warn!(provider, "provider attempt failed");
}
