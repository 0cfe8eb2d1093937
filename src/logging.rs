use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_LEVEL_ENV: &str = "TASKBOARD_LOG_LEVEL";
const LOG_FILE_PREFIX: &str = "taskboard-";

/// Installs the file subscriber. Keep the returned guard alive until the
/// process exits; dropping it flushes buffered lines to disk.
pub fn init_logging() -> Result<(PathBuf, WorkerGuard), Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    fs::create_dir_all(&log_dir)?;

    let log_file_path = get_log_file_path(&log_dir);
    let raw_level = std::env::var(LOG_LEVEL_ENV).ok();
    let (subscriber, guard) = file_subscriber(&log_file_path, raw_level.as_deref())?;
    subscriber.init();

    tracing::info!("Logging initialized. Log file: {}", log_file_path.display());

    Ok((log_file_path, guard))
}

fn file_subscriber(
    log_file_path: &Path,
    raw_level: Option<&str>,
) -> Result<(impl Subscriber + Send + Sync + 'static, WorkerGuard), Box<dyn std::error::Error>> {
    let file = fs::File::create(log_file_path)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let subscriber = tracing_subscriber::registry()
        .with(build_log_filter(raw_level))
        .with(file_layer);

    Ok((subscriber, guard))
}

fn build_log_filter(raw_level: Option<&str>) -> EnvFilter {
    EnvFilter::new(filter_directive(raw_level))
}

fn filter_directive(raw_level: Option<&str>) -> String {
    let level = raw_level.and_then(normalize_log_level).unwrap_or("warn");
    format!("{level},taskboard={level}")
}

fn normalize_log_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

pub fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let data_dir = dirs::data_local_dir().ok_or("Failed to determine local data directory")?;
    Ok(data_dir.join("taskboard").join("logs"))
}

pub fn get_log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    log_dir.join(format!("{LOG_FILE_PREFIX}{timestamp}.log"))
}

pub fn print_log_location(log_path: &Path) {
    eprintln!();
    eprintln!("═══════════════════════════════════════════════════════════════");
    eprintln!("  Log file: {}", log_path.display());
    eprintln!("═══════════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_log_directory() {
        let dir = get_log_directory();
        assert!(dir.is_ok());
        let path = dir.unwrap();
        assert!(path.ends_with("taskboard/logs"));
    }

    #[test]
    fn test_get_log_file_path() {
        let dir = PathBuf::from("/tmp/test-logs");
        let path = get_log_file_path(&dir);
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with(LOG_FILE_PREFIX));
        assert!(file_name.ends_with(".log"));
        assert_eq!(path.parent(), Some(dir.as_path()));
    }

    #[test]
    fn test_normalize_log_level() {
        assert_eq!(normalize_log_level("TRACE"), Some("trace"));
        assert_eq!(normalize_log_level(" Debug "), Some("debug"));
        assert_eq!(normalize_log_level("warning"), Some("warn"));
        assert_eq!(normalize_log_level("nope"), None);
    }

    #[test]
    fn test_filter_directive_defaults_to_warn() {
        assert_eq!(filter_directive(None), "warn,taskboard=warn");
        assert_eq!(filter_directive(Some("loud")), "warn,taskboard=warn");
        assert_eq!(filter_directive(Some("INFO")), "info,taskboard=info");
    }

    #[test]
    fn dropping_the_guard_flushes_buffered_lines() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = get_log_file_path(temp_dir.path());
        let (subscriber, guard) =
            file_subscriber(&path, Some("warn")).expect("subscriber should build");

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("task store unreachable");
            tracing::debug!("below the filter");
        });
        drop(guard);

        let contents = fs::read_to_string(&path).expect("log file should exist");
        assert!(contents.contains("task store unreachable"));
        assert!(!contents.contains("below the filter"));
    }
}
