pub mod config;
pub mod mcp_client;

use std::path::Path;

use config::{LogFormat, LoggingConfig};
use mcp_client::McpError;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. With a log file configured:
/// 1. Rotates existing logs (bridge.log → bridge.log.1 → .2 …, keeps `keep`).
/// 2. Opens a fresh file with a line-flushing writer for crash resilience.
///
/// Without one, logs go to stderr so stdout stays free for tool output.
pub fn init_tracing(logging: &LoggingConfig) -> Result<(), McpError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (writer, ansi) = match &logging.file {
        Some(path) => (BoxMakeWriter::new(open_log_file(path, logging.keep)?), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| McpError::ConfigError {
        reason: format!("failed to install tracing subscriber: {e}"),
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?logging.file,
        pid = std::process::id(),
        "=== mcp-bridge starting ==="
    );
    Ok(())
}

/// Rotate and open the log file at `path`.
fn open_log_file(path: &Path, keep: u32) -> Result<FlushingWriter, McpError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| McpError::ConfigError {
            reason: format!("failed to create log directory {}: {e}", dir.display()),
        })?;
    }

    rotate_log_file(path, keep);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| McpError::ConfigError {
            reason: format!("failed to open {}: {e}", path.display()),
        })?;

    Ok(FlushingWriter::new(file))
}

/// Rotate log files: `bridge.log` → `bridge.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
/// `keep == 0` simply truncates by removing the current file.
fn rotate_log_file(base_path: &Path, keep: u32) {
    if keep == 0 {
        let _ = std::fs::remove_file(base_path);
        return;
    }

    // Delete the oldest
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    // Shift: .{n-1} → .{n}
    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    // Current → .1
    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Without explicit flushing, log entries may sit in OS buffers and be lost
/// when a crashing server takes the process down with it.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("bridge.log");
        let numbered = |i: u32| tmp.path().join(format!("bridge.log.{i}"));

        std::fs::write(&base, "current").unwrap();
        std::fs::write(numbered(1), "one").unwrap();
        std::fs::write(numbered(2), "two").unwrap();

        rotate_log_file(&base, 2);

        assert!(!base.exists());
        assert_eq!(std::fs::read_to_string(numbered(1)).unwrap(), "current");
        assert_eq!(std::fs::read_to_string(numbered(2)).unwrap(), "one");
        assert!(!numbered(3).exists());
    }

    #[test]
    fn test_rotate_log_file_with_gaps() {
        let tmp = tempfile::TempDir::new().unwrap();
        let base = tmp.path().join("bridge.log");
        rotate_log_file(&base, 3);
        assert!(!base.exists());

        std::fs::write(&base, "only").unwrap();
        rotate_log_file(&base, 3);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("bridge.log.1")).unwrap(),
            "only"
        );
    }

    #[test]
    fn test_open_log_file_creates_parent_and_flushes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("bridge.log");

        let mut writer = open_log_file(&path, 3).unwrap();
        writer.write_all(b"first line\n").unwrap();
        // Visible without an explicit flush or drop.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first line\n");

        let mut writer = open_log_file(&path, 3).unwrap();
        writer.write_all(b"second run\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second run\n");
        assert_eq!(
            std::fs::read_to_string(path.with_file_name("bridge.log.1")).unwrap(),
            "first line\n"
        );
    }
}
