//! Shared logging utilities for HexClaw binaries.
//!
//! Two layers on one registry: a size-capped log file under
//! `~/.hexclaw/logs` and stderr. The file keeps a single `.old` backup;
//! when the live file exceeds the cap it is rotated and a fresh one
//! started, so disk use stays bounded without a scheduler.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "hexclaw=info,hexclaw_monitor=info,hexclaw_inference=info";
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by HexClaw binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a capped file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = CappedLogWriter::open(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Get the HexClaw home directory: ~/.hexclaw
pub fn hexclaw_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("HEXCLAW_HOME") {
        if !override_path.trim().is_empty() {
            return PathBuf::from(override_path);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hexclaw")
}

/// Get the logs directory: ~/.hexclaw/logs
pub fn logs_dir() -> PathBuf {
    hexclaw_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

struct CappedFile {
    path: PathBuf,
    backup_path: PathBuf,
    max_size: u64,
    file: File,
    written: u64,
}

impl CappedFile {
    fn open(path: PathBuf, max_size: u64) -> io::Result<Self> {
        let backup_path = path.with_extension("log.old");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            backup_path,
            max_size,
            file,
            written,
        })
    }

    /// Current file becomes `.old` (replacing any previous backup) and a
    /// fresh file is started.
    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        if self.backup_path.exists() {
            fs::remove_file(&self.backup_path)?;
        }
        fs::rename(&self.path, &self.backup_path)?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Clonable `MakeWriter` over the shared capped file.
#[derive(Clone)]
struct CappedLogWriter {
    inner: Arc<Mutex<CappedFile>>,
}

impl CappedLogWriter {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        let name = sanitize_name(app_name);
        let path = dir.join(format!("{}.log", name));
        let file = CappedFile::open(path, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct CappedLogGuard {
    inner: Arc<Mutex<CappedFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedLogWriter {
    type Writer = CappedLogGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CappedLogGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for CappedLogGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_file_rotates_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hexclaw.log");
        let mut file = CappedFile::open(path.clone(), 64).unwrap();

        for _ in 0..4 {
            file.write_all(&[b'x'; 32]).unwrap();
        }
        file.flush().unwrap();

        assert!(path.exists());
        assert!(dir.path().join("hexclaw.log.old").exists());
        // The live file restarted after rotation
        assert!(path.metadata().unwrap().len() <= 64);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hexclaw daemon/1"), "hexclaw_daemon_1");
    }
}
