use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::MakeWriter;

pub const LOG_FILE_PREFIX: &str = "wardrobe-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const LOG_RETENTION_DAYS: i64 = 14;

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Logs to `<data_dir>/logs/wardrobe-YYYY-MM-DD.log`, one file per UTC day.
pub fn init_logging(data_dir: &Path) -> Result<()> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    cleanup_old_logs(&log_dir, Utc::now(), LOG_RETENTION_DAYS)?;

    let writer = DailyLogWriter::new(log_dir, LOG_RETENTION_DAYS)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .init();
}

#[derive(Debug)]
struct DailyState {
    day_key: String,
    file: File,
}

#[derive(Clone, Debug)]
struct DailyLogWriter {
    log_dir: PathBuf,
    retention_days: i64,
    state: Arc<Mutex<DailyState>>,
}

impl DailyLogWriter {
    fn new(log_dir: PathBuf, retention_days: i64) -> Result<Self> {
        let day_key = day_key(Utc::now());
        let file = open_log_file(&log_dir, &day_key)?;
        Ok(Self {
            log_dir,
            retention_days,
            state: Arc::new(Mutex::new(DailyState { day_key, file })),
        })
    }

    fn write_rotating(&self, buf: &[u8]) -> io::Result<usize> {
        let now = Utc::now();
        let today = day_key(now);
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("failed to lock log writer"))?;
        if state.day_key != today {
            state.file.flush()?;
            state.file = open_log_file(&self.log_dir, &today)?;
            state.day_key = today;
            let _ = cleanup_old_logs(&self.log_dir, now, self.retention_days);
        }
        state.file.write(buf)
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_rotating(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("failed to lock log writer"))?;
        state.file.flush()
    }
}

fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

fn open_log_file(log_dir: &Path, day: &str) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{LOG_FILE_PREFIX}{day}{LOG_FILE_SUFFIX}")))
}

fn parse_log_file_day(file_name: &str) -> Option<NaiveDate> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

/// Deletes log files whose day is older than `retention_days` before `now`.
pub fn cleanup_old_logs(log_dir: &Path, now: DateTime<Utc>, retention_days: i64) -> Result<()> {
    let cutoff = (now - Duration::days(retention_days)).date_naive();
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_log_file_day)
        else {
            continue;
        };
        if day < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}
