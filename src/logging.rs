//! Logger setup.
//!
//! Records go through the `log` facade to `env_logger`, which writes every
//! line both to stdout and to `<data>/app.log`. The file rolls over to a
//! gzipped backup once it reaches 10 MiB; three backups are kept, none older
//! than 28 days.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::config::{LogConfig, LogFormat};

pub const LOG_FILE: &str = "app.log";

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const MAX_BACKUPS: usize = 3;
const MAX_BACKUP_AGE: Duration = Duration::from_secs(28 * 24 * 60 * 60);

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// Installs the global logger for this process.
pub fn init(config: &LogConfig, data_dir: &Path) -> Result<(), LoggingError> {
    let path = data_dir.join(LOG_FILE);
    let file = RotatingFile::open(&path, Retention::default())
        .map_err(|source| LoggingError::Io { path, source })?;

    let format = config.format;
    env_logger::Builder::new()
        .filter_level(config.level.as_filter())
        .format(move |buf, record| {
            let line = render_line(
                format,
                Utc::now(),
                record.level(),
                record.target(),
                &record.args().to_string(),
            );
            writeln!(buf, "{line}")
        })
        .target(env_logger::Target::Pipe(Box::new(Tee { file })))
        .try_init()?;

    Ok(())
}

fn render_line(
    format: LogFormat,
    time: DateTime<Utc>,
    level: log::Level,
    target: &str,
    msg: &str,
) -> String {
    let time = time.to_rfc3339_opts(SecondsFormat::Millis, true);
    match format {
        LogFormat::Text => format!("{time} {level:<5} {target}: {msg}"),
        LogFormat::Json => serde_json::json!({
            "time": time,
            "level": level.as_str().to_lowercase(),
            "target": target,
            "msg": msg,
        })
        .to_string(),
    }
}

/// Writes to stdout and the log file.
struct Tee {
    file: RotatingFile,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().lock().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()?;
        self.file.flush()
    }
}

/// Size and age limits for the log file and its backups.
#[derive(Debug, Clone, Copy)]
struct Retention {
    max_bytes: u64,
    keep: usize,
    max_age: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            keep: MAX_BACKUPS,
            max_age: MAX_BACKUP_AGE,
        }
    }
}

/// Append-only file that rolls over before a write would take it past
/// `max_bytes`. A single record larger than the limit still goes to a fresh
/// file in one piece.
struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    retention: Retention,
}

impl RotatingFile {
    fn open(path: &Path, retention: Retention) -> io::Result<Self> {
        let mut written = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if written > retention.max_bytes {
            rotate(path, retention)?;
            written = 0;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: open_append(path)?,
            written,
            retention,
        })
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        rotate(&self.path, self.retention)?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.retention.max_bytes {
            self.roll()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Compresses `app.log` into `app.log.1.gz`, shifting older backups up to
/// `app.log.<keep>.gz`, then drops backups past `max_age`.
fn rotate(path: &Path, retention: Retention) -> io::Result<()> {
    if retention.keep == 0 {
        return fs::remove_file(path);
    }

    for i in (1..retention.keep).rev() {
        let from = backup_path(path, i);
        if from.exists() {
            fs::rename(&from, backup_path(path, i + 1))?;
        }
    }
    compress(path, &backup_path(path, 1))?;
    fs::remove_file(path)?;
    prune_expired(path, retention)
}

fn compress(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let mut encoder = GzEncoder::new(File::create(dst)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()
}

fn prune_expired(path: &Path, retention: Retention) -> io::Result<()> {
    for i in 1..=retention.keep {
        let backup = backup_path(path, i);
        let modified = match fs::metadata(&backup).and_then(|meta| meta.modified()) {
            Ok(time) => time,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if modified.elapsed().map_or(false, |age| age > retention.max_age) {
            fs::remove_file(&backup)?;
        }
    }
    Ok(())
}

fn backup_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}.gz"));
    PathBuf::from(name)
}

/// Returns the last `n` lines of the file at `path`.
pub fn tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = VecDeque::with_capacity(n);

    for line in reader.split(b'\n') {
        let line = line?;
        if lines.len() == n {
            lines.pop_front();
        }
        if n > 0 {
            lines.push_back(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string());
        }
    }

    Ok(lines.into())
}
