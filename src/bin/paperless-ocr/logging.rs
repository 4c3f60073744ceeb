//! Subscriber setup: stderr plus an optional size-rotated log file.
//!
//! The file keeps `<path>` as the live log and `<path>.1` … `<path>.N` as
//! backups, `.1` being the most recent. Rotation happens before a write
//! that would push the live file past the size limit, so an event is never
//! split across files.

use paperless_ocr::PipelineConfig;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Where and how to keep the log file.
#[derive(Debug, Clone)]
pub struct LogFileSettings {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
}

impl LogFileSettings {
    /// File logging settings, or `None` when no log file is configured.
    pub fn from_config(config: &PipelineConfig) -> Option<Self> {
        config.log_file.as_ref().map(|path| Self {
            path: path.clone(),
            max_bytes: config.log_max_bytes,
            backups: config.log_backups,
        })
    }
}

/// Install the global subscriber.
///
/// `stderr_level` applies to the terminal unless `RUST_LOG` is set; the
/// file always records `file_level` and above.
pub fn init(
    stderr_level: &str,
    file_level: &str,
    file: Option<&LogFileSettings>,
) -> io::Result<()> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stderr_filter);

    let file_layer = match file {
        Some(settings) => {
            let writer = RotatingFile::open(&settings.path, settings.max_bytes, settings.backups)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new(file_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

struct RotatingState {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingState {
    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file.set_len(0)?;
            self.file = open_append(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        for index in (1..self.backups).rev() {
            rename_if_exists(&self.backup_path(index), &self.backup_path(index + 1))?;
        }
        rename_if_exists(&self.path, &self.backup_path(1))?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn rename_if_exists(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// A [`MakeWriter`] appending to a size-rotated file.
#[derive(Clone)]
pub struct RotatingFile {
    state: Arc<Mutex<RotatingState>>,
}

impl RotatingFile {
    pub fn open(path: &Path, max_bytes: u64, backups: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            state: Arc::new(Mutex::new(RotatingState {
                path: path.to_path_buf(),
                max_bytes: max_bytes.max(1),
                backups,
                file,
                written,
            })),
        })
    }
}

/// Handle returned for each event.
pub struct RotatingFileWriter {
    state: Arc<Mutex<RotatingState>>,
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileWriter {
            state: Arc::clone(&self.state),
        }
    }
}
