//! Buffered append-only file logger
//!
//! The file is created lazily on the first write and opened in append mode.
//! Writes are collected in memory and pushed to the file once
//! `buffer_count` of them are pending. `close()` flushes and releases the
//! handle; dropping the logger does the same.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::record::RecordSink;

/// Default extension for binary record files
pub const RECORD_EXTENSION: &str = "bin";
/// Default extension for text logs
pub const TEXT_EXTENSION: &str = "log";

/// Append `.{default_ext}` unless `name` already ends with a three letter extension
pub fn file_name_with_extension(name: &str, default_ext: &str) -> String {
    let has_ext = name.rsplit_once('.').is_some_and(|(stem, ext)| {
        !stem.is_empty() && ext.len() == 3 && ext.chars().all(|c| c.is_alphanumeric() || c == '_')
    });
    if has_ext {
        name.to_string()
    } else {
        format!("{}.{}", name, default_ext)
    }
}

/// Scoped, buffered file writer
#[derive(Debug)]
pub struct FileLogger {
    path: PathBuf,
    file: Option<File>,
    pending: Vec<u8>,
    pending_count: usize,
    buffer_count: usize,
    paused: bool,
}

impl FileLogger {
    pub const DEFAULT_BUFFER_COUNT: usize = 10;

    /// Logger for `dir/name`, adding `default_ext` when `name` has none
    pub fn new(dir: impl AsRef<Path>, name: &str, default_ext: &str) -> Self {
        Self {
            path: dir.as_ref().join(file_name_with_extension(name, default_ext)),
            file: None,
            pending: Vec::new(),
            pending_count: 0,
            buffer_count: Self::DEFAULT_BUFFER_COUNT,
            paused: false,
        }
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn open(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                log::debug!("Opening log file {}", self.path.display());
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?
            }
        };
        Ok(self.file.insert(file))
    }

    /// Queue bytes; flushes once `buffer_count` writes are pending
    pub fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        if self.paused {
            return Ok(());
        }
        self.open()?;
        self.pending.extend_from_slice(data);
        self.pending_count += 1;
        if self.pending_count >= self.buffer_count {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Queue one text line
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write_bytes(&data)
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            self.pending_count = 0;
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        self.pending_count = 0;
        let file = self.open()?;
        file.write_all(&pending)?;
        file.flush()
    }

    /// Flush pending writes and release the file handle
    ///
    /// A closed logger reopens (in append mode) on the next write.
    pub fn close(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let result = self.flush_pending();
        self.file = None;
        result
    }
}

impl Write for FileLogger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()
    }
}

impl RecordSink for FileLogger {
    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn close(&mut self) -> io::Result<()> {
        FileLogger::close(self)
    }
}

impl Drop for FileLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to flush log file {}: {}", self.path.display(), e);
        }
    }
}
