//! Append-only event log backing the minter state.
//!
//! Events are kept in memory for replay and paging. When opened on a file,
//! every event is also written as one JSON line and flushed before the append
//! returns.

use crate::state::event::Event;
use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to access event log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt event at {path}:{line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
struct FileSink {
    path: PathBuf,
    file: File,
}

#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    sink: Option<FileSink>,
}

impl EventLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the log at `path`, loading the events it already holds.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| StorageError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut events = Vec::new();
        match File::open(&path) {
            Ok(file) => {
                for (index, line) in BufReader::new(file).lines().enumerate() {
                    let line = line.map_err(io_error)?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let event =
                        serde_json::from_str(&line).map_err(|source| StorageError::Corrupt {
                            path: path.clone(),
                            line: index + 1,
                            source,
                        })?;
                    events.push(event);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(e)),
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;

        Ok(Self {
            events,
            sink: Some(FileSink { path, file }),
        })
    }

    pub fn append(&mut self, event: &Event) -> Result<(), StorageError> {
        if let Some(sink) = self.sink.as_mut() {
            let line = serde_json::to_string(event)?;
            writeln!(sink.file, "{line}")
                .and_then(|()| sink.file.flush())
                .map_err(|source| StorageError::Io {
                    path: sink.path.clone(),
                    source,
                })?;
        }
        self.events.push(event.clone());
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// At most `length` events starting at index `start`.
    pub fn range(&self, start: u64, length: u64) -> &[Event] {
        let len = self.events.len();
        let start = usize::try_from(start).unwrap_or(usize::MAX).min(len);
        let end = start
            .saturating_add(usize::try_from(length).unwrap_or(usize::MAX))
            .min(len);
        &self.events[start..end]
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|sink| sink.path.as_path())
    }

    /// Swaps the file handle for a read-only one, so that later appends fail.
    #[cfg(test)]
    pub(crate) fn reopen_read_only(&mut self) -> io::Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.file = File::open(&sink.path)?;
        }
        Ok(())
    }
}
