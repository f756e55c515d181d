//! JSON-lines result backend.
//!
//! Every call appends one line
//! `{"run": "run_00000003", "run_index": 3, "kind": "result", "payload": ..., "stored_at": ...}`
//! and syncs it to disk before returning.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::StorageError;
use crate::core::run::{run_name, RunIndex};
use crate::core::storage::StorageBackend;
use crate::util::fs::sync_parent_dir;

/// Kind of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A run result.
    Result,
    /// An error payload.
    Error,
}

/// One line of a JSONL result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Canonical run name.
    pub run: String,
    /// Run index.
    pub run_index: RunIndex,
    /// Result or error.
    pub kind: EntryKind,
    /// Serialized result, or the error message as a string.
    pub payload: serde_json::Value,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

/// Appends results to a JSONL file. The file is opened lazily on the first write.
#[derive(Debug)]
pub struct JsonlBackend {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlBackend {
    /// Backend writing to `path`; parent directories are created as needed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
        }
    }

    /// Target file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries of a JSONL result file.
    ///
    /// # Errors
    ///
    /// [`StorageError::Io`] if the file cannot be read or a line cannot be parsed.
    pub fn load_entries(path: impl AsRef<Path>) -> Result<Vec<StoredEntry>, StorageError> {
        let file = File::open(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| StorageError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|e| StorageError::Io(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, StorageError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            let existed = self.path.exists();
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| StorageError::Io(e.to_string()))?;
            if !existed {
                sync_parent_dir(&self.path).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            debug!(path = %self.path.display(), "Opened JSONL result file");
            self.writer = Some(BufWriter::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::Io("result file not open".into()))
    }

    fn append(
        &mut self,
        run_index: RunIndex,
        kind: EntryKind,
        payload: serde_json::Value,
    ) -> Result<(), StorageError> {
        let entry = StoredEntry {
            run: run_name(run_index),
            run_index,
            kind,
            payload,
            stored_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).map_err(|e| StorageError::Backend {
            run_index,
            reason: e.to_string(),
        })?;
        let writer = self.writer()?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .and_then(|()| writer.get_ref().sync_data())
            .map_err(|e| StorageError::Backend {
                run_index,
                reason: e.to_string(),
            })
    }
}

impl<R> StorageBackend<R> for JsonlBackend
where
    R: Serialize,
{
    fn write(&mut self, run_index: RunIndex, result: &R) -> Result<(), StorageError> {
        let payload = serde_json::to_value(result).map_err(|e| StorageError::Backend {
            run_index,
            reason: e.to_string(),
        })?;
        self.append(run_index, EntryKind::Result, payload)
    }

    fn write_error(&mut self, run_index: RunIndex, error: &str) -> Result<(), StorageError> {
        self.append(run_index, EntryKind::Error, serde_json::Value::from(error))
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(|e| StorageError::Io(e.to_string()))?;
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for JsonlBackend {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_appends_one_line_per_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("results.jsonl");
        let mut backend = JsonlBackend::new(&path);

        StorageBackend::<serde_json::Value>::write(&mut backend, 0, &json!({"rate": 2.5})).unwrap();
        StorageBackend::<serde_json::Value>::write_error(&mut backend, 1, "diverged").unwrap();
        StorageBackend::<serde_json::Value>::flush(&mut backend).unwrap();

        let entries = JsonlBackend::load_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run, "run_00000000");
        assert_eq!(entries[0].kind, EntryKind::Result);
        assert_eq!(entries[0].payload, json!({"rate": 2.5}));
        assert_eq!(entries[1].run_index, 1);
        assert_eq!(entries[1].kind, EntryKind::Error);
        assert_eq!(entries[1].payload, json!("diverged"));
    }

    #[test]
    fn test_each_write_is_on_disk_before_returning() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let mut backend = JsonlBackend::new(&path);

        StorageBackend::<u32>::write(&mut backend, 0, &7).unwrap();
        assert_eq!(JsonlBackend::load_entries(&path).unwrap().len(), 1);
        StorageBackend::<u32>::write_error(&mut backend, 1, "diverged").unwrap();
        assert_eq!(JsonlBackend::load_entries(&path).unwrap().len(), 2);
    }
}
