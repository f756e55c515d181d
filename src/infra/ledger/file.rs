//! File-backed checkpoint ledger using JSON lines.
//!
//! Layout: the first line is a [`LedgerHeader`], every following line one
//! [`CheckpointRecord`]. Records are appended and `fsync`ed one at a time, so a crash
//! can at worst leave a torn final line, which is ignored on load and cut off before
//! the next append.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::LedgerError;
use crate::core::ledger::{CheckpointLedger, CheckpointRecord};
use crate::core::run::RunIndex;
use crate::util::fs::sync_parent_dir;

/// First line of a ledger file, identifying the sweep it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHeader {
    /// Sweep name.
    pub sweep: String,
    /// Total number of runs in the sweep.
    pub total_runs: u64,
    /// When the ledger was created.
    pub created_at: DateTime<Utc>,
}

/// Durable JSONL ledger for one sweep.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    sweep: String,
    total_runs: u64,
    file: Option<File>,
}

impl FileLedger {
    /// Ledger at `path` for `sweep`. Nothing is touched on disk until the first
    /// `load` or `record`.
    pub fn open(path: impl AsRef<Path>, sweep: impl Into<String>, total_runs: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sweep: sweep.into(),
            total_runs,
            file: None,
        }
    }

    /// Location of the ledger file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(&self) -> Result<BTreeSet<RunIndex>, LedgerError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let complete = contents.ends_with('\n');
        let lines: Vec<&str> = contents.lines().collect();
        let last = lines.len().saturating_sub(1);
        let torn = |idx: usize| idx == last && !complete;

        let mut done = BTreeSet::new();
        let Some(header_line) = lines.first() else {
            return Ok(done);
        };
        let header: LedgerHeader = match serde_json::from_str(header_line) {
            Ok(header) => header,
            Err(_) if torn(0) => {
                warn!(path = %self.path.display(), "Ignoring torn ledger header");
                return Ok(done);
            }
            Err(e) => {
                return Err(LedgerError::Corrupt {
                    line: 1,
                    reason: e.to_string(),
                })
            }
        };
        if header.sweep != self.sweep || header.total_runs != self.total_runs {
            return Err(LedgerError::SweepMismatch {
                found: header.sweep,
                found_runs: header.total_runs,
                expected: self.sweep.clone(),
                expected_runs: self.total_runs,
            });
        }

        for (idx, line) in lines.iter().enumerate().skip(1) {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointRecord>(line) {
                Ok(record) => {
                    done.insert(record.run_index);
                }
                Err(_) if torn(idx) => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        "Ignoring torn trailing ledger record"
                    );
                }
                Err(e) => {
                    return Err(LedgerError::Corrupt {
                        line: idx + 1,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(done)
    }

    /// Open the file for appending, repairing a torn tail and writing the header if new.
    fn writer(&mut self) -> Result<&mut File, LedgerError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&self.path)?;
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;

            if contents.is_empty() {
                let header = LedgerHeader {
                    sweep: self.sweep.clone(),
                    total_runs: self.total_runs,
                    created_at: Utc::now(),
                };
                write_line(&mut file, &serde_json::to_string(&header)?)?;
                file.sync_data()?;
                sync_parent_dir(&self.path)?;
                info!(path = %self.path.display(), sweep = %self.sweep, "Created checkpoint ledger");
            } else if !contents.ends_with('\n') {
                let keep = contents.rfind('\n').map_or(0, |pos| pos + 1);
                let tail = &contents[keep..];
                if keep > 0 && serde_json::from_str::<CheckpointRecord>(tail).is_ok() {
                    // The record made it; only the newline is missing.
                    file.seek(SeekFrom::End(0))?;
                    write_line(&mut file, "")?;
                } else {
                    warn!(path = %self.path.display(), "Truncating torn ledger tail");
                    file.set_len(keep as u64)?;
                    if keep == 0 {
                        let header = LedgerHeader {
                            sweep: self.sweep.clone(),
                            total_runs: self.total_runs,
                            created_at: Utc::now(),
                        };
                        file.seek(SeekFrom::Start(0))?;
                        write_line(&mut file, &serde_json::to_string(&header)?)?;
                    }
                }
            }
            file.seek(SeekFrom::End(0))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| LedgerError::Unavailable("ledger file not open".into()))
    }

    fn append_to_disk(&mut self, record: &CheckpointRecord) -> Result<(), LedgerError> {
        let line = serde_json::to_string(record)?;
        let file = self.writer()?;
        write_line(file, &line)?;
        file.sync_data()?;
        Ok(())
    }
}

/// Write `line` plus newline in a single call.
fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
}

impl CheckpointLedger for FileLedger {
    fn load(&mut self) -> Result<BTreeSet<RunIndex>, LedgerError> {
        let done = self.load_from_disk()?;
        debug!(path = %self.path.display(), completed = done.len(), "Loaded checkpoint ledger");
        Ok(done)
    }

    fn record(&mut self, run_index: RunIndex) -> Result<(), LedgerError> {
        self.append_to_disk(&CheckpointRecord::now(run_index))
    }

    fn delete(&mut self) -> Result<(), LedgerError> {
        self.file = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted checkpoint ledger");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
