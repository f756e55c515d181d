//! Storage backend implementations.

pub mod jsonl;
pub mod memory;

use std::path::Path;

use serde::Serialize;

use crate::core::error::StorageError;
use crate::core::storage::StorageBackend;

pub use jsonl::{EntryKind, JsonlBackend, StoredEntry};
pub use memory::{BackendCall, MemoryBackend};

/// Pick a file backend from the extension of `path`.
///
/// # Errors
///
/// [`StorageError::UnsupportedTarget`] for unknown or missing extensions.
pub fn backend_for_path<R>(path: impl AsRef<Path>) -> Result<Box<dyn StorageBackend<R>>, StorageError>
where
    R: Serialize + 'static,
{
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jsonl" | "ndjson" | "json") => Ok(Box::new(JsonlBackend::new(path))),
        _ => Err(StorageError::UnsupportedTarget(path.display().to_string())),
    }
}
