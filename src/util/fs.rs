//! Filesystem durability helpers.

use std::fs::File;
use std::io;
use std::path::Path;

/// `fsync` the directory holding `path` so a newly created entry survives power loss.
///
/// A bare file name refers to the current directory. No-op where directories
/// cannot be opened as files.
///
/// # Errors
///
/// Returns the I/O error from opening or syncing the directory.
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    File::open(parent)?.sync_all()
}

/// `fsync` the directory holding `path`. Directories cannot be synced here.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
