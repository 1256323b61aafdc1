//! Durable file replacement.
//!
//! The inventory and the local result store both overwrite files that other
//! tools read. Writes go to a sibling temp file which is synced and renamed
//! over the target. A failure at any point leaves either the old or the new
//! contents in place, never a truncated file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Atomically replaces the contents of `path` with `bytes`.
///
/// Creates parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp_path = temp_path_for(path);
    let written = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&tmp_path, path));
    if let Err(e) = written {
        // The temp file may not exist if opening it failed.
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    sync_entries(parent)
}

/// `<name>.tmp` next to `path`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Makes a rename inside `dir` durable. A no-op where directories cannot be
/// opened.
#[cfg(unix)]
fn sync_entries(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_entries(_dir: &Path) -> io::Result<()> {
    Ok(())
}
