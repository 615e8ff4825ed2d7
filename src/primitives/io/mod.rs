#![forbid(unsafe_code)]
//! File helpers for whole-file persistence: atomic replacement, directory
//! sync and tolerant reads.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::trace;

use crate::types::Result;

/// Replaces `path` with the bytes produced by `fill`.
///
/// The content is written to a sibling temporary file, flushed, optionally
/// fsynced, then renamed over the target so readers never see a torn file.
pub fn write_atomic<F>(path: &Path, durable: bool, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let tmp = temp_sibling(path);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    let mut out = BufWriter::new(file);
    let written = fill(&mut out).and_then(|()| {
        out.flush()?;
        if durable {
            out.get_ref().sync_all()?;
        }
        Ok(())
    });
    if let Err(err) = written {
        drop(out);
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    drop(out);
    fs::rename(&tmp, path)?;
    if durable {
        if let Some(parent) = path.parent() {
            sync_dir(parent)?;
        }
    }
    trace!(path = %path.display(), durable, "io.write_atomic");
    Ok(())
}

/// Reads the whole file, returning `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Removes `path`, treating a missing file as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Flushes directory metadata so renames and unlinks survive a crash.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Lists files in `dir` whose names start with `prefix` and end with
/// `suffix`, sorted by name.
pub fn list_files(dir: &Path, prefix: &str, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(prefix) && name.ends_with(suffix) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
