//! Claiming scanned files for one upload.
//!
//! A file is claimed by renaming `<name>` to `<name>.uploading`. From then
//! on the pipeline owns it: scans skip it, and a writer that wants to add to
//! `<name>` finds nothing there and starts a fresh file. After a confirmed
//! upload the claimed files are deleted. After a failure they are put back,
//! next to any fresh file written meanwhile, never over it.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::scan::{Scan, ScannedFile};

pub(crate) const CLAIM_EXTENSION: &str = "uploading";

/// A source file renamed for the duration of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFile {
    /// Where the file lived, and where its archive entry is named from.
    pub source: PathBuf,
    /// Where it lives while claimed.
    pub claimed: PathBuf,
    pub len: u64,
}

/// `<path>.uploading`
pub(crate) fn claim_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(CLAIM_EXTENSION);
    PathBuf::from(name)
}

/// Claims every file of `scan`. Files that vanished since the scan are
/// skipped. On error, files claimed so far are released again.
///
/// Blocking; call from `spawn_blocking`.
pub fn claim_files(scan: &Scan) -> io::Result<Vec<ClaimedFile>> {
    let mut claimed = Vec::with_capacity(scan.len());
    for ScannedFile { path, .. } in &scan.files {
        let target = claim_path(path);
        match std::fs::rename(path, &target).and_then(|()| std::fs::metadata(&target)) {
            Ok(meta) => claimed.push(ClaimedFile {
                source: path.clone(),
                claimed: target,
                len: meta.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                release_claims(&claimed);
                return Err(e);
            }
        }
    }
    Ok(claimed)
}

/// Deletes claimed files after a confirmed upload. Returns how many were
/// removed.
pub(crate) fn delete_claims(files: &[ClaimedFile]) -> usize {
    let mut deleted = 0;
    for file in files {
        match std::fs::remove_file(&file.claimed) {
            Ok(()) => deleted += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %file.claimed.display(), error = %e, "failed to delete uploaded file")
            }
        }
    }
    deleted
}

/// Puts claimed files back under their source names. Returns how many
/// were restored. A file that cannot be restored stays claimed and is
/// picked up by [`recover_claims`] on a later pass.
pub(crate) fn release_claims(files: &[ClaimedFile]) -> usize {
    files
        .iter()
        .filter(|file| match restore(&file.claimed, &file.source) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %file.claimed.display(), error = %e, "failed to release claimed file");
                false
            }
        })
        .count()
}

/// Releases claims left under `root` by an interrupted pass. Must only run
/// while no upload of `root` is in flight.
pub(crate) fn recover_claims(root: &Path) -> io::Result<usize> {
    let mut recovered = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == CLAIM_EXTENSION) {
                restore(&path, &path.with_extension(""))?;
                recovered += 1;
            }
        }
    }
    Ok(recovered)
}

/// Moves `claimed` back to `source`, or to the first free `<stem>-N.<ext>`
/// beside it when a newer `source` exists. Hard links never replace an
/// existing file, so a concurrent writer's file is left alone.
fn restore(claimed: &Path, source: &Path) -> io::Result<()> {
    let mut target = source.to_path_buf();
    let mut n = 1;
    loop {
        match std::fs::hard_link(claimed, &target) {
            Ok(()) => return std::fs::remove_file(claimed),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                n += 1;
                target = sibling(source, n);
            }
            Err(e) => return Err(e),
        }
    }
}

fn sibling(source: &Path, n: u32) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{stem}-{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{n}"),
    };
    source.with_file_name(name)
}
