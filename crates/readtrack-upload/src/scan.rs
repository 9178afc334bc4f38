//! Directory walking for watched roots.

use std::io;
use std::path::{Path, PathBuf};

use crate::claim::CLAIM_EXTENSION;

/// One file found by [`scan_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub len: u64,
}

/// Files under a watched root, in path order.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub files: Vec<ScannedFile>,
    pub bytes: u64,
}

impl Scan {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Walks `root` recursively. In-progress `.tmp` files and files claimed by
/// an upload are skipped. A missing root scans as empty.
pub fn scan_dir(root: &Path) -> io::Result<Scan> {
    let mut scan = Scan::default();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && !is_in_progress(&path) {
                let meta = entry.metadata()?;
                scan.bytes += meta.len();
                scan.files.push(ScannedFile {
                    path,
                    len: meta.len(),
                });
            }
        }
    }

    scan.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(scan)
}

fn is_in_progress(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "tmp" || ext == CLAIM_EXTENSION)
}

/// Removes empty directories below `root`, deepest first. `root` itself is
/// kept. Returns how many were removed.
pub fn prune_empty_dirs(root: &Path) -> io::Result<usize> {
    fn walk(dir: &Path, is_root: bool) -> io::Result<(bool, usize)> {
        let mut empty = true;
        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let (child_empty, child_removed) = walk(&entry.path(), false)?;
                removed += child_removed;
                if child_empty {
                    std::fs::remove_dir(entry.path())?;
                    removed += 1;
                } else {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }
        Ok((empty && !is_root, removed))
    }

    match walk(root, true) {
        Ok((_, removed)) => Ok(removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
