//! Zip archive building.

use std::fs::File;
use std::io;
use std::path::{Component, Path};

use chrono::{DateTime, Local};
use readtrack_model::Category;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::UploadError;
use crate::claim::ClaimedFile;

/// `<category>_batch_<YYYYmmdd_HHMMSS>.zip`
pub fn archive_name(category: Category, now: DateTime<Local>) -> String {
    format!("{category}_batch_{}.zip", now.format("%Y%m%d_%H%M%S"))
}

/// Object key for an archive: `<category>/<archive-name>`.
pub fn object_key(category: Category, name: &str) -> String {
    format!("{category}/{name}")
}

/// Entry name for `path` inside an archive of `root`: the relative path
/// with `/` separators.
pub(crate) fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Writes claimed `files` into a deflated zip at `dest`. Entries are named
/// by each file's source path relative to `root`.
///
/// Blocking; call from `spawn_blocking`.
pub fn write_archive(root: &Path, files: &[ClaimedFile], dest: &Path) -> Result<(), UploadError> {
    let out = File::create(dest).map_err(|e| UploadError::io(dest, e))?;
    let mut zip = zip::ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let Some(name) = entry_name(root, &file.source) else {
            return Err(UploadError::io(
                &file.source,
                io::Error::new(io::ErrorKind::InvalidInput, "file is outside the watched root"),
            ));
        };
        zip.start_file(name, options)?;
        let mut src = File::open(&file.claimed).map_err(|e| UploadError::io(&file.claimed, e))?;
        io::copy(&mut src, &mut zip).map_err(|e| UploadError::io(&file.claimed, e))?;
    }

    zip.finish()?;
    Ok(())
}
