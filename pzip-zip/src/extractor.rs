//! Parallel extraction: one pool task per archive member.
//!
//! Each task ensures parent directories exist, then creates a directory,
//! re-creates a symlink, or decompresses to a file. Permissions and
//! modification times are restored from the member header; existing files
//! are silently skipped when overwriting is disabled. Directory metadata is
//! applied in a final pass so child writes cannot disturb it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use pzip_core::error::{PzipError, Result};
use pzip_core::pool::WorkerPool;

use crate::archiver::ProgressCallback;
use crate::reader::{ZipEntry, ZipReader};

/// Extractor configuration.
pub struct ExtractorOptions {
    /// Worker count; 0 means hardware parallelism.
    pub concurrency: usize,
    /// Overwrite existing files. When false, existing files are skipped.
    pub overwrite: bool,
    /// Restore POSIX permissions from the external attributes.
    pub preserve_permissions: bool,
    /// Optional progress callback.
    pub progress: Option<ProgressCallback>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            concurrency: 0,
            overwrite: true,
            preserve_permissions: true,
            progress: None,
        }
    }
}

/// Parallel ZIP extractor.
pub struct Extractor {
    output_dir: PathBuf,
    options: ExtractorOptions,
    cancelled: Arc<AtomicBool>,
}

impl Extractor {
    /// Create an extractor targeting `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, options: ExtractorOptions) -> Self {
        Self {
            output_dir: output_dir.into(),
            options,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Extract every member of `archive` into the output directory.
    pub fn extract(&self, archive: &Path) -> Result<()> {
        let reader = Arc::new(ZipReader::open(archive)?);

        let output_dir = std::path::absolute(&self.output_dir)
            .unwrap_or_else(|_| self.output_dir.clone());
        fs::create_dir_all(&output_dir)
            .map_err(|e| PzipError::write(format!("cannot create output directory: {}", e)))?;

        let total = reader.entries().len();
        let processed = Arc::new(AtomicUsize::new(0));

        let pool = {
            let reader = Arc::clone(&reader);
            let output_dir = output_dir.clone();
            let cancelled = Arc::clone(&self.cancelled);
            let processed = Arc::clone(&processed);
            let progress = self.options.progress.clone();
            let overwrite = self.options.overwrite;
            let preserve_permissions = self.options.preserve_permissions;
            WorkerPool::new(
                move |index: usize| {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(PzipError::Cancelled);
                    }
                    let entry = &reader.entries()[index];
                    let result = extract_entry(
                        &reader,
                        entry,
                        &output_dir,
                        overwrite,
                        preserve_permissions,
                    );
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &progress {
                        progress(done, total);
                    }
                    result
                },
                self.options.concurrency,
                2 * pzip_core::pool::resolve_concurrency(self.options.concurrency),
            )
        };

        pool.start();
        for index in 0..total {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }
            pool.enqueue(index);
        }
        pool.close()?;

        // Directory metadata last: children no longer touch their parents.
        if self.options.preserve_permissions {
            for entry in reader.entries() {
                if entry.is_directory() {
                    let path = output_path(&output_dir, &entry.header.name);
                    apply_metadata(&path, entry, true)?;
                }
            }
        }
        Ok(())
    }

    /// Cancel the job; in-flight members finish, the rest are dropped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Join a member name onto the output directory, dropping path components
/// that would escape it (`..`, absolute prefixes).
fn output_path(output_dir: &Path, name: &str) -> PathBuf {
    let mut path = output_dir.to_path_buf();
    for component in Path::new(name).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

fn extract_entry(
    reader: &ZipReader,
    entry: &ZipEntry,
    output_dir: &Path,
    overwrite: bool,
    preserve_permissions: bool,
) -> Result<()> {
    let path = output_path(output_dir, &entry.header.name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PzipError::write(format!("cannot create {}: {}", parent.display(), e)))?;
    }

    if entry.is_directory() {
        fs::create_dir_all(&path)
            .map_err(|e| PzipError::write(format!("cannot create {}: {}", path.display(), e)))?;
        return Ok(());
    }

    if entry.header.is_symlink() {
        return extract_symlink(reader, entry, &path, overwrite);
    }

    if path.exists() && !overwrite {
        return Ok(());
    }

    let data = reader.read_decompressed(entry)?;
    let mut file = File::create(&path).map_err(|e| PzipError::open(&path, e))?;
    file.write_all(&data)
        .map_err(|e| PzipError::write(e.to_string()))?;

    // Restore mtime on the handle before it closes.
    let _ = file.set_modified(entry.modified());
    drop(file);

    if preserve_permissions {
        apply_metadata(&path, entry, false)?;
    }
    Ok(())
}

fn extract_symlink(
    reader: &ZipReader,
    entry: &ZipEntry,
    path: &Path,
    overwrite: bool,
) -> Result<()> {
    let target = reader.read_decompressed(entry)?;
    let target = PathBuf::from(String::from_utf8_lossy(&target).into_owned());

    match fs::symlink_metadata(path) {
        Ok(_) if !overwrite => return Ok(()),
        Ok(_) => {
            fs::remove_file(path)
                .map_err(|e| PzipError::write(format!("cannot replace {}: {}", path.display(), e)))?;
        }
        Err(_) => {}
    }

    std::os::unix::fs::symlink(&target, path)
        .map_err(|e| PzipError::write(format!("cannot create symlink {}: {}", path.display(), e)))
}

/// Apply POSIX mode and mtime to an extracted path.
fn apply_metadata(path: &Path, entry: &ZipEntry, directory: bool) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = entry.header.unix_mode() & 0o7777;
        if mode != 0 {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
        }
    }

    if directory {
        if let Ok(file) = File::open(path) {
            let _ = file.set_modified(entry.modified());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_strips_traversal() {
        let out = Path::new("/tmp/out");
        assert_eq!(
            output_path(out, "a/b.txt"),
            Path::new("/tmp/out/a/b.txt")
        );
        assert_eq!(
            output_path(out, "../../etc/passwd"),
            Path::new("/tmp/out/etc/passwd")
        );
        assert_eq!(
            output_path(out, "/abs/file"),
            Path::new("/tmp/out/abs/file")
        );
    }
}
