//! Archive orchestration: walker → parallel compress pool → single-writer
//! pool → [`ZipWriter`].
//!
//! The walker enumerates input paths (recursing into directories, never
//! following symlinks), skips the archive being written, and feeds tasks to
//! the compress pool. Each compress worker streams its source through a
//! DEFLATE encoder into the task's spill buffer, then hands the task to the
//! writer pool, whose single worker serialises members into the container.
//! Member order therefore follows compression completion order; the
//! central directory always matches the local-header order.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use pzip_core::error::{PzipError, Result};
use pzip_core::pool::WorkerPool;
use pzip_core::Crc32;
use pzip_deflate::FlateWriter;

use crate::header::{
    needs_utf8_flag, system_time_to_dos, ExtendedTimestamp, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    METHOD_DEFLATE, METHOD_STORE, UNIX_IFLNK, ZIP_VERSION_20,
};
use crate::task::{FileTask, TaskPool, READ_BUFFER_SIZE};
use crate::writer::ZipWriter;

/// Progress callback: `(members written, members discovered)`. Invoked by
/// the writer worker after each member, from a worker thread.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Archiver configuration.
pub struct ArchiverOptions {
    /// Compress-pool worker count; 0 means hardware parallelism.
    pub concurrency: usize,
    /// DEFLATE level (0–9).
    pub level: u8,
    /// Optional progress callback.
    pub progress: Option<ProgressCallback>,
}

impl Default for ArchiverOptions {
    fn default() -> Self {
        Self {
            concurrency: 0,
            level: 1,
            progress: None,
        }
    }
}

/// Parallel ZIP archiver.
pub struct Archiver {
    archive_path: PathBuf,
    writer: Arc<ZipWriter>,
    compress_pool: WorkerPool<Box<FileTask>>,
    writer_pool: Arc<WorkerPool<Box<FileTask>>>,
    task_pool: Arc<TaskPool>,
    cancelled: Arc<AtomicBool>,
    total_files: Arc<AtomicUsize>,
}

impl Archiver {
    /// Create an archiver writing to `archive`.
    pub fn new(archive: impl Into<PathBuf>, options: ArchiverOptions) -> Self {
        let archive_path = archive.into();
        let writer = Arc::new(ZipWriter::new(&archive_path));
        let level = options.level.min(9);

        let cancelled = Arc::new(AtomicBool::new(false));
        let task_pool = Arc::new(TaskPool::new());
        let total_files = Arc::new(AtomicUsize::new(0));
        let processed_files = Arc::new(AtomicUsize::new(0));

        let writer_pool = {
            let writer = Arc::clone(&writer);
            let task_pool = Arc::clone(&task_pool);
            let cancelled = Arc::clone(&cancelled);
            let total_files = Arc::clone(&total_files);
            let progress = options.progress.clone();
            Arc::new(WorkerPool::new(
                move |mut task: Box<FileTask>| {
                    if cancelled.load(Ordering::Relaxed) {
                        task_pool.release(task);
                        return Err(PzipError::Cancelled);
                    }
                    let result = writer.create_raw(&task.header, |sink| task.buffer.replay(sink));
                    let done = processed_files.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(progress) = &progress {
                        progress(done, total_files.load(Ordering::Relaxed));
                    }
                    task_pool.release(task);
                    result
                },
                1,
                concurrency_capacity(options.concurrency),
            ))
        };

        let compress_pool = {
            let writer_pool = Arc::clone(&writer_pool);
            let task_pool = Arc::clone(&task_pool);
            let cancelled = Arc::clone(&cancelled);
            WorkerPool::new(
                move |mut task: Box<FileTask>| {
                    if cancelled.load(Ordering::Relaxed) {
                        task_pool.release(task);
                        return Err(PzipError::Cancelled);
                    }
                    match compress_task(&mut task, level) {
                        Ok(()) => {
                            populate_header(&mut task);
                            writer_pool.enqueue(task);
                            Ok(())
                        }
                        Err(err) => {
                            task_pool.release(task);
                            Err(err)
                        }
                    }
                },
                options.concurrency,
                concurrency_capacity(options.concurrency),
            )
        };

        Self {
            archive_path,
            writer,
            compress_pool,
            writer_pool,
            task_pool,
            cancelled,
            total_files,
        }
    }

    /// Archive the given paths. Directories are walked recursively; a path
    /// resolving to the archive itself is silently skipped.
    pub fn archive(&self, paths: &[PathBuf]) -> Result<()> {
        self.writer.open()?;
        self.compress_pool.start();
        self.writer_pool.start();

        // The archive file now exists; resolve it once for self-exclusion.
        let archive_canonical = fs::canonicalize(&self.archive_path).ok();

        let walk_result = self.walk_paths(paths, archive_canonical.as_deref());
        if walk_result.is_err() {
            self.cancel();
        }

        let compress_result = self.compress_pool.close();
        let write_result = self.writer_pool.close();

        walk_result?;
        compress_result?;
        write_result
    }

    fn walk_paths(&self, paths: &[PathBuf], archive: Option<&Path>) -> Result<()> {
        for path in paths {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }
            let meta = fs::symlink_metadata(path).map_err(|_| PzipError::not_found(path))?;

            if meta.is_dir() {
                let chroot = std::path::absolute(path)
                    .map_err(|_| PzipError::not_found(path))?;
                let base = chroot.parent().unwrap_or(Path::new("/")).to_path_buf();

                // The root directory itself becomes a member too.
                self.enqueue_path(&chroot, Some(&base))?;
                self.walk_directory(&chroot, &base, archive)?;
            } else {
                if is_same_file(path, archive) {
                    continue;
                }
                self.enqueue_path(path, None)?;
            }
        }
        Ok(())
    }

    fn walk_directory(&self, dir: &Path, base: &Path, archive: Option<&Path>) -> Result<()> {
        let entries = fs::read_dir(dir)
            .map_err(|e| PzipError::read(dir, format!("directory iteration error: {}", e)))?;
        for entry in entries {
            if self.cancelled.load(Ordering::Relaxed) {
                break;
            }
            let entry = entry
                .map_err(|e| PzipError::read(dir, format!("directory iteration error: {}", e)))?;
            let path = entry.path();
            if is_same_file(&path, archive) {
                continue;
            }

            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            // Enqueue; unreadable entries are skipped, not fatal.
            let mut task = self.task_pool.acquire();
            if task.reset(&path, Some(base)).is_ok() {
                self.total_files.fetch_add(1, Ordering::Relaxed);
                self.compress_pool.enqueue(task);
            } else {
                self.task_pool.release(task);
            }

            // Recurse into real directories only; symlinked directories
            // stay symlink members.
            if meta.is_dir() {
                self.walk_directory(&path, base, archive)?;
            }
        }
        Ok(())
    }

    fn enqueue_path(&self, path: &Path, base: Option<&Path>) -> Result<()> {
        let mut task = self.task_pool.acquire();
        if let Err(err) = task.reset(path, base) {
            self.task_pool.release(task);
            return Err(err);
        }
        self.total_files.fetch_add(1, Ordering::Relaxed);
        self.compress_pool.enqueue(task);
        Ok(())
    }

    /// Cancel the job: in-flight tasks complete, then workers exit.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.compress_pool.cancel();
        self.writer_pool.cancel();
    }

    /// Finalise the archive: write the central directory and EOCD.
    pub fn close(&self) -> Result<()> {
        if self.writer.is_open() {
            return self.writer.close();
        }
        Ok(())
    }

    /// Number of members discovered so far.
    pub fn total_files(&self) -> usize {
        self.total_files.load(Ordering::Relaxed)
    }
}

/// Queue capacity for both pipeline stages.
fn concurrency_capacity(concurrency: usize) -> usize {
    2 * pzip_core::pool::resolve_concurrency(concurrency)
}

/// Whether `path` resolves to the archive being written.
fn is_same_file(path: &Path, archive: Option<&Path>) -> bool {
    match archive {
        Some(archive) => fs::canonicalize(path)
            .map(|p| p == archive)
            .unwrap_or(false),
        None => false,
    }
}

/// Compress-stage executor body: stream the source through DEFLATE into
/// the task's buffer, computing the CRC alongside.
fn compress_task(task: &mut FileTask, level: u8) -> Result<()> {
    if task.is_dir {
        return Ok(());
    }

    if task.is_symlink {
        // The member payload is the link target string, stored verbatim.
        use std::io::Write;
        task.buffer
            .write_all(task.symlink_target.as_bytes())
            .map_err(|e| PzipError::write(e.to_string()))?;
        task.header.crc32 = Crc32::compute(task.symlink_target.as_bytes());
        return Ok(());
    }

    let mut file = File::open(&task.path).map_err(|e| PzipError::open(&task.path, e))?;

    let mut encoder = FlateWriter::new(&mut task.buffer, level);
    let mut chunk = vec![0u8; READ_BUFFER_SIZE];
    let mut crc = Crc32::new();
    let mut total_read = 0u64;

    loop {
        let n = file
            .read(&mut chunk)
            .map_err(|e| PzipError::read(&task.path, e.to_string()))?;
        if n == 0 {
            break;
        }
        crc.update(&chunk[..n]);
        encoder.write(&chunk[..n])?;
        total_read += n as u64;
    }

    if total_read != task.file_size {
        return Err(PzipError::read(
            &task.path,
            format!(
                "short read: expected {} bytes, got {}",
                task.file_size, total_read
            ),
        ));
    }

    encoder.close()?;
    drop(encoder);

    task.header.crc32 = crc.finalize();
    Ok(())
}

/// Fill in the member header once compression is done.
fn populate_header(task: &mut FileTask) {
    if needs_utf8_flag(&task.header.name) {
        task.header.flags |= FLAG_UTF8;
    }

    // Unix host, ZIP 2.0 baseline; the writer bumps to 4.5 for ZIP64.
    task.header.version_made_by = (3 << 8) | ZIP_VERSION_20;
    task.header.version_needed = ZIP_VERSION_20;

    let modified = task.modified.unwrap_or_else(SystemTime::now);
    let unix_mtime = modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let ts = ExtendedTimestamp {
        mod_time: unix_mtime,
    };
    task.header.extra.extend_from_slice(&ts.encode());

    let (date, time) = system_time_to_dos(modified);
    task.header.mod_date = date;
    task.header.mod_time = time;

    if task.is_dir {
        task.header.method = METHOD_STORE;
        task.header.flags &= !FLAG_DATA_DESCRIPTOR;
        task.header.uncompressed_size = 0;
        task.header.compressed_size = 0;
        task.header.crc32 = 0;
    } else if task.is_symlink {
        task.header.method = METHOD_STORE;
        task.header.flags &= !FLAG_DATA_DESCRIPTOR;
        task.header.uncompressed_size = task.symlink_target.len() as u64;
        task.header.compressed_size = task.symlink_target.len() as u64;
        task.header.external_attrs = (UNIX_IFLNK | 0o777) << 16;
    } else {
        task.header.method = METHOD_DEFLATE;
        task.header.flags |= FLAG_DATA_DESCRIPTOR;
        task.header.uncompressed_size = task.file_size;
        task.header.compressed_size = task.buffer.written();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FLAG_UTF8;
    use std::io::Write as _;

    fn task_for(path: &Path) -> Box<FileTask> {
        let pool = TaskPool::new();
        let mut task = pool.acquire();
        task.reset(path, None).unwrap();
        task
    }

    #[test]
    fn test_populate_header_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"contents").unwrap();

        let mut task = task_for(&path);
        compress_task(&mut task, 1).unwrap();
        populate_header(&mut task);

        assert_eq!(task.header.method, METHOD_DEFLATE);
        assert_ne!(task.header.flags & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(task.header.uncompressed_size, 8);
        assert_eq!(task.header.compressed_size, task.buffer.written());
        assert_ne!(task.header.crc32, 0);
        // Extended timestamp extra is always present.
        assert_eq!(task.header.extra.len(), 9);
    }

    #[test]
    fn test_populate_header_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("d");
        std::fs::create_dir(&sub).unwrap();

        let mut task = task_for(&sub);
        compress_task(&mut task, 1).unwrap();
        populate_header(&mut task);

        assert_eq!(task.header.method, METHOD_STORE);
        assert_eq!(task.header.flags & FLAG_DATA_DESCRIPTOR, 0);
        assert_eq!(task.header.uncompressed_size, 0);
        assert!(task.header.name.ends_with('/'));
    }

    #[cfg(unix)]
    #[test]
    fn test_populate_header_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("../target", &link).unwrap();

        let mut task = task_for(&link);
        compress_task(&mut task, 1).unwrap();
        populate_header(&mut task);

        assert_eq!(task.header.method, METHOD_STORE);
        assert!(task.header.is_symlink());
        assert_eq!(task.header.uncompressed_size, "../target".len() as u64);
        assert_eq!(
            task.header.crc32,
            Crc32::compute(b"../target")
        );
    }

    #[test]
    fn test_utf8_flag_set_for_non_ascii_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("\u{65e5}\u{672c}.txt");
        std::fs::write(&path, b"x").unwrap();

        let mut task = task_for(&path);
        compress_task(&mut task, 1).unwrap();
        populate_header(&mut task);
        assert_ne!(task.header.flags & FLAG_UTF8, 0);
    }

    #[test]
    fn test_short_read_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let mut task = task_for(&path);
        // Simulate the file shrinking between stat and read.
        task.file_size = 8192;
        let err = compress_task(&mut task, 1).unwrap_err();
        assert!(matches!(err, PzipError::Read { .. }));
    }

    #[test]
    fn test_compressed_output_lands_in_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeros.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; 1 << 20]).unwrap();
        drop(f);

        let mut task = task_for(&path);
        compress_task(&mut task, 1).unwrap();
        // A megabyte of zeros compresses far below the memory tier.
        assert!(task.buffer.written() > 0);
        assert!(task.buffer.written() < 64 * 1024);
        assert!(!task.buffer.overflowed());
    }
}
