//! The unit of work travelling through the archive pipeline, and its
//! two-tier compressed-data buffer.
//!
//! Small files stay entirely in a fixed in-memory region; once it fills, a
//! temp file is created lazily and the remainder spills to disk without
//! back-pressuring the compressor. The temp file is unlinked when the task
//! is reset or dropped.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use pzip_core::error::{PzipError, Result};

use crate::header::ZipFileHeader;

/// In-memory tier capacity per task.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Chunk size for temp-file replay and source reads.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Upper bound on pooled idle tasks.
const TASK_POOL_LIMIT: usize = 32;

/// Two-tier buffer: a fixed in-memory region backed by a lazily created
/// overflow temp file.
pub struct SpillBuffer {
    buffer: Vec<u8>,
    overflow: Option<NamedTempFile>,
    written: u64,
}

impl SpillBuffer {
    /// Create an empty buffer; the memory tier is allocated up front.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            overflow: None,
            written: 0,
        }
    }

    /// Total bytes accepted across both tiers.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Whether any bytes spilled to the temp file.
    pub fn overflowed(&self) -> bool {
        self.overflow.is_some()
    }

    /// Drop all content. The overflow file, if any, is unlinked.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = None;
        self.written = 0;
    }

    /// Replay the content into `sink`: the memory region first, then the
    /// temp file in [`READ_BUFFER_SIZE`] chunks from offset 0.
    pub fn replay(&mut self, sink: &mut dyn Write) -> Result<()> {
        if !self.buffer.is_empty() {
            sink.write_all(&self.buffer)
                .map_err(|e| PzipError::write(e.to_string()))?;
        }
        if let Some(overflow) = self.overflow.as_mut() {
            let file = overflow.as_file_mut();
            file.flush()?;
            file.seek(SeekFrom::Start(0))?;
            let mut chunk = vec![0u8; READ_BUFFER_SIZE];
            loop {
                let n = file.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                sink.write_all(&chunk[..n])
                    .map_err(|e| PzipError::write(e.to_string()))?;
            }
        }
        Ok(())
    }
}

impl Default for SpillBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for SpillBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let available = DEFAULT_BUFFER_SIZE - self.buffer.len();
        let to_memory = available.min(data.len());
        self.buffer.extend_from_slice(&data[..to_memory]);

        let rest = &data[to_memory..];
        if !rest.is_empty() {
            if self.overflow.is_none() {
                let file = tempfile::Builder::new().prefix("pzip-").tempfile()?;
                self.overflow = Some(file);
            }
            if let Some(overflow) = self.overflow.as_mut() {
                overflow.write_all(rest)?;
            }
        }

        self.written += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(overflow) = self.overflow.as_mut() {
            overflow.flush()?;
        }
        Ok(())
    }
}

/// A file travelling through the pipeline: source metadata, the member
/// header being populated, and the compressed-data buffer.
pub struct FileTask {
    /// Source path.
    pub path: PathBuf,
    /// Uncompressed size (stat size; symlink target length for links).
    pub file_size: u64,
    /// Whether the source is a directory.
    pub is_dir: bool,
    /// Whether the source is a symlink.
    pub is_symlink: bool,
    /// Symlink target, when `is_symlink`.
    pub symlink_target: String,
    /// Source modification time.
    pub modified: Option<SystemTime>,
    /// The member header under construction.
    pub header: ZipFileHeader,
    /// Compressed output buffer.
    pub buffer: SpillBuffer,
}

impl FileTask {
    fn new() -> Self {
        Self {
            path: PathBuf::new(),
            file_size: 0,
            is_dir: false,
            is_symlink: false,
            symlink_target: String::new(),
            modified: None,
            header: ZipFileHeader::default(),
            buffer: SpillBuffer::new(),
        }
    }

    /// Point the task at a new source file. Stats the path (never following
    /// symlinks) and derives the member name, relative to `relative_to`
    /// when given, from path components alone.
    pub fn reset(&mut self, path: &Path, relative_to: Option<&Path>) -> Result<()> {
        self.buffer.reset();
        self.path = path.to_path_buf();
        self.is_symlink = false;
        self.symlink_target.clear();
        self.header = ZipFileHeader::default();

        let meta = fs::symlink_metadata(path).map_err(|_| PzipError::not_found(path))?;
        self.is_dir = meta.is_dir();
        self.is_symlink = meta.file_type().is_symlink();
        self.modified = meta.modified().ok();

        if self.is_symlink {
            let target = fs::read_link(path)
                .map_err(|e| PzipError::read(path, format!("cannot read symlink: {}", e)))?;
            self.symlink_target = target.to_string_lossy().into_owned();
            self.file_size = self.symlink_target.len() as u64;
        } else if meta.is_file() {
            self.file_size = meta.len();
        } else {
            self.file_size = 0;
        }

        self.header.name = match relative_to {
            Some(base) => relative_zip_name(path, base),
            None => file_name_zip_name(path),
        };
        if self.is_dir && !self.header.name.is_empty() && !self.header.name.ends_with('/') {
            self.header.name.push('/');
        }

        self.header.external_attrs = meta.mode() << 16;
        Ok(())
    }
}

/// ZIP-style name from the final path component.
fn file_name_zip_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// ZIP-style relative name computed by skipping the common component
/// prefix with `base`. Purely lexical: symlinks are never resolved.
fn relative_zip_name(path: &Path, base: &Path) -> String {
    let mut path_iter = path.components().peekable();
    let mut base_iter = base.components().peekable();

    while let (Some(p), Some(b)) = (path_iter.peek(), base_iter.peek()) {
        if p != b {
            break;
        }
        path_iter.next();
        base_iter.next();
    }

    let mut name = String::new();
    for component in path_iter {
        if let Component::Normal(part) = component {
            if !name.is_empty() {
                name.push('/');
            }
            name.push_str(&part.to_string_lossy());
        }
    }

    if name.is_empty() {
        file_name_zip_name(path)
    } else {
        name
    }
}

/// Bounded free list of reusable tasks.
pub struct TaskPool {
    free: Mutex<Vec<Box<FileTask>>>,
}

impl TaskPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take a task from the pool, or allocate a fresh one.
    pub fn acquire(&self) -> Box<FileTask> {
        self.free
            .lock()
            .pop()
            .unwrap_or_else(|| Box::new(FileTask::new()))
    }

    /// Return a task. Its buffer is reset (unlinking any spill file); the
    /// pool keeps at most a few dozen idle tasks.
    pub fn release(&self, mut task: Box<FileTask>) {
        task.buffer.reset();
        let mut free = self.free.lock();
        if free.len() < TASK_POOL_LIMIT {
            free.push(task);
        }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}
