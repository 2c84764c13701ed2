//! ZIP writer: assembles a valid archive from `(header, compressed bytes)`
//! pairs presented in the desired member order.
//!
//! Members are written through `create_raw`, which emits the local header
//! with the header's declared sizes, copies the provider's bytes, appends a
//! data descriptor when flag bit 3 is set, and records the entry for the
//! central directory. `close` writes the central directory, the ZIP64
//! records when needed, and the end-of-central-directory record.
//!
//! `create_raw` is serialised by an internal lock; the writer is designed
//! to be fed by a single worker.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use pzip_core::error::{PzipError, Result};

use crate::header::{
    ZipFileHeader, CENTRAL_DIR_HEADER_SIG, DATA_DESCRIPTOR_SIG, END_OF_CENTRAL_DIR_SIG,
    EXTRA_ID_ZIP64, FLAG_DATA_DESCRIPTOR, LOCAL_FILE_HEADER_SIG, METHOD_STORE, ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG,
    ZIP64_END_OF_CENTRAL_DIR_SIG, ZIP_UINT16_MAX, ZIP_UINT32_MAX, ZIP_VERSION_45,
};

/// Destination buffer size; large enough to keep syscalls rare.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

struct CentralDirEntry {
    header: ZipFileHeader,
    local_header_offset: u64,
}

struct WriterState {
    file: BufWriter<File>,
    offset: u64,
    central_dir: Vec<CentralDirEntry>,
}

impl WriterState {
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file
            .write_all(buf)
            .map_err(|e| PzipError::write(e.to_string()))?;
        self.offset += buf.len() as u64;
        Ok(())
    }
}

/// ZIP archive writer.
pub struct ZipWriter {
    path: PathBuf,
    state: Mutex<Option<WriterState>>,
    comment: Mutex<String>,
}

impl ZipWriter {
    /// Create a writer for the given destination path. No file is touched
    /// until [`open`](Self::open).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
            comment: Mutex::new(String::new()),
        }
    }

    /// The destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create or truncate the destination file.
    pub fn open(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(PzipError::open(
                &self.path,
                io::Error::new(io::ErrorKind::AlreadyExists, "file already open"),
            ));
        }
        let file = File::create(&self.path).map_err(|e| PzipError::open(&self.path, e))?;
        *state = Some(WriterState {
            file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            offset: 0,
            central_dir: Vec::new(),
        });
        Ok(())
    }

    /// Whether the destination file is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Set the archive comment, stored verbatim in the EOCD.
    pub fn set_comment(&self, comment: impl Into<String>) -> Result<()> {
        let comment = comment.into();
        if comment.len() > ZIP_UINT16_MAX as usize {
            return Err(PzipError::TooLong {
                what: "archive comment",
                len: comment.len(),
            });
        }
        *self.comment.lock() = comment;
        Ok(())
    }

    /// Write one member: local header with the header's declared sizes and
    /// CRC, the provider's bytes verbatim, and a trailing data descriptor
    /// when flag bit 3 is set. Records the central-directory entry.
    pub fn create_raw<F>(&self, header: &ZipFileHeader, provider: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if header.name.len() > ZIP_UINT16_MAX as usize {
            return Err(PzipError::TooLong {
                what: "file name",
                len: header.name.len(),
            });
        }

        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or_else(|| {
            PzipError::open(
                &self.path,
                io::Error::new(io::ErrorKind::NotFound, "file not open"),
            )
        })?;

        let local_header_offset = state.offset;
        write_local_file_header(state, header)?;

        // Copy the compressed payload, tracking the byte count.
        let mut counted = CountingWriter {
            inner: &mut state.file,
            written: 0,
            error: None,
        };
        provider(&mut counted)?;
        if let Some(e) = counted.error {
            return Err(PzipError::write(e.to_string()));
        }
        state.offset += counted.written;

        if header.flags & FLAG_DATA_DESCRIPTOR != 0 {
            write_data_descriptor(state, header)?;
        }

        state.central_dir.push(CentralDirEntry {
            header: header.clone(),
            local_header_offset,
        });
        Ok(())
    }

    /// Write a directory member: name suffixed with `/`, method STORE, zero
    /// sizes and CRC, no data.
    pub fn create_directory(&self, header: &ZipFileHeader) -> Result<()> {
        let mut h = header.clone();
        if !h.name.is_empty() && !h.name.ends_with('/') {
            h.name.push('/');
        }
        h.method = METHOD_STORE;
        h.compressed_size = 0;
        h.uncompressed_size = 0;
        h.crc32 = 0;
        h.flags &= !FLAG_DATA_DESCRIPTOR;
        self.create_raw(&h, |_| Ok(()))
    }

    /// Write the central directory and end-of-central-directory records,
    /// then close the file.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let Some(mut state) = guard.take() else {
            return Ok(());
        };

        let central_dir_offset = state.offset;
        write_central_directory(&mut state)?;
        let central_dir_size = state.offset - central_dir_offset;

        let comment = self.comment.lock().clone();
        write_end_of_central_directory(&mut state, central_dir_offset, central_dir_size, &comment)?;

        state
            .file
            .flush()
            .map_err(|e| PzipError::write(e.to_string()))?;
        Ok(())
    }
}

/// `io::Write` adapter that counts bytes and stashes the first error so the
/// provider callback can stay infallible on the happy path.
struct CountingWriter<'a> {
    inner: &'a mut BufWriter<File>,
    written: u64,
    error: Option<io::Error>,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(io::Error::new(e.kind(), e.to_string()));
                }
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_local_file_header(state: &mut WriterState, header: &ZipFileHeader) -> Result<()> {
    let mut buf = Vec::with_capacity(30 + header.name.len() + header.extra.len());

    put_u32(&mut buf, LOCAL_FILE_HEADER_SIG);
    put_u16(
        &mut buf,
        if header.is_zip64() {
            ZIP_VERSION_45
        } else {
            header.version_needed
        },
    );
    put_u16(&mut buf, header.flags);
    put_u16(&mut buf, header.method);
    put_u16(&mut buf, header.mod_time);
    put_u16(&mut buf, header.mod_date);

    let streamed = header.flags & FLAG_DATA_DESCRIPTOR != 0;

    // CRC and sizes: zero when they follow in a data descriptor, the
    // ZIP64 sentinel when promoted, otherwise the real values.
    put_u32(&mut buf, if streamed { 0 } else { header.crc32 });
    if streamed {
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
    } else if header.is_zip64() {
        put_u32(&mut buf, ZIP_UINT32_MAX);
        put_u32(&mut buf, ZIP_UINT32_MAX);
    } else {
        put_u32(&mut buf, header.compressed_size as u32);
        put_u32(&mut buf, header.uncompressed_size as u32);
    }

    put_u16(&mut buf, header.name.len() as u16);
    put_u16(&mut buf, header.extra.len() as u16);
    buf.extend_from_slice(header.name.as_bytes());
    buf.extend_from_slice(&header.extra);

    state.write_all(&buf)
}

fn write_data_descriptor(state: &mut WriterState, header: &ZipFileHeader) -> Result<()> {
    let mut buf = Vec::with_capacity(24);
    put_u32(&mut buf, DATA_DESCRIPTOR_SIG);
    put_u32(&mut buf, header.crc32);
    if header.is_zip64() {
        put_u64(&mut buf, header.compressed_size);
        put_u64(&mut buf, header.uncompressed_size);
    } else {
        put_u32(&mut buf, header.compressed_size as u32);
        put_u32(&mut buf, header.uncompressed_size as u32);
    }
    state.write_all(&buf)
}

fn write_central_directory(state: &mut WriterState) -> Result<()> {
    let entries = std::mem::take(&mut state.central_dir);
    let mut buf = Vec::with_capacity(128);

    for entry in &entries {
        let h = &entry.header;
        buf.clear();

        let need_zip64 = h.is_zip64() || entry.local_header_offset >= ZIP_UINT32_MAX as u64;

        put_u32(&mut buf, CENTRAL_DIR_HEADER_SIG);
        put_u16(&mut buf, h.version_made_by);
        put_u16(
            &mut buf,
            if need_zip64 {
                ZIP_VERSION_45
            } else {
                h.version_needed
            },
        );
        put_u16(&mut buf, h.flags);
        put_u16(&mut buf, h.method);
        put_u16(&mut buf, h.mod_time);
        put_u16(&mut buf, h.mod_date);
        put_u32(&mut buf, h.crc32);

        if need_zip64 {
            // Sentinel sizes; the real values follow in the ZIP64 extra.
            put_u32(&mut buf, ZIP_UINT32_MAX);
            put_u32(&mut buf, ZIP_UINT32_MAX);
        } else {
            put_u32(&mut buf, h.compressed_size as u32);
            put_u32(&mut buf, h.uncompressed_size as u32);
        }

        put_u16(&mut buf, h.name.len() as u16);

        let mut zip64_extra = Vec::new();
        if need_zip64 {
            put_u16(&mut zip64_extra, EXTRA_ID_ZIP64);
            put_u16(&mut zip64_extra, 24);
            put_u64(&mut zip64_extra, h.uncompressed_size);
            put_u64(&mut zip64_extra, h.compressed_size);
            put_u64(&mut zip64_extra, entry.local_header_offset);
        }

        put_u16(&mut buf, (h.extra.len() + zip64_extra.len()) as u16);
        put_u16(&mut buf, 0); // comment length
        put_u16(&mut buf, 0); // disk number start
        put_u16(&mut buf, 0); // internal attributes
        put_u32(&mut buf, h.external_attrs);

        if entry.local_header_offset >= ZIP_UINT32_MAX as u64 {
            put_u32(&mut buf, ZIP_UINT32_MAX);
        } else {
            put_u32(&mut buf, entry.local_header_offset as u32);
        }

        buf.extend_from_slice(h.name.as_bytes());
        buf.extend_from_slice(&h.extra);
        buf.extend_from_slice(&zip64_extra);

        state.write_all(&buf)?;
    }

    state.central_dir = entries;
    Ok(())
}

fn write_end_of_central_directory(
    state: &mut WriterState,
    central_dir_offset: u64,
    central_dir_size: u64,
    comment: &str,
) -> Result<()> {
    let mut records = state.central_dir.len() as u64;
    let mut size = central_dir_size;
    let mut offset = central_dir_offset;

    let need_zip64 = records >= ZIP_UINT16_MAX as u64
        || size >= ZIP_UINT32_MAX as u64
        || offset >= ZIP_UINT32_MAX as u64;

    let mut buf = Vec::with_capacity(56 + 20 + 22 + comment.len());

    if need_zip64 {
        let zip64_eocd_offset = state.offset;

        // ZIP64 end of central directory record (56 bytes).
        put_u32(&mut buf, ZIP64_END_OF_CENTRAL_DIR_SIG);
        put_u64(&mut buf, 44); // record size minus signature and this field
        put_u16(&mut buf, ZIP_VERSION_45);
        put_u16(&mut buf, ZIP_VERSION_45);
        put_u32(&mut buf, 0); // this disk
        put_u32(&mut buf, 0); // disk with central directory
        put_u64(&mut buf, records);
        put_u64(&mut buf, records);
        put_u64(&mut buf, size);
        put_u64(&mut buf, offset);

        // ZIP64 end of central directory locator (20 bytes).
        put_u32(&mut buf, ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG);
        put_u32(&mut buf, 0);
        put_u64(&mut buf, zip64_eocd_offset);
        put_u32(&mut buf, 1);

        state.write_all(&buf)?;
        buf.clear();

        records = ZIP_UINT16_MAX as u64;
        size = ZIP_UINT32_MAX as u64;
        offset = ZIP_UINT32_MAX as u64;
    }

    // Classic end of central directory record (22 bytes) plus comment.
    put_u32(&mut buf, END_OF_CENTRAL_DIR_SIG);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, 0);
    put_u16(&mut buf, records as u16);
    put_u16(&mut buf, records as u16);
    put_u32(&mut buf, size as u32);
    put_u32(&mut buf, offset as u32);
    put_u16(&mut buf, comment.len() as u16);
    buf.extend_from_slice(comment.as_bytes());

    state.write_all(&buf)
}
