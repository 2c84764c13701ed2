//! ZIP reader: parses an archive and exposes random-access member reads.
//!
//! Opening scans the last min(file size, 65 557) bytes backward for the
//! classic end-of-central-directory record, parses the central directory
//! (honouring ZIP64 extra fields for sizes and offsets), then verifies
//! each member's local header to resolve its data offset.
//!
//! Member reads use positioned I/O, so a shared reader serves concurrent
//! extraction workers without seek races.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use pzip_core::error::{PzipError, Result};
use pzip_core::Crc32;
use pzip_deflate::inflate;

use crate::header::{
    ExtendedTimestamp, ZipFileHeader, CENTRAL_DIR_HEADER_SIG, END_OF_CENTRAL_DIR_SIG,
    EXTRA_ID_ZIP64, LOCAL_FILE_HEADER_SIG, METHOD_DEFLATE, METHOD_STORE, ZIP_UINT32_MAX,
};

/// EOCD scan window: a maximal comment plus the 22-byte record.
const EOCD_SEARCH_LIMIT: u64 = 65535 + 22;

fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

/// A member of an open archive: its header plus resolved offsets.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    /// The central-directory header.
    pub header: ZipFileHeader,
    /// Absolute offset of the member's local header.
    pub local_header_offset: u64,
    /// Absolute offset of the member's file data.
    pub data_offset: u64,
}

impl ZipEntry {
    /// Whether this entry names a directory.
    pub fn is_directory(&self) -> bool {
        self.header.is_directory()
    }

    /// Modification time: the Extended-Timestamp extra when present,
    /// otherwise the DOS fields.
    pub fn modified(&self) -> SystemTime {
        if let Some(ts) = ExtendedTimestamp::find_in_extra(&self.header.extra) {
            if ts.mod_time >= 0 {
                return SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(ts.mod_time as u64);
            }
        }
        self.header.modified()
    }
}

/// ZIP archive reader.
#[derive(Debug)]
pub struct ZipReader {
    path: PathBuf,
    file: File,
    entries: Vec<ZipEntry>,
    comment: Vec<u8>,
}

impl ZipReader {
    /// Open an archive and parse its directory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| PzipError::open(&path, e))?;
        let file_size = file
            .metadata()
            .map_err(|e| PzipError::open(&path, e))?
            .len();

        let mut reader = Self {
            path,
            file,
            entries: Vec::new(),
            comment: Vec::new(),
        };

        let (total_entries, cd_offset, cd_size) = reader.read_end_of_central_directory(file_size)?;
        reader.read_central_directory(total_entries, cd_offset, cd_size)?;
        reader.resolve_data_offsets()?;
        Ok(reader)
    }

    /// The archive path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed central-directory entries, in archive order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// The archive comment bytes.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|e| PzipError::read(&self.path, e.to_string()))
    }

    /// Scan backward for the classic EOCD record.
    fn read_end_of_central_directory(&mut self, file_size: u64) -> Result<(u64, u64, u64)> {
        if file_size < 22 {
            return Err(PzipError::invalid_archive(
                "file too small for an end-of-central-directory record",
            ));
        }
        let search = file_size.min(EOCD_SEARCH_LIMIT);
        let mut buf = vec![0u8; search as usize];
        self.read_exact_at(&mut buf, file_size - search)?;

        let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
        let mut eocd_at = None;
        for i in (0..=buf.len() - 22).rev() {
            if buf[i..i + 4] == sig {
                eocd_at = Some(i);
                break;
            }
        }
        let Some(at) = eocd_at else {
            return Err(PzipError::invalid_archive(
                "cannot find end of central directory",
            ));
        };

        let total_entries = get_u16(&buf, at + 10) as u64;
        let cd_size = get_u32(&buf, at + 12) as u64;
        let cd_offset = get_u32(&buf, at + 16) as u64;
        let comment_len = get_u16(&buf, at + 20) as usize;
        if comment_len > 0 && at + 22 + comment_len <= buf.len() {
            self.comment = buf[at + 22..at + 22 + comment_len].to_vec();
        }

        Ok((total_entries, cd_offset, cd_size))
    }

    /// Parse `total_entries` central-directory records.
    fn read_central_directory(
        &mut self,
        total_entries: u64,
        cd_offset: u64,
        cd_size: u64,
    ) -> Result<()> {
        let mut cd = vec![0u8; cd_size as usize];
        self.read_exact_at(&mut cd, cd_offset)?;

        self.entries = Vec::with_capacity(total_entries as usize);
        let mut at = 0usize;
        for _ in 0..total_entries {
            if at + 46 > cd.len() {
                return Err(PzipError::invalid_archive("truncated central directory"));
            }
            if get_u32(&cd, at) != CENTRAL_DIR_HEADER_SIG {
                return Err(PzipError::invalid_archive(
                    "invalid central directory signature",
                ));
            }

            let mut header = ZipFileHeader {
                version_made_by: get_u16(&cd, at + 4),
                version_needed: get_u16(&cd, at + 6),
                flags: get_u16(&cd, at + 8),
                method: get_u16(&cd, at + 10),
                mod_time: get_u16(&cd, at + 12),
                mod_date: get_u16(&cd, at + 14),
                crc32: get_u32(&cd, at + 16),
                compressed_size: get_u32(&cd, at + 20) as u64,
                uncompressed_size: get_u32(&cd, at + 24) as u64,
                ..Default::default()
            };
            let name_len = get_u16(&cd, at + 28) as usize;
            let extra_len = get_u16(&cd, at + 30) as usize;
            let comment_len = get_u16(&cd, at + 32) as usize;
            header.external_attrs = get_u32(&cd, at + 38);
            let mut local_header_offset = get_u32(&cd, at + 42) as u64;

            let rec_end = at + 46 + name_len + extra_len + comment_len;
            if rec_end > cd.len() {
                return Err(PzipError::invalid_archive(
                    "central directory record overruns directory",
                ));
            }

            header.name = String::from_utf8_lossy(&cd[at + 46..at + 46 + name_len]).into_owned();
            header.extra = cd[at + 46 + name_len..at + 46 + name_len + extra_len].to_vec();

            parse_zip64_extra(&mut header, &mut local_header_offset);

            self.entries.push(ZipEntry {
                header,
                local_header_offset,
                data_offset: 0,
            });
            at = rec_end;
        }
        Ok(())
    }

    /// Verify each local header and compute the member data offsets.
    fn resolve_data_offsets(&mut self) -> Result<()> {
        let mut local = [0u8; 30];
        for i in 0..self.entries.len() {
            let offset = self.entries[i].local_header_offset;
            self.file
                .read_exact_at(&mut local, offset)
                .map_err(|e| PzipError::read(&self.path, e.to_string()))?;
            if get_u32(&local, 0) != LOCAL_FILE_HEADER_SIG {
                return Err(PzipError::invalid_archive(
                    "invalid local file header signature",
                ));
            }
            let name_len = get_u16(&local, 26) as u64;
            let extra_len = get_u16(&local, 28) as u64;
            self.entries[i].data_offset = offset + 30 + name_len + extra_len;
        }
        Ok(())
    }

    /// Read a member's raw (possibly compressed) bytes.
    pub fn read_compressed(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; entry.header.compressed_size as usize];
        self.read_exact_at(&mut buf, entry.data_offset)?;
        Ok(buf)
    }

    /// Read and decompress a member, verifying its CRC-32.
    pub fn read_decompressed(&self, entry: &ZipEntry) -> Result<Vec<u8>> {
        let compressed = self.read_compressed(entry)?;

        let data = match entry.header.method {
            METHOD_STORE => compressed,
            METHOD_DEFLATE => inflate(&compressed)?,
            other => return Err(PzipError::unsupported_method(other)),
        };

        if data.len() as u64 != entry.header.uncompressed_size {
            return Err(PzipError::decompression(format!(
                "size mismatch: expected {} bytes, got {}",
                entry.header.uncompressed_size,
                data.len()
            )));
        }
        let crc = Crc32::compute(&data);
        if crc != entry.header.crc32 {
            return Err(PzipError::crc_mismatch(entry.header.crc32, crc));
        }
        Ok(data)
    }
}

/// Pull 64-bit sizes and the local-header offset out of a ZIP64 extra
/// field, for fields carrying the 32-bit sentinel.
fn parse_zip64_extra(header: &mut ZipFileHeader, local_header_offset: &mut u64) {
    let need_uncompressed = header.uncompressed_size == ZIP_UINT32_MAX as u64;
    let need_compressed = header.compressed_size == ZIP_UINT32_MAX as u64;
    let need_offset = *local_header_offset == ZIP_UINT32_MAX as u64;
    if !(need_uncompressed || need_compressed || need_offset) {
        return;
    }

    let extra = &header.extra;
    let mut at = 0usize;
    while at + 4 <= extra.len() {
        let id = get_u16(extra, at);
        let size = get_u16(extra, at + 2) as usize;
        at += 4;
        if at + size > extra.len() {
            return;
        }
        if id == EXTRA_ID_ZIP64 {
            // Fields appear in order, only for sentinel-valued headers.
            let mut field = at;
            let mut take = |needed: bool| -> Option<u64> {
                if needed && field + 8 <= at + size {
                    let v = get_u64(extra, field);
                    field += 8;
                    Some(v)
                } else {
                    None
                }
            };
            if let Some(v) = take(need_uncompressed) {
                header.uncompressed_size = v;
            }
            if let Some(v) = take(need_compressed) {
                header.compressed_size = v;
            }
            if let Some(v) = take(need_offset) {
                *local_header_offset = v;
            }
            return;
        }
        at += size;
    }
}
