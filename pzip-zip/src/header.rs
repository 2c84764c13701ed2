//! ZIP header model: signatures, flags, the in-memory member header,
//! extra fields, and time conversions.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};

/// ZIP local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;

/// Data descriptor signature (de-facto standard, required by some readers).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// Central directory header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;

/// End of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;

/// ZIP64 end of central directory signature.
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;

/// ZIP64 end of central directory locator signature.
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;

/// ZIP64 extended information extra field id.
pub const EXTRA_ID_ZIP64: u16 = 0x0001;

/// Extended Timestamp extra field id.
pub const EXTRA_ID_EXTENDED_TIMESTAMP: u16 = 0x5455;

/// Compression method: stored.
pub const METHOD_STORE: u16 = 0;

/// Compression method: DEFLATE.
pub const METHOD_DEFLATE: u16 = 8;

/// General-purpose flag bit 3: sizes and CRC follow in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// General-purpose flag bit 11: the name is UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Version 2.0: deflate support.
pub const ZIP_VERSION_20: u16 = 20;

/// Version 4.5: ZIP64 support.
pub const ZIP_VERSION_45: u16 = 45;

/// Sentinel for 32-bit fields promoted to the ZIP64 extra.
pub const ZIP_UINT32_MAX: u32 = 0xFFFF_FFFF;

/// Sentinel for 16-bit record counts promoted to the ZIP64 EOCD.
pub const ZIP_UINT16_MAX: u16 = 0xFFFF;

/// Unix file-type mask in the external-attribute high bits.
pub const UNIX_IFMT: u32 = 0o170000;

/// Unix symlink file type.
pub const UNIX_IFLNK: u32 = 0o120000;

/// The in-memory rendition of a ZIP member's directory entry.
#[derive(Debug, Clone, Default)]
pub struct ZipFileHeader {
    /// Member name: `/`-separated, no leading `/`; a trailing `/` marks a
    /// directory entry.
    pub name: String,
    /// Version made by (host OS in the high byte).
    pub version_made_by: u16,
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General-purpose bit flags.
    pub flags: u16,
    /// Compression method.
    pub method: u16,
    /// DOS modification time.
    pub mod_time: u16,
    /// DOS modification date.
    pub mod_date: u16,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
    /// External attributes; the high 16 bits carry the POSIX mode.
    pub external_attrs: u32,
    /// Raw extra-field bytes.
    pub extra: Vec<u8>,
}

impl ZipFileHeader {
    /// Whether this entry names a directory.
    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Whether this entry's external attributes mark a symlink.
    pub fn is_symlink(&self) -> bool {
        (self.external_attrs >> 16) & UNIX_IFMT == UNIX_IFLNK
    }

    /// POSIX mode bits from the external attributes (0 when absent).
    pub fn unix_mode(&self) -> u32 {
        self.external_attrs >> 16
    }

    /// Whether either size requires ZIP64 encoding.
    pub fn is_zip64(&self) -> bool {
        self.compressed_size >= ZIP_UINT32_MAX as u64
            || self.uncompressed_size >= ZIP_UINT32_MAX as u64
    }

    /// Modification time decoded from the DOS fields, in local time.
    pub fn modified(&self) -> SystemTime {
        dos_to_system_time(self.mod_date, self.mod_time)
    }
}

/// Extended Timestamp extra field (0x5455): flags byte plus a 32-bit Unix
/// mtime. Only the mtime bit is used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    /// Unix modification time in seconds.
    pub mod_time: i64,
}

impl ExtendedTimestamp {
    /// Encode as the 9-byte TLV appended to a header's extra field.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(9);
        data.extend_from_slice(&EXTRA_ID_EXTENDED_TIMESTAMP.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.push(0x01); // mtime present
        data.extend_from_slice(&(self.mod_time as u32).to_le_bytes());
        data
    }

    /// Decode from the payload of a 0x5455 TLV.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() >= 5 && data[0] & 0x01 != 0 {
            let t = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
            Some(Self {
                mod_time: t as i64,
            })
        } else {
            None
        }
    }

    /// Find and decode the first 0x5455 field in a raw extra-field blob.
    pub fn find_in_extra(extra: &[u8]) -> Option<Self> {
        let mut offset = 0usize;
        while offset + 4 <= extra.len() {
            let id = u16::from_le_bytes([extra[offset], extra[offset + 1]]);
            let size = u16::from_le_bytes([extra[offset + 2], extra[offset + 3]]) as usize;
            offset += 4;
            if offset + size > extra.len() {
                return None;
            }
            if id == EXTRA_ID_EXTENDED_TIMESTAMP {
                return Self::decode(&extra[offset..offset + size]);
            }
            offset += size;
        }
        None
    }
}

/// Convert a modification time to DOS (date, time) fields via local time.
/// Times before 1980 clamp to the DOS epoch.
pub fn system_time_to_dos(t: SystemTime) -> (u16, u16) {
    let dt: DateTime<Local> = DateTime::from(t);
    let year = dt.year();
    if year < 1980 {
        return (0x21, 0); // 1980-01-01 00:00:00
    }
    let date = ((((year - 1980) as u16) & 0x7F) << 9)
        | (((dt.month() as u16) & 0x0F) << 5)
        | ((dt.day() as u16) & 0x1F);
    let time = (((dt.hour() as u16) & 0x1F) << 11)
        | (((dt.minute() as u16) & 0x3F) << 5)
        | (((dt.second() as u16) / 2) & 0x1F);
    (date, time)
}

/// Convert DOS (date, time) fields back to a `SystemTime` via local time.
pub fn dos_to_system_time(date: u16, time: u16) -> SystemTime {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    let naive = NaiveDate::from_ymd_opt(year, month.max(1), day.max(1))
        .and_then(|d| d.and_hms_opt(hour, minute.min(59), second.min(59)));
    let Some(naive) = naive else {
        return UNIX_EPOCH;
    };
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => {
            let secs = dt.timestamp();
            if secs >= 0 {
                UNIX_EPOCH + Duration::from_secs(secs as u64)
            } else {
                UNIX_EPOCH
            }
        }
        None => UNIX_EPOCH,
    }
}

/// Whether a (valid UTF-8) member name needs the UTF-8 flag: it contains
/// bytes outside `0x20..=0x7D` or a backslash.
pub fn needs_utf8_flag(name: &str) -> bool {
    name.bytes().any(|b| !(0x20..=0x7D).contains(&b) || b == 0x5C)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_and_zip64_predicates() {
        let mut h = ZipFileHeader {
            name: "dir/".to_string(),
            ..Default::default()
        };
        assert!(h.is_directory());
        assert!(!h.is_zip64());

        h.uncompressed_size = ZIP_UINT32_MAX as u64;
        assert!(h.is_zip64());

        h.uncompressed_size = ZIP_UINT32_MAX as u64 - 1;
        h.compressed_size = 0;
        assert!(!h.is_zip64());
    }

    #[test]
    fn test_symlink_attrs() {
        let h = ZipFileHeader {
            external_attrs: (UNIX_IFLNK | 0o777) << 16,
            ..Default::default()
        };
        assert!(h.is_symlink());
        assert_eq!(h.unix_mode() & 0o777, 0o777);
    }

    #[test]
    fn test_extended_timestamp_roundtrip() {
        let ts = ExtendedTimestamp {
            mod_time: 1_700_000_000,
        };
        let encoded = ts.encode();
        assert_eq!(encoded.len(), 9);
        assert_eq!(&encoded[..2], &EXTRA_ID_EXTENDED_TIMESTAMP.to_le_bytes());
        assert_eq!(ExtendedTimestamp::find_in_extra(&encoded), Some(ts));
    }

    #[test]
    fn test_extended_timestamp_skips_other_fields() {
        let mut extra = Vec::new();
        // Unknown field first
        extra.extend_from_slice(&0x1234u16.to_le_bytes());
        extra.extend_from_slice(&3u16.to_le_bytes());
        extra.extend_from_slice(&[1, 2, 3]);
        let ts = ExtendedTimestamp { mod_time: 1234567 };
        extra.extend_from_slice(&ts.encode());
        assert_eq!(ExtendedTimestamp::find_in_extra(&extra), Some(ts));
    }

    #[test]
    fn test_dos_time_roundtrip_resolution() {
        // DOS time has 2-second resolution; roundtrip within that.
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let (date, time) = system_time_to_dos(now);
        let back = dos_to_system_time(date, time);
        let diff = now
            .duration_since(back)
            .unwrap_or_else(|e| e.duration());
        assert!(diff <= Duration::from_secs(2), "diff {:?}", diff);
    }

    #[test]
    fn test_dos_time_pre_epoch_clamps() {
        let old = UNIX_EPOCH; // 1970 < 1980
        let (date, time) = system_time_to_dos(old);
        assert_eq!((date, time), (0x21, 0));
    }

    #[test]
    fn test_needs_utf8_flag() {
        assert!(!needs_utf8_flag("plain-name.txt"));
        assert!(needs_utf8_flag("caf\u{e9}.txt"));
        assert!(needs_utf8_flag("back\\slash"));
        assert!(needs_utf8_flag("del\u{7f}ete"));
        assert!(!needs_utf8_flag("space ok.txt"));
    }
}
