//! CRC-32 (ISO 3309), as used by ZIP and GZIP.
//!
//! Uses the "slicing-by-8" technique for data of 16 bytes or more,
//! processing 8 bytes per step through 8 pre-computed lookup tables. Smaller
//! inputs go through a single-table loop to avoid the setup overhead.
//!
//! The x86_64 SSE4.2 `crc32` instruction uses the Castagnoli polynomial,
//! not the ISO 3309 polynomial (0xEDB88320) ZIP requires, so a software
//! implementation is used for compatibility.

/// CRC-32 slicing-by-8 lookup tables (polynomial 0xEDB88320, reflected).
/// The first table is the classic byte-at-a-time table.
const CRC32_TABLES: [[u32; 256]; 8] = {
    let mut tables = [[0u32; 256]; 8];

    let mut i = 0usize;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB88320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        tables[0][i] = crc;
        i += 1;
    }

    let mut t = 1;
    while t < 8 {
        let mut i = 0usize;
        while i < 256 {
            let prev = tables[t - 1][i];
            tables[t][i] = tables[0][(prev & 0xFF) as usize] ^ (prev >> 8);
            i += 1;
        }
        t += 1;
    }

    tables
};

/// Streaming CRC-32 calculator.
///
/// - Polynomial: 0x04C11DB7 (reflected: 0xEDB88320)
/// - Initial value: 0xFFFFFFFF
/// - Final XOR: 0xFFFFFFFF
///
/// # Example
///
/// ```
/// use pzip_core::crc::Crc32;
///
/// let mut crc = Crc32::new();
/// crc.update(b"Hello, World!");
/// assert_eq!(crc.finalize(), 0xEC4AC3D0);
/// ```
#[derive(Debug, Clone)]
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    /// Create a new CRC-32 calculator.
    pub fn new() -> Self {
        Self { crc: 0xFFFFFFFF }
    }

    /// Reset the CRC to its initial state.
    pub fn reset(&mut self) {
        self.crc = 0xFFFFFFFF;
    }

    /// Update the CRC with more data.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        if data.len() >= 16 {
            crc32_slice8(&mut self.crc, data);
        } else {
            crc32_sw(&mut self.crc, data);
        }
    }

    /// Get the current CRC value without finalizing.
    #[inline(always)]
    pub fn value(&self) -> u32 {
        self.crc ^ 0xFFFFFFFF
    }

    /// Finalize and return the CRC value.
    #[inline(always)]
    pub fn finalize(self) -> u32 {
        self.crc ^ 0xFFFFFFFF
    }

    /// Compute the CRC-32 of a buffer in one call.
    pub fn compute(data: &[u8]) -> u32 {
        let mut crc = Self::new();
        crc.update(data);
        crc.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-at-a-time CRC update.
fn crc32_sw(crc: &mut u32, data: &[u8]) {
    let mut c = *crc;
    for &byte in data {
        c = CRC32_TABLES[0][((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    *crc = c;
}

/// Slicing-by-8 CRC update.
fn crc32_slice8(crc: &mut u32, data: &[u8]) {
    let mut c = *crc;
    let mut chunks = data.chunks_exact(8);

    for chunk in &mut chunks {
        let lo = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ c;
        let hi = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);

        c = CRC32_TABLES[7][(lo & 0xFF) as usize]
            ^ CRC32_TABLES[6][((lo >> 8) & 0xFF) as usize]
            ^ CRC32_TABLES[5][((lo >> 16) & 0xFF) as usize]
            ^ CRC32_TABLES[4][((lo >> 24) & 0xFF) as usize]
            ^ CRC32_TABLES[3][(hi & 0xFF) as usize]
            ^ CRC32_TABLES[2][((hi >> 8) & 0xFF) as usize]
            ^ CRC32_TABLES[1][((hi >> 16) & 0xFF) as usize]
            ^ CRC32_TABLES[0][((hi >> 24) & 0xFF) as usize];
    }

    crc32_sw(&mut c, chunks.remainder());
    *crc = c;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_values() {
        // Standard check value for "123456789"
        assert_eq!(Crc32::compute(b"123456789"), 0xCBF43926);
        assert_eq!(Crc32::compute(b""), 0x00000000);
        assert_eq!(Crc32::compute(b"Hello, World!"), 0xEC4AC3D0);
    }

    #[test]
    fn test_crc32_streaming_matches_oneshot() {
        let data: Vec<u8> = (0..1024u32).map(|i| (i * 7 + 3) as u8).collect();

        let oneshot = Crc32::compute(&data);

        let mut streaming = Crc32::new();
        for chunk in data.chunks(13) {
            streaming.update(chunk);
        }
        assert_eq!(streaming.finalize(), oneshot);
    }

    #[test]
    fn test_crc32_slice8_agrees_with_sw() {
        // Cross-check the fast path against the byte loop on various sizes
        for len in [15usize, 16, 17, 63, 64, 255, 1000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();

            let mut a = 0xFFFFFFFFu32;
            crc32_sw(&mut a, &data);
            let mut b = 0xFFFFFFFFu32;
            crc32_slice8(&mut b, &data);
            assert_eq!(a, b, "mismatch at len {}", len);
        }
    }

    #[test]
    fn test_crc32_reset() {
        let mut crc = Crc32::new();
        crc.update(b"garbage");
        crc.reset();
        crc.update(b"123456789");
        assert_eq!(crc.value(), 0xCBF43926);
    }
}
