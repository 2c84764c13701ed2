//! DEFLATE decompression (RFC 1951).
//!
//! Whole-stream decode of all three block types: stored, fixed Huffman,
//! and dynamic Huffman. Members are decoded sequentially, so the decoder
//! works on a complete in-memory stream.

use std::sync::OnceLock;

use pzip_core::error::{PzipError, Result};

use crate::tables::CODEGEN_ORDER;

/// Length code base values for codes 257–285.
const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, //
    35, 43, 51, 59, 67, 83, 99, 115, 131, 163, 195, 227, 258,
];

/// Extra bits for length codes 257–285.
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, //
    3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

/// Distance code base values for codes 0–29.
const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, //
    257, 385, 513, 769, 1025, 1537, 2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];

/// Extra bits for distance codes 0–29.
const DISTANCE_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, //
    7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13,
];

/// LSB-first bit reader over a byte slice.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bitbuf: u64,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            bitbuf: 0,
            nbits: 0,
        }
    }

    #[inline]
    fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        while self.nbits < n {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or_else(|| PzipError::decompression("unexpected end of stream"))?;
            self.bitbuf |= (byte as u64) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
        let value = (self.bitbuf & ((1u64 << n) - 1)) as u32;
        self.bitbuf >>= n;
        self.nbits -= n;
        Ok(value)
    }

    #[inline]
    fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Drop partial bits so the next read is byte-aligned.
    fn align_to_byte(&mut self) {
        let drop = self.nbits % 8;
        self.bitbuf >>= drop;
        self.nbits -= drop;
    }

    /// Byte-aligned bulk copy.
    fn read_bytes(&mut self, out: &mut Vec<u8>, mut len: usize) -> Result<()> {
        debug_assert_eq!(self.nbits % 8, 0);
        while self.nbits >= 8 && len > 0 {
            out.push(self.bitbuf as u8);
            self.bitbuf >>= 8;
            self.nbits -= 8;
            len -= 1;
        }
        if len > 0 {
            let end = self.pos + len;
            if end > self.data.len() {
                return Err(PzipError::decompression("truncated stored block"));
            }
            out.extend_from_slice(&self.data[self.pos..end]);
            self.pos = end;
        }
        Ok(())
    }
}

/// Canonical Huffman decoder: code counts per length plus the symbols
/// ordered by (length, symbol).
struct HuffmanDecoder {
    counts: [u16; 16],
    symbols: Vec<u16>,
}

impl HuffmanDecoder {
    fn from_code_lengths(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; 16];
        for &len in lengths {
            if len > 15 {
                return Err(PzipError::decompression("code length exceeds 15"));
            }
            counts[len as usize] += 1;
        }
        if counts[0] as usize == lengths.len() {
            // No symbols; decode always fails.
            return Ok(Self {
                counts,
                symbols: Vec::new(),
            });
        }

        // Over-subscription check.
        let mut left = 1i32;
        for len in 1..16 {
            left <<= 1;
            left -= counts[len] as i32;
            if left < 0 {
                return Err(PzipError::decompression("over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; 16];
        for len in 1..15 {
            offsets[len + 1] = offsets[len] + counts[len];
        }
        let total: usize = counts[1..].iter().map(|&c| c as usize).sum();
        let mut symbols = vec![0u16; total];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                symbols[offsets[len as usize] as usize] = symbol as u16;
                offsets[len as usize] += 1;
            }
        }
        Ok(Self { counts, symbols })
    }

    /// Decode one symbol, walking the canonical code space bit by bit.
    fn decode(&self, reader: &mut BitReader<'_>) -> Result<u16> {
        let mut code = 0i32;
        let mut first = 0i32;
        let mut index = 0i32;
        for len in 1..16 {
            code |= reader.read_bit()? as i32;
            let count = self.counts[len] as i32;
            if code - count < first {
                return Ok(self.symbols[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(PzipError::decompression("invalid Huffman code"))
    }
}

fn fixed_litlen_decoder() -> &'static HuffmanDecoder {
    static DEC: OnceLock<HuffmanDecoder> = OnceLock::new();
    DEC.get_or_init(|| {
        let mut lengths = [0u8; 288];
        for (i, len) in lengths.iter_mut().enumerate() {
            *len = match i {
                0..=143 => 8,
                144..=255 => 9,
                256..=279 => 7,
                _ => 8,
            };
        }
        HuffmanDecoder::from_code_lengths(&lengths).expect("fixed litlen code is valid")
    })
}

fn fixed_distance_decoder() -> &'static HuffmanDecoder {
    static DEC: OnceLock<HuffmanDecoder> = OnceLock::new();
    DEC.get_or_init(|| {
        HuffmanDecoder::from_code_lengths(&[5u8; 30]).expect("fixed distance code is valid")
    })
}

/// Decompress a complete raw DEFLATE stream.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = BitReader::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);

    loop {
        let bfinal = reader.read_bit()?;
        let btype = reader.read_bits(2)?;
        match btype {
            0 => inflate_stored(&mut reader, &mut out)?,
            1 => inflate_codes(
                &mut reader,
                &mut out,
                fixed_litlen_decoder(),
                fixed_distance_decoder(),
            )?,
            2 => {
                let (litlen, dist) = read_dynamic_header(&mut reader)?;
                inflate_codes(&mut reader, &mut out, &litlen, &dist)?;
            }
            _ => return Err(PzipError::decompression("reserved block type 3")),
        }
        if bfinal != 0 {
            break;
        }
    }

    Ok(out)
}

fn inflate_stored(reader: &mut BitReader<'_>, out: &mut Vec<u8>) -> Result<()> {
    reader.align_to_byte();
    let len = reader.read_bits(16)?;
    let nlen = reader.read_bits(16)?;
    if len != !nlen & 0xFFFF {
        return Err(PzipError::decompression("stored block LEN/NLEN mismatch"));
    }
    reader.read_bytes(out, len as usize)
}

fn read_dynamic_header(
    reader: &mut BitReader<'_>,
) -> Result<(HuffmanDecoder, HuffmanDecoder)> {
    let hlit = reader.read_bits(5)? as usize + 257;
    let hdist = reader.read_bits(5)? as usize + 1;
    let hclen = reader.read_bits(4)? as usize + 4;

    let mut codegen_lengths = [0u8; 19];
    for i in 0..hclen {
        codegen_lengths[CODEGEN_ORDER[i]] = reader.read_bits(3)? as u8;
    }
    let codegen = HuffmanDecoder::from_code_lengths(&codegen_lengths)?;

    let mut lengths = vec![0u8; hlit + hdist];
    let mut i = 0;
    while i < lengths.len() {
        let symbol = codegen.decode(reader)?;
        match symbol {
            0..=15 => {
                lengths[i] = symbol as u8;
                i += 1;
            }
            16 => {
                if i == 0 {
                    return Err(PzipError::decompression("repeat code with no prior length"));
                }
                let prev = lengths[i - 1];
                let repeat = reader.read_bits(2)? as usize + 3;
                if i + repeat > lengths.len() {
                    return Err(PzipError::decompression("code length overflow"));
                }
                for _ in 0..repeat {
                    lengths[i] = prev;
                    i += 1;
                }
            }
            17 => {
                let repeat = reader.read_bits(3)? as usize + 3;
                if i + repeat > lengths.len() {
                    return Err(PzipError::decompression("code length overflow"));
                }
                i += repeat;
            }
            18 => {
                let repeat = reader.read_bits(7)? as usize + 11;
                if i + repeat > lengths.len() {
                    return Err(PzipError::decompression("code length overflow"));
                }
                i += repeat;
            }
            _ => return Err(PzipError::decompression("invalid code-length symbol")),
        }
    }

    let litlen = HuffmanDecoder::from_code_lengths(&lengths[..hlit])?;
    let dist = HuffmanDecoder::from_code_lengths(&lengths[hlit..])?;
    Ok((litlen, dist))
}

fn inflate_codes(
    reader: &mut BitReader<'_>,
    out: &mut Vec<u8>,
    litlen: &HuffmanDecoder,
    dist: &HuffmanDecoder,
) -> Result<()> {
    loop {
        let symbol = litlen.decode(reader)?;
        if symbol < 256 {
            out.push(symbol as u8);
        } else if symbol == 256 {
            return Ok(());
        } else if symbol <= 285 {
            let idx = (symbol - 257) as usize;
            let length =
                LENGTH_BASE[idx] as usize + reader.read_bits(LENGTH_EXTRA[idx] as u32)? as usize;

            let dist_symbol = dist.decode(reader)?;
            if dist_symbol >= 30 {
                return Err(PzipError::decompression("invalid distance code"));
            }
            let didx = dist_symbol as usize;
            let distance = DISTANCE_BASE[didx] as usize
                + reader.read_bits(DISTANCE_EXTRA[didx] as u32)? as usize;

            if distance > out.len() {
                return Err(PzipError::decompression("distance beyond output start"));
            }
            // Byte-wise copy: source and destination may overlap.
            let start = out.len() - distance;
            for k in 0..length {
                let b = out[start + k];
                out.push(b);
            }
        } else {
            return Err(PzipError::decompression("invalid literal/length code"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflate_stored() {
        let compressed = [
            0x01, // BFINAL=1, BTYPE=00
            0x05, 0x00, // LEN=5
            0xFA, 0xFF, // NLEN
            b'H', b'e', b'l', b'l', b'o',
        ];
        assert_eq!(inflate(&compressed).unwrap(), b"Hello");
    }

    #[test]
    fn test_inflate_empty_stored() {
        let compressed = [0x01, 0x00, 0x00, 0xFF, 0xFF];
        assert_eq!(inflate(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_inflate_rejects_bad_nlen() {
        let compressed = [0x01, 0x05, 0x00, 0x00, 0x00, b'H'];
        assert!(inflate(&compressed).is_err());
    }

    #[test]
    fn test_inflate_rejects_truncation() {
        let compressed = [0x01, 0x05, 0x00, 0xFA, 0xFF, b'H'];
        assert!(inflate(&compressed).is_err());
    }

    #[test]
    fn test_inflate_fixed_block_from_flate2() {
        // A fixed-Huffman stream produced by a reference encoder.
        use flate2::read::DeflateDecoder;
        use std::io::Read;

        // "abcabcabc" compressed by our own encoder must be readable by
        // flate2, and flate2's output by us. Use flate2 as the producer.
        let data = b"abcabcabcabcabcabc";
        let mut enc =
            flate2::read::DeflateEncoder::new(&data[..], flate2::Compression::default());
        let mut compressed = Vec::new();
        enc.read_to_end(&mut compressed).unwrap();

        assert_eq!(inflate(&compressed).unwrap(), data);

        // Sanity: flate2 agrees with itself.
        let mut dec = DeflateDecoder::new(&compressed[..]);
        let mut out = Vec::new();
        dec.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
