//! Huffman bit writer: packs tokens into DEFLATE blocks.
//!
//! Bits accumulate in a 64-bit register; whenever 48 or more are pending,
//! six bytes are stored little-endian into a small staging buffer, which is
//! appended to the output buffer once it exceeds 246 bytes. The caller
//! drains the output buffer to its sink.
//!
//! Per block the writer picks the cheapest of four encodings: stored, fixed
//! Huffman, dynamic Huffman, or Huffman-only (no match alphabet at all).
//! Consecutive Huffman-only blocks may share one literal table; switching
//! to a fresh table pays a level-dependent penalty in the size estimate.

use crate::huffman::{fixed_literal_encoding, fixed_offset_encoding, HCode, HuffmanEncoder};
use crate::tables::{
    CODEGEN_ORDER, LENGTH_BASE, LENGTH_CODES, LENGTH_EXTRA_BITS, OFFSET_COMBINED,
    OFFSET_EXTRA_BITS,
};
use crate::token::{
    Token, Tokens, END_BLOCK_MARKER, LENGTH_CODES_START, LITERAL_COUNT, MAX_STORE_BLOCK_SIZE,
    OFFSET_CODE_COUNT, OFFSET_MASK,
};

/// Staging buffer flush threshold in bytes.
const BUFFER_FLUSH_SIZE: usize = 246;

/// Sentinel terminating the RLE-compressed codegen sequence.
const BAD_CODE: u8 = 255;

/// Estimated dynamic header cost in bits when no table is live.
const GUESS_HEADER_SIZE_BITS: i32 = 70 * 8;

/// Bit accumulator and output buffer. Separate from the encoding state so
/// the token loop can borrow the code tables alongside it.
struct BitOutput {
    output: Vec<u8>,
    bits: u64,
    nbits: u32,
    bytes: [u8; BUFFER_FLUSH_SIZE + 18],
    nbytes: usize,
}

impl BitOutput {
    fn new() -> Self {
        Self {
            output: Vec::with_capacity(256 * 1024),
            bits: 0,
            nbits: 0,
            bytes: [0; BUFFER_FLUSH_SIZE + 18],
            nbytes: 0,
        }
    }

    fn reset(&mut self) {
        self.output.clear();
        self.bits = 0;
        self.nbits = 0;
        self.nbytes = 0;
    }

    #[inline(always)]
    fn write_bits(&mut self, b: u32, nb: u32) {
        self.bits |= (b as u64) << (self.nbits & 63);
        self.nbits += nb;
        if self.nbits >= 48 {
            self.write_out_bits();
        }
    }

    #[inline(always)]
    fn write_code(&mut self, c: HCode) {
        self.bits |= c.code64() << (self.nbits & 63);
        self.nbits += c.len();
        if self.nbits >= 48 {
            self.write_out_bits();
        }
    }

    /// Store six full bytes from the accumulator into the staging buffer.
    fn write_out_bits(&mut self) {
        self.bytes[self.nbytes..self.nbytes + 8].copy_from_slice(&self.bits.to_le_bytes());
        self.bits >>= 48;
        self.nbits -= 48;
        self.nbytes += 6;
        if self.nbytes >= BUFFER_FLUSH_SIZE {
            self.output.extend_from_slice(&self.bytes[..self.nbytes]);
            self.nbytes = 0;
        }
    }

    /// Spill any partial bits and staging bytes to the output buffer.
    fn flush(&mut self) {
        let mut n = self.nbytes;
        while self.nbits != 0 {
            self.bytes[n] = self.bits as u8;
            n += 1;
            self.bits >>= 8;
            self.nbits = self.nbits.saturating_sub(8);
        }
        self.bits = 0;
        if n > 0 {
            self.output.extend_from_slice(&self.bytes[..n]);
        }
        self.nbytes = 0;
    }

    /// Byte-aligned raw copy; the accumulator must hold whole bytes.
    fn write_bytes(&mut self, data: &[u8]) {
        debug_assert_eq!(self.nbits % 8, 0);
        let mut n = self.nbytes;
        while self.nbits != 0 {
            self.bytes[n] = self.bits as u8;
            n += 1;
            self.bits >>= 8;
            self.nbits -= 8;
        }
        if n != 0 {
            self.output.extend_from_slice(&self.bytes[..n]);
        }
        self.nbytes = 0;
        self.output.extend_from_slice(data);
    }

    /// Emit the token stream with the given literal/length and offset codes.
    fn write_tokens(&mut self, tokens: &[Token], le_codes: &[HCode], oe_codes: &[HCode]) {
        if tokens.is_empty() {
            return;
        }
        let lengths = &le_codes[LENGTH_CODES_START..];

        let mut n = tokens.len();
        let defer_eob = tokens[n - 1] == END_BLOCK_MARKER as Token;
        if defer_eob {
            n -= 1;
        }

        for &t in &tokens[..n] {
            if t < 256 {
                self.write_code(le_codes[t as usize]);
                continue;
            }

            let length = crate::token::token_length(t);
            let length_code = (LENGTH_CODES[length as usize] - 1) as usize;
            self.write_code(lengths[length_code]);
            if length_code >= 8 {
                let extra_bits = LENGTH_EXTRA_BITS[length_code] as u32;
                let extra = length - LENGTH_BASE[length_code] as u32;
                self.write_bits(extra, extra_bits);
            }

            let offset = t & OFFSET_MASK;
            let off_code = ((offset >> 16) & 31) as usize;
            let offset = offset & 0xFFFF;
            self.write_code(oe_codes[off_code]);
            if off_code >= 4 {
                let comb = OFFSET_COMBINED[off_code];
                self.write_bits((offset - (comb >> 8)) & 0xFFFF, comb & 0xFF);
            }
        }

        if defer_eob {
            self.write_code(le_codes[END_BLOCK_MARKER]);
        }
    }
}

/// DEFLATE block writer with four block encodings and table-reuse state.
pub struct HuffmanBitWriter {
    out: BitOutput,
    /// Bit size of the live Huffman-only header, or 0 when none is open.
    last_header: i32,
    last_huffman: bool,
    log_new_table_penalty: u32,

    literal_freq: [u16; LENGTH_CODES_START + 32],
    offset_freq: [u16; 32],
    codegen_freq: [u16; 19],
    codegen: [u8; LITERAL_COUNT + OFFSET_CODE_COUNT + 2],

    literal_encoding: HuffmanEncoder,
    offset_encoding: HuffmanEncoder,
    tmp_lit_encoding: HuffmanEncoder,
    codegen_encoding: HuffmanEncoder,
}

impl HuffmanBitWriter {
    /// Create a writer; `log_new_table_penalty` tunes how reluctant
    /// Huffman-only blocks are to switch literal tables.
    pub fn new(log_new_table_penalty: u32) -> Self {
        Self {
            out: BitOutput::new(),
            last_header: 0,
            last_huffman: false,
            log_new_table_penalty,
            literal_freq: [0; LENGTH_CODES_START + 32],
            offset_freq: [0; 32],
            codegen_freq: [0; 19],
            codegen: [0; LITERAL_COUNT + OFFSET_CODE_COUNT + 2],
            literal_encoding: HuffmanEncoder::new(LITERAL_COUNT),
            offset_encoding: HuffmanEncoder::new(OFFSET_CODE_COUNT),
            tmp_lit_encoding: HuffmanEncoder::new(LITERAL_COUNT),
            codegen_encoding: HuffmanEncoder::new(19),
        }
    }

    /// Discard all state, retaining allocations.
    pub fn reset(&mut self) {
        self.out.reset();
        self.last_header = 0;
        self.last_huffman = false;
    }

    /// Buffered output bytes not yet drained by the caller.
    pub fn data(&self) -> &[u8] {
        &self.out.output
    }

    /// Mutable access to the buffered output, for draining to a sink.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.out.output
    }

    /// Close any open Huffman-only block and spill all pending bits.
    pub fn flush(&mut self) {
        if self.last_header > 0 {
            self.out
                .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
            self.last_header = 0;
        }
        self.out.flush();
    }

    /// Byte-aligned raw bytes (the payload of a stored block).
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.out.write_bytes(data);
    }

    /// Write a stored-block header. A zero-length final block is emitted as
    /// an empty fixed block instead, which is smaller.
    pub fn write_stored_header(&mut self, length: usize, is_eof: bool) {
        if self.last_header > 0 {
            self.out
                .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
            self.last_header = 0;
            self.last_huffman = false;
        }

        if length == 0 && is_eof {
            self.write_fixed_header(true);
            // The fixed EOB code is seven zero bits.
            self.out.write_bits(0, 7);
            self.out.flush();
            return;
        }

        self.out.write_bits(if is_eof { 1 } else { 0 }, 3);
        self.out.flush();
        self.out.write_bits(length as u32, 16);
        self.out.write_bits(!(length as u32) & 0xFFFF, 16);
    }

    /// Write a fixed-Huffman block header.
    pub fn write_fixed_header(&mut self, is_eof: bool) {
        if self.last_header > 0 {
            self.out
                .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
            self.last_header = 0;
            self.last_huffman = false;
        }
        self.out.write_bits(if is_eof { 3 } else { 2 }, 3);
    }

    /// Load the token histograms and trim the alphabets.
    ///
    /// Returns `(num_literals, num_offsets)` for the dynamic header.
    fn index_tokens(&mut self, t: &Tokens) -> (usize, usize) {
        self.literal_freq[..256].copy_from_slice(&t.lit_hist);
        self.literal_freq[256..288].copy_from_slice(&t.extra_hist);
        self.literal_freq[288] = 0;
        self.offset_freq = t.off_hist;

        if t.n != 0 {
            self.literal_freq[END_BLOCK_MARKER] = 1;
        }

        let mut num_literals = LITERAL_COUNT;
        while num_literals > LENGTH_CODES_START && self.literal_freq[num_literals - 1] == 0 {
            num_literals -= 1;
        }
        let mut num_offsets = OFFSET_CODE_COUNT;
        while num_offsets > 0 && self.offset_freq[num_offsets - 1] == 0 {
            num_offsets -= 1;
        }
        if num_offsets == 0 {
            // The offset tree must be encodable even with no matches.
            self.offset_freq[0] = 1;
            num_offsets = 1;
        }
        (num_literals, num_offsets)
    }

    /// Generate the dynamic literal/length and offset codes.
    fn generate(&mut self) {
        self.literal_encoding
            .generate(&self.literal_freq[..LITERAL_COUNT], 15);
        self.offset_encoding
            .generate(&self.offset_freq[..OFFSET_CODE_COUNT], 15);
    }

    /// Extra bits carried by length and offset codes at current frequencies.
    fn extra_bit_size(&self) -> i32 {
        let mut total = 0i32;
        for i in 0..LITERAL_COUNT - LENGTH_CODES_START {
            total +=
                self.literal_freq[LENGTH_CODES_START + i] as i32 * LENGTH_EXTRA_BITS[i & 31] as i32;
        }
        for i in 0..OFFSET_CODE_COUNT {
            total += self.offset_freq[i] as i32 * OFFSET_EXTRA_BITS[i & 31] as i32;
        }
        total
    }

    /// Bit size of the block with the fixed encodings.
    fn fixed_size(&self, extra_bits: i32) -> i32 {
        3 + fixed_literal_encoding().bit_length(&self.literal_freq[..LITERAL_COUNT])
            + fixed_offset_encoding().bit_length(&self.offset_freq[..OFFSET_CODE_COUNT])
            + extra_bits
    }

    /// Bit size of the block if stored, and whether storing is possible.
    fn stored_size(&self, input_len: usize) -> (i32, bool) {
        if input_len <= MAX_STORE_BLOCK_SIZE {
            ((input_len as i32 + 5) * 8, true)
        } else {
            (0, false)
        }
    }

    /// Build the RLE-compressed code-length sequence for the dynamic header
    /// and its symbol histogram.
    fn generate_codegen(&mut self, num_literals: usize, num_offsets: usize, huff_only: bool) {
        self.codegen_freq = [0; 19];

        let mut lengths = [0u8; LITERAL_COUNT + OFFSET_CODE_COUNT + 1];
        for i in 0..num_literals {
            lengths[i] = self.literal_encoding.codes[i].len() as u8;
        }
        let off_codes: &[HCode] = if huff_only {
            &fixed_offset_encoding().codes
        } else {
            &self.offset_encoding.codes
        };
        for i in 0..num_offsets {
            lengths[num_literals + i] = off_codes[i].len() as u8;
        }
        lengths[num_literals + num_offsets] = BAD_CODE;

        let mut out = 0usize;
        let mut size = lengths[0];
        let mut count = 1i32;
        let mut in_idx = 1usize;
        while size != BAD_CODE {
            let next_size = lengths[in_idx];
            in_idx += 1;
            if next_size == size {
                count += 1;
                continue;
            }
            if size != 0 {
                self.codegen[out] = size;
                out += 1;
                self.codegen_freq[size as usize] += 1;
                count -= 1;
                while count >= 3 {
                    let n = count.min(6);
                    self.codegen[out] = 16;
                    self.codegen[out + 1] = (n - 3) as u8;
                    out += 2;
                    self.codegen_freq[16] += 1;
                    count -= n;
                }
            } else {
                while count >= 11 {
                    let n = count.min(138);
                    self.codegen[out] = 18;
                    self.codegen[out + 1] = (n - 11) as u8;
                    out += 2;
                    self.codegen_freq[18] += 1;
                    count -= n;
                }
                if count >= 3 {
                    self.codegen[out] = 17;
                    self.codegen[out + 1] = (count - 3) as u8;
                    out += 2;
                    self.codegen_freq[17] += 1;
                    count = 0;
                }
            }
            count -= 1;
            while count >= 0 {
                self.codegen[out] = size;
                out += 1;
                self.codegen_freq[size as usize] += 1;
                count -= 1;
            }
            size = next_size;
            count = 1;
        }
        self.codegen[out] = BAD_CODE;
    }

    /// Number of code-length codes that must be transmitted.
    fn codegens(&self) -> usize {
        let mut n = 19;
        while n > 4 && self.codegen_freq[CODEGEN_ORDER[n - 1]] == 0 {
            n -= 1;
        }
        n
    }

    /// Bit size of the dynamic header, and the codegen count it transmits.
    fn header_size(&self) -> (i32, usize) {
        let num_codegens = self.codegens();
        let size = 3
            + 5
            + 5
            + 4
            + 3 * num_codegens as i32
            + self.codegen_encoding.bit_length(&self.codegen_freq)
            + self.codegen_freq[16] as i32 * 2
            + self.codegen_freq[17] as i32 * 3
            + self.codegen_freq[18] as i32 * 7;
        (size, num_codegens)
    }

    /// Total bit size of the block with the generated dynamic codes.
    fn dynamic_size(&self, extra_bits: i32) -> (i32, usize) {
        let (header, num_codegens) = self.header_size();
        let size = header
            + self
                .literal_encoding
                .bit_length(&self.literal_freq[..LITERAL_COUNT])
            + self
                .offset_encoding
                .bit_length(&self.offset_freq[..OFFSET_CODE_COUNT])
            + extra_bits;
        (size, num_codegens)
    }

    /// Write the dynamic block header: HLIT, HDIST, HCLEN, the code-length
    /// code lengths in transmission order, then the RLE-compressed lengths.
    fn write_dynamic_header(
        &mut self,
        num_literals: usize,
        num_offsets: usize,
        num_codegens: usize,
        is_eof: bool,
    ) {
        self.out.write_bits(if is_eof { 5 } else { 4 }, 3);
        self.out.write_bits((num_literals - 257) as u32, 5);
        self.out.write_bits((num_offsets - 1) as u32, 5);
        self.out.write_bits((num_codegens - 4) as u32, 4);

        for i in 0..num_codegens {
            let len = self.codegen_encoding.codes[CODEGEN_ORDER[i]].len();
            self.out.write_bits(len, 3);
        }

        let mut i = 0usize;
        loop {
            let code_word = self.codegen[i];
            i += 1;
            if code_word == BAD_CODE {
                break;
            }
            self.out
                .write_code(self.codegen_encoding.codes[code_word as usize]);
            match code_word {
                16 => {
                    self.out.write_bits(self.codegen[i] as u32, 2);
                    i += 1;
                }
                17 => {
                    self.out.write_bits(self.codegen[i] as u32, 3);
                    i += 1;
                }
                18 => {
                    self.out.write_bits(self.codegen[i] as u32, 7);
                    i += 1;
                }
                _ => {}
            }
        }
    }

    /// Write one block from a token stream, choosing the cheapest of
    /// stored, fixed, and dynamic encodings.
    ///
    /// `input` is the uncompressed block (for the stored fallback).
    pub fn write_block_dynamic(&mut self, tokens: &mut Tokens, eof: bool, input: &[u8]) {
        tokens.add_eob();

        if self.last_header > 0 {
            self.out
                .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
            self.last_header = 0;
            self.last_huffman = false;
        }

        let (num_literals, num_offsets) = self.index_tokens(tokens);
        self.generate();

        let (stored_bits, storable) = self.stored_size(input.len());
        let extra_bits = if storable { self.extra_bit_size() } else { 0 };

        let fixed_bits = self.fixed_size(extra_bits);

        self.generate_codegen(num_literals, num_offsets, false);
        self.codegen_encoding.generate(&self.codegen_freq, 7);
        let (dynamic_bits, num_codegens) = self.dynamic_size(extra_bits);

        if storable && stored_bits <= fixed_bits.min(dynamic_bits) {
            self.write_stored_header(input.len(), eof);
            self.out.write_bytes(input);
            return;
        }

        if fixed_bits <= dynamic_bits {
            self.write_fixed_header(eof);
            self.out.write_tokens(
                tokens.slice(),
                &fixed_literal_encoding().codes,
                &fixed_offset_encoding().codes,
            );
        } else {
            self.write_dynamic_header(num_literals, num_offsets, num_codegens, eof);
            self.out.write_tokens(
                tokens.slice(),
                &self.literal_encoding.codes,
                &self.offset_encoding.codes,
            );
        }
    }

    /// Accumulate the byte histogram of `input` into `literal_freq`.
    fn histogram(&mut self, input: &[u8]) {
        for &b in input {
            self.literal_freq[b as usize] += 1;
        }
    }

    /// Write a Huffman-only block: all literals, no match alphabet.
    ///
    /// May reuse the previous block's literal table; a fresh table pays the
    /// new-table penalty in the size estimate. Near-uniform histograms are
    /// stored directly.
    pub fn write_block_huff(&mut self, eof: bool, input: &[u8], sync: bool) {
        self.literal_freq = [0; LENGTH_CODES_START + 32];
        if !self.last_huffman {
            self.offset_freq = [0; 32];
        }

        let num_literals = END_BLOCK_MARKER + 1;
        let num_offsets = 1;

        self.histogram(input);

        let (stored_bits, storable) = self.stored_size(input.len());

        // Cheap incompressibility test: a near-uniform byte distribution
        // will not benefit from entropy coding.
        if storable && input.len() > 1024 {
            let avg = input.len() as f64 / 256.0;
            let max_dev = (input.len() * 2) as f64;
            let mut dev = 0f64;
            for i in 0..256 {
                let diff = self.literal_freq[i] as f64 - avg;
                dev += diff * diff;
                if dev > max_dev {
                    break;
                }
            }
            if dev < max_dev {
                self.write_stored_header(input.len(), eof);
                self.out.write_bytes(input);
                return;
            }
        }

        self.literal_freq[END_BLOCK_MARKER] = 1;
        self.tmp_lit_encoding
            .generate(&self.literal_freq[..num_literals], 15);
        let mut est_bits = self
            .tmp_lit_encoding
            .bit_length(&self.literal_freq[..num_literals]);

        est_bits += self.last_header;
        if self.last_header == 0 {
            est_bits += GUESS_HEADER_SIZE_BITS;
        }
        est_bits += est_bits >> self.log_new_table_penalty;

        if storable && stored_bits <= est_bits {
            self.write_stored_header(input.len(), eof);
            self.out.write_bytes(input);
            return;
        }

        if self.last_header > 0 {
            // Keep the live table only if it beats a fresh one and can
            // actually encode every symbol in this block.
            let reuse_bits = self
                .literal_encoding
                .can_reuse_bits(&self.literal_freq[..num_literals]);
            if est_bits < reuse_bits {
                self.out
                    .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
                self.last_header = 0;
            }
        }

        if self.last_header == 0 {
            std::mem::swap(&mut self.literal_encoding, &mut self.tmp_lit_encoding);
            self.generate_codegen(num_literals, num_offsets, true);
            self.codegen_encoding.generate(&self.codegen_freq, 7);
            let num_codegens = self.codegens();
            self.write_dynamic_header(num_literals, num_offsets, num_codegens, eof);
            self.last_huffman = true;
            self.last_header = self.header_size().0;
        }

        for &b in input {
            self.out.write_code(self.literal_encoding.codes[b as usize]);
        }

        if eof || sync {
            self.out
                .write_code(self.literal_encoding.codes[END_BLOCK_MARKER]);
            self.last_header = 0;
            self.last_huffman = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_final_stored_block() {
        let mut w = HuffmanBitWriter::new(7);
        w.write_stored_header(0, true);
        w.flush();
        // Fixed header with BFINAL=1 (3 bits: 110 LSB-first) + 7-bit EOB = 10 bits
        assert_eq!(w.data(), &[0x03, 0x00]);
    }

    #[test]
    fn test_stored_block_layout() {
        let mut w = HuffmanBitWriter::new(7);
        w.write_stored_header(5, true);
        w.write_bytes(b"Hello");
        w.flush();
        assert_eq!(
            w.data(),
            &[0x01, 0x05, 0x00, 0xFA, 0xFF, b'H', b'e', b'l', b'l', b'o']
        );
    }

    #[test]
    fn test_codegen_rle_zero_runs() {
        let mut w = HuffmanBitWriter::new(7);
        // One literal symbol (0) and EOB: everything between is a zero run
        let mut tokens = Tokens::new();
        for _ in 0..20 {
            tokens.add_literal(0);
        }
        let (nl, no) = w.index_tokens(&tokens);
        w.generate();
        w.generate_codegen(nl, no, false);
        // The run of zero lengths between symbol 0 and EOB must use code 18
        assert!(w.codegen_freq[18] > 0);
        // Sequence is terminated
        assert!(w.codegen.iter().any(|&c| c == BAD_CODE));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut w = HuffmanBitWriter::new(7);
        w.write_stored_header(5, false);
        w.write_bytes(b"Hello");
        w.reset();
        assert!(w.data().is_empty());
        w.write_stored_header(0, true);
        w.flush();
        assert_eq!(w.data(), &[0x03, 0x00]);
    }
}
