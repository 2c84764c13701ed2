//! Streaming DEFLATE compression.
//!
//! [`FlateWriter`] accumulates input in a 64 KiB window and emits one block
//! per full window. Compressed bytes collect in the bit writer's buffer and
//! flush to the sink once 256 KiB are pending, and fully on close.

use std::io::Write;

use pzip_core::error::Result;

use crate::bitwriter::HuffmanBitWriter;
use crate::encoder::Encoder;
use crate::token::{Tokens, MAX_STORE_BLOCK_SIZE};

/// Flush the output buffer to the sink once this many bytes are pending.
const OUTPUT_FLUSH_THRESHOLD: usize = 256 * 1024;

/// New-table penalty exponent for a compression level.
fn new_table_penalty(level: u8) -> u32 {
    match level {
        0..=3 => 8,
        4..=6 => 7,
        _ => 6,
    }
}

/// A streaming DEFLATE encoder writing to an [`io::Write`](std::io::Write) sink.
pub struct FlateWriter<W: Write> {
    sink: W,
    window: Vec<u8>,
    window_end: usize,
    level: u8,
    encoder: Encoder,
    writer: HuffmanBitWriter,
    tokens: Tokens,
}

impl<W: Write> FlateWriter<W> {
    /// Create an encoder for `level` (0–9, clamped) writing to `sink`.
    pub fn new(sink: W, level: u8) -> Self {
        let level = level.min(9);
        Self {
            sink,
            window: vec![0u8; MAX_STORE_BLOCK_SIZE],
            window_end: 0,
            level,
            encoder: Encoder::for_level(level.max(1)),
            writer: HuffmanBitWriter::new(new_table_penalty(level)),
            tokens: Tokens::new(),
        }
    }

    /// Discard all state, retain allocations, and write to a new sink.
    pub fn reset(&mut self, sink: W) {
        self.sink = sink;
        self.window_end = 0;
        self.encoder.reset();
        self.writer.reset();
        self.tokens.reset();
    }

    /// Append bytes, emitting a block whenever the window fills.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.window_end == self.window.len() {
                self.store_fast(false)?;
            }
            let n = (self.window.len() - self.window_end).min(data.len());
            self.window[self.window_end..self.window_end + n].copy_from_slice(&data[..n]);
            self.window_end += n;
            data = &data[n..];
        }
        Ok(())
    }

    /// Emit the remaining buffered data as the final block and flush
    /// everything to the sink.
    pub fn close(&mut self) -> Result<()> {
        if self.window_end > 0 {
            self.store_fast(true)?;
        } else {
            self.writer.write_stored_header(0, true);
        }
        self.writer.flush();
        self.force_flush()?;
        Ok(())
    }

    /// Consume the encoder, closing the stream, and return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        Ok(self.sink)
    }

    /// Encode and write the current window as one block.
    ///
    /// Decision rule: no matches produced means the block is stored (or
    /// Huffman-only for larger windows); a token count above
    /// `len - len/16` means matching removed less than 1/16th, so
    /// Huffman-only; anything better goes through the dynamic writer.
    fn store_fast(&mut self, eof: bool) -> Result<()> {
        let window = &self.window[..self.window_end];
        if window.is_empty() {
            return Ok(());
        }

        if self.level == 0 {
            self.writer.write_stored_header(window.len(), eof);
            self.writer.write_bytes(window);
            self.window_end = 0;
            self.flush_output()?;
            return Ok(());
        }

        if window.len() < 128 {
            // Not worth running the match finder.
            if window.len() <= 32 {
                self.writer.write_stored_header(window.len(), eof);
                self.writer.write_bytes(window);
            } else {
                self.writer.write_block_huff(eof, window, eof);
            }
            self.tokens.reset();
            self.window_end = 0;
            self.encoder.reset();
            self.flush_output()?;
            return Ok(());
        }

        self.tokens.reset();
        self.encoder.encode(&mut self.tokens, window);

        if self.tokens.n == 0 {
            self.writer.write_stored_header(window.len(), eof);
            self.writer.write_bytes(window);
        } else if self.tokens.n > window.len() - (window.len() >> 4) {
            self.writer.write_block_huff(eof, window, eof);
        } else {
            self.writer.write_block_dynamic(&mut self.tokens, eof, window);
        }

        self.tokens.reset();
        self.window_end = 0;
        self.flush_output()?;
        Ok(())
    }

    /// Drain the output buffer to the sink once it is large enough.
    fn flush_output(&mut self) -> Result<()> {
        if self.writer.data().len() >= OUTPUT_FLUSH_THRESHOLD {
            self.sink.write_all(self.writer.data())?;
            self.writer.data_mut().clear();
        }
        Ok(())
    }

    /// Drain the output buffer unconditionally.
    fn force_flush(&mut self) -> Result<()> {
        if !self.writer.data().is_empty() {
            self.sink.write_all(self.writer.data())?;
            self.writer.data_mut().clear();
        }
        self.sink.flush()?;
        Ok(())
    }
}

/// Compress a buffer in one call, returning the raw DEFLATE stream.
pub fn deflate(data: &[u8], level: u8) -> Result<Vec<u8>> {
    let mut writer = FlateWriter::new(Vec::with_capacity(data.len() / 2 + 64), level);
    writer.write(data)?;
    writer.finish()
}
