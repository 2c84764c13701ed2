//! # pzip Deflate
//!
//! Hand-tuned implementation of the DEFLATE compression format (RFC 1951).
//!
//! The encoder is block-based and streaming: bytes accumulate in a 64 KiB
//! window and every full window is emitted as one DEFLATE block. Two match
//! finders cover the level range:
//!
//! - **L1** (levels 1–3): single 5-byte-keyed hash table, skip-log 5
//! - **L4** (levels 4–9): 4-byte and 7-byte-keyed tables, skip-log 6
//!
//! Per block the bit writer picks the smallest of four encodings: stored,
//! fixed Huffman, dynamic Huffman, or Huffman-only (literal blocks with no
//! matches, which may reuse the previous block's literal table).
//!
//! ## Example
//!
//! ```rust
//! use pzip_deflate::{deflate, inflate};
//!
//! let original = b"Hello, World! Hello, World!";
//! let compressed = deflate(original, 1).unwrap();
//! let decompressed = inflate(&compressed).unwrap();
//! assert_eq!(&decompressed, original);
//! ```
//!
//! ## Compression levels
//!
//! - Level 0: no compression (stored blocks)
//! - Levels 1–3: fast single-hash match finder
//! - Levels 4–6: dual-hash match finder
//! - Levels 7–9: dual-hash with a smaller new-table penalty

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bitwriter;
pub mod deflate;
pub mod encoder;
pub mod huffman;
pub mod inflate;
pub mod tables;
pub mod token;

// Re-exports
pub use crate::deflate::{deflate, FlateWriter};
pub use crate::huffman::{HCode, HuffmanEncoder};
pub use crate::inflate::inflate;
pub use crate::token::{Token, Tokens};
