//! # pzip Core
//!
//! Core components for the pzip parallel archiver.
//!
//! This crate provides the building blocks shared by the compressor and the
//! container layer:
//!
//! - [`crc`]: streaming CRC-32 (ISO 3309) with slicing-by-8 tables
//! - [`pool`]: bounded worker pool with first-error-stops-all semantics
//! - [`error`]: error types
//!
//! ## Architecture
//!
//! pzip is a layered pipeline:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ CLI: pzip / punzip                                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Orchestration: Archiver, Extractor (pzip-zip)           │
//! ├─────────────────────────────────────────────────────────┤
//! │ Container: ZipWriter / ZipReader (pzip-zip)             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Codec: DEFLATE encoder + inflate (pzip-deflate)         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Core (this crate): CRC-32, WorkerPool, errors           │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod crc;
pub mod error;
pub mod pool;

// Re-exports for convenience
pub use crc::Crc32;
pub use error::{PzipError, Result};
pub use pool::WorkerPool;
