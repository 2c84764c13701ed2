//! # pzip Zip
//!
//! ZIP container support (PKWARE APPNOTE, with ZIP64 extensions) and the
//! parallel archive pipeline.
//!
//! The container layer is [`ZipWriter`] and [`ZipReader`]; orchestration is
//! [`Archiver`] (walker → parallel compress pool → single-writer pool) and
//! [`Extractor`] (parallel per-member extraction).
//!
//! ```text
//! walker ──▶ compress pool (N) ──▶ writer pool (1) ──▶ ZipWriter ──▶ file
//!             per file: DEFLATE      per file: local header,
//!             into a 2 MiB buffer    data copy, data descriptor,
//!             with disk spill        central-directory entry
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod archiver;
pub mod extractor;
pub mod header;
pub mod reader;
pub mod task;
pub mod writer;

// Re-exports
pub use archiver::{Archiver, ArchiverOptions, ProgressCallback};
pub use extractor::{Extractor, ExtractorOptions};
pub use header::ZipFileHeader;
pub use reader::{ZipEntry, ZipReader};
pub use writer::ZipWriter;
