//! # ziplens
//!
//! A remote ZIP explorer engine. Given a byte buffer or an HTTP(S) URL,
//! ziplens produces a navigable listing of the archive's entries and
//! extracts individual entries on demand, without ever downloading the
//! archive in full when the origin supports byte-range requests. Listing
//! a multi-gigabyte archive transfers tens of kilobytes; previewing one
//! file transfers only that file's compressed bytes.
//!
//! ## Features
//!
//! - Entry listing from the Central Directory alone via HTTP Range requests
//! - ZIP64 support (archives and entries past 4 GiB)
//! - STORED and DEFLATE extraction
//! - Capability probing with a CORS-bypassing proxy relay fallback
//! - Media gateway that lets players seek inside STORED entries
//! - Selective re-archival of a chosen subset of entries
//!
//! ## Example
//!
//! ```no_run
//! use ziplens::{ArchiveHandle, Policy};
//!
//! #[tokio::main]
//! async fn main() -> ziplens::Result<()> {
//!     let handle =
//!         ArchiveHandle::open_url("https://example.com/archive.zip", None, Policy::default())
//!             .await?;
//!
//!     for entry in handle.entries() {
//!         println!("{}: {} bytes", entry.path, entry.uncompressed_size);
//!     }
//!
//!     let readme = handle.extract("README.md").await?;
//!     println!("{}", String::from_utf8_lossy(&readme));
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod classify;
pub mod cli;
pub mod error;
pub mod io;
pub mod policy;
pub mod server;
pub mod zip;

pub use archive::{ArchiveHandle, SelectionPlan, SkippedEntry};
pub use classify::{classify, PreviewKind};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{probe_source, BufferSource, ByteSource, HttpRangeSource, ProbeOutcome, RangeSupport};
pub use policy::Policy;
pub use zip::{
    CompressionMethod, Directory, DirectoryParser, DosDateTime, EntryExtractor, ExtractionResult,
    ZipEntry, ZipWriter,
};
