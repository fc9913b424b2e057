mod buffer;
mod http;
mod probe;

pub use buffer::BufferSource;
pub use http::HttpRangeSource;
pub use probe::{probe_source, ProbeOutcome};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Trait for random access reading from a byte-addressable resource.
///
/// All offsets are absolute; ranges are inclusive on both ends. Callers do
/// the ZIP offset arithmetic; a source only moves bytes.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Fetch the inclusive byte range `[start, end]`.
    ///
    /// Fails with `OutOfBounds` when `end` is past the known length,
    /// `RangeUnsupported` when the resource cannot serve partial content,
    /// and `Http`/`Io` for transport errors.
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes>;

    /// Total size of the resource in bytes. Zero means unknown.
    fn len(&self) -> u64;

    /// Whether the resource is empty (or of unknown size).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cumulative bytes moved from the underlying resource.
    ///
    /// Network sources track this for bandwidth reporting; pure in-memory
    /// sources return zero.
    fn bytes_transferred(&self) -> u64 {
        0
    }
}

/// Whether a resource is known to serve partial content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSupport {
    /// A 206 response or `Accept-Ranges: bytes` was observed
    Yes,
    /// Every probe path was exhausted without a 206
    No,
    /// Not yet probed
    Unknown,
}

impl RangeSupport {
    /// True only for confirmed support.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Yes)
    }
}
