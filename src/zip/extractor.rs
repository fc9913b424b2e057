//! On-demand entry extraction.
//!
//! Given an entry's Central Directory record, resolves the Local File
//! Header to find the compressed bytes, fetches exactly that span, and
//! applies STORED or DEFLATE decoding. Nothing is cached; every call
//! fetches fresh and failures never return partial buffers.

use bytes::Bytes;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classify::{classify, PreviewKind};
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::policy::Policy;

use super::structures::{CompressionMethod, ZipEntry, LFH_SIGNATURE, LFH_SIZE};

/// Bytes fetched at the local header: 30 fixed plus room for the name
/// and extra field, which stay under 512 bytes in practice.
const LFH_PREFETCH: u64 = (LFH_SIZE + 512) as u64;

/// Outcome of extracting one entry.
pub enum ExtractionResult {
    /// Decoded UTF-8 text, possibly replacement-escaped or cut off at the
    /// preview line limit
    Text {
        content: String,
        lossy: bool,
        truncated: bool,
    },
    /// Raw bytes with the preview kind the consumer should render
    Binary { bytes: Bytes, kind: PreviewKind },
    /// Too big to decode inline; stream it from this URL instead
    Streamed { url: String },
    /// Over the preview size limit
    TooLarge { size: u64, limit: u64 },
    /// Compression method the engine cannot decode
    UnsupportedCompression { method: u16 },
    /// The requested path is not in the archive
    NotFound,
}

/// Extractor over one archive's byte source.
///
/// Extractions are independent per entry; concurrent calls on the same
/// extractor are safe because each issues its own reads.
pub struct EntryExtractor {
    source: Arc<dyn ByteSource>,
    policy: Policy,
}

impl EntryExtractor {
    pub fn new(source: Arc<dyn ByteSource>, policy: Policy) -> Self {
        Self { source, policy }
    }

    /// Resolve the absolute span `[data_start, data_end]` of an entry's
    /// compressed bytes.
    ///
    /// Reads the Local File Header to learn the real name and extra
    /// field lengths; the Central Directory copies are not authoritative.
    pub async fn data_span(&self, entry: &ZipEntry) -> Result<(u64, u64)> {
        let offset = entry.local_header_offset;
        let size = self.source.len();
        if offset + LFH_SIZE as u64 > size {
            return Err(Error::CorruptLocalHeader { offset });
        }

        let fetch_end = (offset + LFH_PREFETCH - 1).min(size - 1);
        let header = self.source.read_range(offset, fetch_end).await?;

        if header.len() < LFH_SIZE || &header[0..4] != LFH_SIGNATURE {
            return Err(Error::CorruptLocalHeader { offset });
        }

        let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;

        let data_start = offset + LFH_SIZE as u64 + name_len + extra_len;
        let data_end = data_start + entry.compressed_size.saturating_sub(1);
        debug!(path = %entry.path, data_start, data_end, "resolved data span");
        Ok((data_start, data_end))
    }

    /// Fetch and decode an entry's full contents.
    ///
    /// No size gate is applied; this is the raw-download path.
    pub async fn fetch_raw(&self, entry: &ZipEntry) -> Result<Bytes> {
        if entry.is_directory || entry.uncompressed_size == 0 {
            return Ok(Bytes::new());
        }

        match entry.compression_method {
            CompressionMethod::Stored => {
                if entry.compressed_size != entry.uncompressed_size {
                    warn!(path = %entry.path, "stored entry sizes disagree");
                }
                let (start, end) = self.data_span(entry).await?;
                self.source.read_range(start, end).await
            }
            CompressionMethod::Deflate => {
                let (start, end) = self.data_span(entry).await?;
                let compressed = self.source.read_range(start, end).await?;
                inflate_raw(&compressed, entry.uncompressed_size)
            }
            CompressionMethod::Unknown(method) => Err(Error::UnsupportedCompression { method }),
        }
    }

    /// Extract an entry for preview: size-gated, classified, and decoded
    /// to text when the classification is textual.
    pub async fn preview(&self, entry: &ZipEntry) -> Result<ExtractionResult> {
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Ok(ExtractionResult::UnsupportedCompression { method });
        }

        if entry.uncompressed_size > self.policy.preview_limit {
            return Ok(ExtractionResult::TooLarge {
                size: entry.uncompressed_size,
                limit: self.policy.preview_limit,
            });
        }

        let bytes = self.fetch_raw(entry).await?;
        let kind = classify(&entry.path);

        if kind.is_textual() {
            let (content, lossy) = match std::str::from_utf8(&bytes) {
                Ok(s) => (s.to_string(), false),
                Err(_) => (String::from_utf8_lossy(&bytes).into_owned(), true),
            };
            let (content, truncated) = truncate_lines(content, self.policy.preview_max_lines);
            return Ok(ExtractionResult::Text {
                content,
                lossy,
                truncated,
            });
        }

        Ok(ExtractionResult::Binary { bytes, kind })
    }
}

/// Raw-DEFLATE a compressed span to exactly `expected` bytes.
///
/// ZIP entries carry raw deflate streams, no zlib or gzip framing.
fn inflate_raw(compressed: &[u8], expected: u64) -> Result<Bytes> {
    let mut decoder = DeflateDecoder::new(compressed);
    let mut out = Vec::with_capacity(expected as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt_deflate(e.to_string()))?;

    if out.len() as u64 != expected {
        return Err(Error::corrupt_deflate(format!(
            "decoded {} bytes, directory declares {}",
            out.len(),
            expected
        )));
    }

    Ok(Bytes::from(out))
}

/// Cut text off after `max_lines` lines.
fn truncate_lines(content: String, max_lines: usize) -> (String, bool) {
    let mut count = 0usize;
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            count += 1;
            if count >= max_lines {
                let mut cut = content;
                cut.truncate(i + 1);
                return (cut, true);
            }
        }
    }
    (content, false)
}
