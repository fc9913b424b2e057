//! Error types for the ziplens engine.

use thiserror::Error;

/// Error types for archive and transport operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No End of Central Directory signature found; the input is not a ZIP
    #[error("not a ZIP archive: no end-of-central-directory record found")]
    NotAZip,

    /// Central Directory structures are inconsistent or truncated
    #[error("corrupt central directory: {reason}")]
    CorruptDirectory {
        /// What failed while decoding the directory
        reason: String,
    },

    /// Local File Header signature mismatch for a single entry
    #[error("corrupt local file header at offset {offset}")]
    CorruptLocalHeader {
        /// Absolute offset of the bad header
        offset: u64,
    },

    /// Entry uses a compression method other than STORED or DEFLATE
    #[error("unsupported compression method {method}")]
    UnsupportedCompression {
        /// Raw method id from the central directory
        method: u16,
    },

    /// Entry exceeds a caller-supplied size limit
    #[error("entry is {size} bytes, over the {limit} byte limit")]
    EntryTooLarge {
        /// Uncompressed entry size
        size: u64,
        /// The limit that was exceeded
        limit: u64,
    },

    /// DEFLATE stream did not decode to the declared size
    #[error("corrupt deflate stream: {reason}")]
    CorruptDeflate {
        /// What went wrong during inflation
        reason: String,
    },

    /// The resource cannot serve partial content
    #[error("server does not support range requests")]
    RangeUnsupported,

    /// Requested range extends past the end of the source
    #[error("range {start}-{end} out of bounds for {len} byte source")]
    OutOfBounds {
        /// Requested start offset
        start: u64,
        /// Requested inclusive end offset
        end: u64,
        /// Known source length
        len: u64,
    },

    /// Selected path is not present in the archive
    #[error("no entry named {path:?} in archive")]
    EntryNotFound {
        /// The path that was looked up
        path: String,
    },

    /// Resource is too big to download in full
    #[error("resource is {size} bytes, over the {limit} byte download limit")]
    DownloadTooLarge {
        /// Advertised resource size
        size: u64,
        /// Configured download ceiling
        limit: u64,
    },

    /// Re-archived output would need ZIP64 structures
    #[error("output archive exceeds 32-bit offsets at {offset} bytes")]
    ArchiveOverflow {
        /// Offset at which the overflow occurred
        offset: u64,
    },

    /// Probe deadline exceeded
    #[error("request timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// URL could not be parsed
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL
        url: String,
    },

    /// Origin answered with a status the operation cannot use
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// The status code the origin returned
        status: u16,
    },

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

// Helper methods for common error construction
impl Error {
    /// Create a corrupt directory error
    pub fn corrupt_directory(reason: impl Into<String>) -> Self {
        Self::CorruptDirectory {
            reason: reason.into(),
        }
    }

    /// Create a corrupt deflate error
    pub fn corrupt_deflate(reason: impl Into<String>) -> Self {
        Self::CorruptDeflate {
            reason: reason.into(),
        }
    }

    /// Create an entry not found error
    pub fn entry_not_found(path: impl Into<String>) -> Self {
        Self::EntryNotFound { path: path.into() }
    }

    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Whether this error leaves the rest of the archive usable.
    ///
    /// Per-entry failures (bad local header, unsupported method, corrupt
    /// deflate data, size limits) do not invalidate the handle; structural
    /// failures do.
    pub fn is_entry_local(&self) -> bool {
        matches!(
            self,
            Self::CorruptLocalHeader { .. }
                | Self::UnsupportedCompression { .. }
                | Self::EntryTooLarge { .. }
                | Self::CorruptDeflate { .. }
                | Self::EntryNotFound { .. }
        )
    }
}
