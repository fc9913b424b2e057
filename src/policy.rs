//! Tunable resource policy for the engine.
//!
//! Every limit the engine consults lives here and is passed in at
//! construction. The defaults suit interactive exploration of remote
//! archives; hosts embedding the engine can tighten or relax them.

use std::time::Duration;

/// Default maximum response size the proxy relay will forward (500 MiB)
const DEFAULT_PROXY_MAX_RESPONSE: u64 = 500 * 1024 * 1024;

/// Default archive size above which range-parse mode is preferred (20 MiB)
const DEFAULT_RANGE_PARSE_THRESHOLD: u64 = 20 * 1024 * 1024;

/// Default per-entry preview size limit (25 MiB)
const DEFAULT_PREVIEW_LIMIT: u64 = 25 * 1024 * 1024;

/// Default in-memory decompression ceiling for downloads (100 MiB)
const DEFAULT_INLINE_DECODE_CEILING: u64 = 100 * 1024 * 1024;

/// Default maximum size for falling back to a full download (500 MiB)
const DEFAULT_MAX_FULL_DOWNLOAD: u64 = 500 * 1024 * 1024;

/// Default line count at which text previews are truncated
const DEFAULT_PREVIEW_MAX_LINES: usize = 5_000;

/// Default deadline for HEAD probes
const DEFAULT_HEAD_TIMEOUT_SECS: u64 = 15;

/// Default deadline for the one-byte ranged probe
const DEFAULT_RANGE_PROBE_TIMEOUT_SECS: u64 = 10;

/// Default selection size above which re-archival asks for confirmation (200 MiB)
const DEFAULT_CONFIRM_BYTES: u64 = 200 * 1024 * 1024;

/// Default selection entry count above which re-archival asks for confirmation
const DEFAULT_CONFIRM_ENTRIES: usize = 50;

/// Resource limits and deadlines consulted throughout the engine.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Largest upstream response the proxy relay will forward
    pub proxy_max_response: u64,
    /// Archive size above which only the central directory is fetched
    pub range_parse_threshold: u64,
    /// Largest entry the extractor will decode for a preview
    pub preview_limit: u64,
    /// Largest DEFLATE entry decoded in memory for a download
    pub inline_decode_ceiling: u64,
    /// Largest resource downloaded in full when ranges are unavailable
    pub max_full_download: u64,
    /// Line count at which text previews are cut off
    pub preview_max_lines: usize,
    /// Deadline for HEAD capability probes
    pub head_timeout: Duration,
    /// Deadline for the one-byte ranged capability probe
    pub range_probe_timeout: Duration,
    /// Selection byte total that triggers the confirmation hook
    pub confirm_bytes: u64,
    /// Selection entry count that triggers the confirmation hook
    pub confirm_entries: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            proxy_max_response: DEFAULT_PROXY_MAX_RESPONSE,
            range_parse_threshold: DEFAULT_RANGE_PARSE_THRESHOLD,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            inline_decode_ceiling: DEFAULT_INLINE_DECODE_CEILING,
            max_full_download: DEFAULT_MAX_FULL_DOWNLOAD,
            preview_max_lines: DEFAULT_PREVIEW_MAX_LINES,
            head_timeout: Duration::from_secs(DEFAULT_HEAD_TIMEOUT_SECS),
            range_probe_timeout: Duration::from_secs(DEFAULT_RANGE_PROBE_TIMEOUT_SECS),
            confirm_bytes: DEFAULT_CONFIRM_BYTES,
            confirm_entries: DEFAULT_CONFIRM_ENTRIES,
        }
    }
}

impl Policy {
    /// Set the range-parse threshold
    pub fn with_range_parse_threshold(mut self, bytes: u64) -> Self {
        self.range_parse_threshold = bytes;
        self
    }

    /// Set the per-entry preview limit
    pub fn with_preview_limit(mut self, bytes: u64) -> Self {
        self.preview_limit = bytes;
        self
    }

    /// Set the full-download ceiling
    pub fn with_max_full_download(mut self, bytes: u64) -> Self {
        self.max_full_download = bytes;
        self
    }

    /// Set the proxy relay response ceiling
    pub fn with_proxy_max_response(mut self, bytes: u64) -> Self {
        self.proxy_max_response = bytes;
        self
    }
}
