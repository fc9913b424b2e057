//! HTTP Range request source for remote ZIP archives.
//!
//! Implements random-access reading from HTTP servers using the Range
//! request header (RFC 7233), fetching only the byte spans the parser and
//! extractor ask for.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::ByteSource;
use crate::error::{Error, Result};

/// Maximum attempts for a single range read
const DEFAULT_MAX_RETRY: u32 = 10;

/// Base backoff between retries, scaled linearly by attempt count
const RETRY_BACKOFF_MS: u64 = 500;

/// HTTP Range source for remote archives.
///
/// The remote server must answer ranged GETs with 206 Partial Content.
/// A 200 answer to a ranged request means the server ignored the header;
/// the response body is dropped without draining and the read fails with
/// `RangeUnsupported` so the caller can fall back to a full download.
///
/// Transient connect and timeout errors are retried with linear backoff.
/// Cumulative transfer is tracked for bandwidth reporting.
pub struct HttpRangeSource {
    /// HTTP client with connection pooling
    client: Client,
    /// Effective fetch URL (the relay URL when proxied)
    fetch_url: Url,
    /// Total size of the remote resource, zero if unknown
    size: u64,
    /// Whether requests traverse the proxy relay
    proxied: bool,
    /// Cumulative bytes received from the network
    transferred: AtomicU64,
    /// Maximum attempts per read
    max_retry: u32,
}

impl HttpRangeSource {
    /// Create a source that fetches the origin directly.
    pub fn new(client: Client, url: &str, size: u64) -> Result<Self> {
        let fetch_url = Url::parse(url).map_err(|_| Error::invalid_url(url))?;
        Ok(Self {
            client,
            fetch_url,
            size,
            proxied: false,
            transferred: AtomicU64::new(0),
            max_retry: DEFAULT_MAX_RETRY,
        })
    }

    /// Create a source that fetches the origin through the proxy relay.
    ///
    /// The relay forwards `Range` headers verbatim, so offset arithmetic
    /// is identical to the direct case.
    pub fn proxied(client: Client, proxy_base: &str, origin_url: &str, size: u64) -> Result<Self> {
        let fetch_url = proxy_fetch_url(proxy_base, origin_url)?;
        Ok(Self {
            client,
            fetch_url,
            size,
            proxied: true,
            transferred: AtomicU64::new(0),
            max_retry: DEFAULT_MAX_RETRY,
        })
    }

    /// Whether reads traverse the proxy relay.
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    /// Read the last `n` bytes with a suffix range (`bytes=-n`).
    ///
    /// Usable when the total length is unknown; the 206 `Content-Range`
    /// total back-fills it. Returns the bytes and the server-reported
    /// total size.
    pub async fn read_suffix(&self, n: u64) -> Result<(Bytes, u64)> {
        let resp = self
            .client
            .get(self.fetch_url.clone())
            .header("Range", format!("bytes=-{n}"))
            .send()
            .await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            // Server ignored the suffix range; drop the body unread.
            StatusCode::OK => return Err(Error::RangeUnsupported),
            status => {
                return Err(Error::UnexpectedStatus {
                    status: status.as_u16(),
                })
            }
        }

        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total)
            .ok_or(Error::RangeUnsupported)?;

        let bytes = resp.bytes().await?;
        self.transferred
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok((bytes, total))
    }
}

#[async_trait]
impl ByteSource for HttpRangeSource {
    /// Fetch `[start, end]` with `Range: bytes=start-end`.
    ///
    /// Retries timeouts and connection failures with linear backoff and
    /// re-requests the remaining span after a short body.
    async fn read_range(&self, start: u64, end: u64) -> Result<Bytes> {
        if self.size > 0 && (end >= self.size || end < start) {
            return Err(Error::OutOfBounds {
                start,
                end,
                len: self.size,
            });
        }

        let expected = (end - start + 1) as usize;
        let mut out: Vec<u8> = Vec::with_capacity(expected);
        let mut retry_count = 0u32;

        while out.len() < expected {
            let current_start = start + out.len() as u64;
            let range = format!("bytes={current_start}-{end}");

            let result = self
                .client
                .get(self.fetch_url.clone())
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() == StatusCode::OK {
                        // The server ignored the Range header. Dropping the
                        // response aborts the connection without draining
                        // the full payload.
                        return Err(Error::RangeUnsupported);
                    }
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(Error::UnexpectedStatus {
                            status: resp.status().as_u16(),
                        });
                    }

                    let bytes = resp.bytes().await?;
                    let take = bytes.len().min(expected - out.len());
                    out.extend_from_slice(&bytes[..take]);
                    self.transferred.fetch_add(take as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(Error::Http(e));
                    }
                    warn!(
                        "connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BACKOFF_MS * u64::from(retry_count),
                    ))
                    .await;
                }
                Err(e) => return Err(Error::Http(e)),
            }
        }

        debug!(start, end, bytes = out.len(), "range read complete");
        Ok(Bytes::from(out))
    }

    fn len(&self) -> u64 {
        self.size
    }

    fn bytes_transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

/// Build the relay fetch URL `<proxy_base>/proxy?url=<origin>`.
pub(crate) fn proxy_fetch_url(proxy_base: &str, origin_url: &str) -> Result<Url> {
    let base = proxy_base.trim_end_matches('/');
    let mut url =
        Url::parse(&format!("{base}/proxy")).map_err(|_| Error::invalid_url(proxy_base))?;
    url.query_pairs_mut().append_pair("url", origin_url);
    Ok(url)
}

/// Pull the total-size field out of a `Content-Range` header value.
///
/// `bytes 0-0/12345` → `Some(12345)`. An unknown total (`bytes 0-0/*`)
/// yields `None`.
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}
