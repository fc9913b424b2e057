//! Archive handles and open orchestration.
//!
//! An [`ArchiveHandle`] is the immutable product of opening an archive:
//! the byte source, the decoded entry listing, and any parse warnings.
//! Opening a URL runs the capability probe and decides between
//! range-parse mode (only the directory is fetched) and a full download
//! into memory. Reloading produces a new handle; handles never mutate.

use bytes::Bytes;
use reqwest::{Client, Url};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::{probe_source, BufferSource, ByteSource, HttpRangeSource, ProbeOutcome};
use crate::policy::Policy;
use crate::zip::extractor::{EntryExtractor, ExtractionResult};
use crate::zip::parser::DirectoryParser;
use crate::zip::structures::{CompressionMethod, ZipEntry};
use crate::zip::writer::ZipWriter;
use crate::classify::mime_type;

/// An opened archive: source, listing, and provenance.
pub struct ArchiveHandle {
    source: Arc<dyn ByteSource>,
    total_size: u64,
    entries: Vec<ZipEntry>,
    warnings: Vec<String>,
    is_proxied: bool,
    origin_url: Option<String>,
    proxy_base: Option<String>,
    policy: Policy,
}

/// How a selection of entries should be delivered.
#[derive(Debug)]
pub enum SelectionPlan {
    /// Nothing selected
    Empty,
    /// One file: deliver its extracted bytes as a plain download
    SingleEntry { path: String },
    /// Everything selected and the source is a URL: redirect, no refetch
    RedirectToSource { url: String },
    /// Re-archive the selected subset
    Archive {
        paths: Vec<String>,
        total_bytes: u64,
        /// Set when the selection is big enough that the caller should
        /// confirm before fetching begins
        needs_confirmation: bool,
    },
}

/// An entry the archiver could not include.
#[derive(Debug)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

impl ArchiveHandle {
    /// Open an archive already held in memory.
    pub async fn open_bytes(data: impl Into<Bytes>, policy: Policy) -> Result<Self> {
        let source: Arc<dyn ByteSource> = Arc::new(BufferSource::new(data.into()));
        let total_size = source.len();
        let directory = DirectoryParser::new(source.clone()).read_directory().await?;

        Ok(Self {
            source,
            total_size,
            entries: directory.entries,
            warnings: directory.warnings,
            is_proxied: false,
            origin_url: None,
            proxy_base: None,
            policy,
        })
    }

    /// Open a remote archive by URL.
    ///
    /// Probes the origin (falling back to `proxy_base` when direct
    /// contact fails), then either range-parses the directory or
    /// downloads the archive in full, per the probe outcome and policy.
    pub async fn open_url(url: &str, proxy_base: Option<&str>, policy: Policy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let mut probe = probe_source(&client, url, proxy_base, &policy).await?;
        debug!(?probe, "probe complete");

        // A range-capable origin that never revealed its size gets one
        // suffix read; the 206 Content-Range total back-fills the length.
        if probe.supports_ranges.is_supported() && probe.total_size == 0 {
            let src = if probe.via_proxy {
                let base = proxy_base.ok_or_else(|| Error::invalid_url(url))?;
                HttpRangeSource::proxied(client.clone(), base, url, 0)?
            } else {
                HttpRangeSource::new(client.clone(), url, 0)?
            };
            if let Ok((_, reported)) = src.read_suffix(1).await {
                probe.total_size = reported;
            }
        }

        let range_parse = probe.supports_ranges.is_supported()
            && probe.total_size > policy.range_parse_threshold;

        if range_parse {
            match Self::open_ranged(&client, url, proxy_base, &probe, &policy).await {
                Ok(handle) => return Ok(handle),
                // The probe can be lied to; a server that advertised
                // ranges but serves full bodies demotes to a download.
                Err(Error::RangeUnsupported) => {
                    warn!("range support withdrawn mid-parse, downloading in full");
                }
                Err(e) => return Err(e),
            }
        }

        Self::open_downloaded(&client, url, proxy_base, &probe, &policy).await
    }

    async fn open_ranged(
        client: &Client,
        url: &str,
        proxy_base: Option<&str>,
        probe: &ProbeOutcome,
        policy: &Policy,
    ) -> Result<Self> {
        let http_source = if probe.via_proxy {
            let base = proxy_base.ok_or_else(|| Error::invalid_url(url))?;
            HttpRangeSource::proxied(client.clone(), base, url, probe.total_size)?
        } else {
            HttpRangeSource::new(client.clone(), url, probe.total_size)?
        };
        let source: Arc<dyn ByteSource> = Arc::new(http_source);
        let directory = DirectoryParser::new(source.clone()).read_directory().await?;

        info!(
            entries = directory.entries.len(),
            transferred = source.bytes_transferred(),
            "range-parsed remote archive"
        );

        Ok(Self {
            source,
            total_size: probe.total_size,
            entries: directory.entries,
            warnings: directory.warnings,
            is_proxied: probe.via_proxy,
            origin_url: Some(url.to_string()),
            proxy_base: proxy_base.map(str::to_string),
            policy: policy.clone(),
        })
    }

    async fn open_downloaded(
        client: &Client,
        url: &str,
        proxy_base: Option<&str>,
        probe: &ProbeOutcome,
        policy: &Policy,
    ) -> Result<Self> {
        if probe.total_size > policy.max_full_download {
            return Err(Error::DownloadTooLarge {
                size: probe.total_size,
                limit: policy.max_full_download,
            });
        }

        let fetch_url = if probe.via_proxy {
            let base = proxy_base.ok_or_else(|| Error::invalid_url(url))?;
            let mut relay = Url::parse(&format!("{}/proxy", base.trim_end_matches('/')))
                .map_err(|_| Error::invalid_url(base))?;
            relay.query_pairs_mut().append_pair("url", url);
            relay.to_string()
        } else {
            url.to_string()
        };

        let resp = client.get(&fetch_url).send().await?;
        let resp = resp.error_for_status()?;
        if let Some(len) = resp.content_length() {
            if len > policy.max_full_download {
                return Err(Error::DownloadTooLarge {
                    size: len,
                    limit: policy.max_full_download,
                });
            }
        }
        let data = resp.bytes().await?;
        if data.len() as u64 > policy.max_full_download {
            return Err(Error::DownloadTooLarge {
                size: data.len() as u64,
                limit: policy.max_full_download,
            });
        }

        info!(bytes = data.len(), "downloaded remote archive in full");

        let mut handle = Self::open_bytes(data, policy.clone()).await?;
        handle.is_proxied = probe.via_proxy;
        handle.origin_url = Some(url.to_string());
        handle.proxy_base = proxy_base.map(str::to_string);
        Ok(handle)
    }

    /// Entries in Central Directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Look up one entry by exact path.
    pub fn entry(&self, path: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Non-fatal problems met while decoding the directory.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Whether I/O traverses the proxy relay.
    pub fn is_proxied(&self) -> bool {
        self.is_proxied
    }

    /// The URL this archive was opened from, if any.
    pub fn origin_url(&self) -> Option<&str> {
        self.origin_url.as_deref()
    }

    /// Cumulative bytes fetched from the network for this handle.
    pub fn bytes_transferred(&self) -> u64 {
        self.source.bytes_transferred()
    }

    fn extractor(&self) -> EntryExtractor {
        EntryExtractor::new(self.source.clone(), self.policy.clone())
    }

    /// Extract an entry's full contents.
    ///
    /// Entries above the inline decode ceiling are refused; STORED
    /// entries that big can be streamed via [`Self::stream_url`] and
    /// DEFLATE entries that big cannot be delivered at all.
    pub async fn extract(&self, path: &str) -> Result<Bytes> {
        let entry = self
            .entry(path)
            .ok_or_else(|| Error::entry_not_found(path))?;
        if entry.uncompressed_size > self.policy.inline_decode_ceiling {
            return Err(Error::EntryTooLarge {
                size: entry.uncompressed_size,
                limit: self.policy.inline_decode_ceiling,
            });
        }
        self.extractor().fetch_raw(entry).await
    }

    /// Extract an entry for preview.
    ///
    /// Entries over the preview limit come back as `TooLarge`, upgraded
    /// to `Streamed` when a media URL can be minted for them.
    pub async fn preview(&self, path: &str) -> Result<ExtractionResult> {
        let Some(entry) = self.entry(path) else {
            return Ok(ExtractionResult::NotFound);
        };

        let result = self.extractor().preview(entry).await?;
        if let ExtractionResult::TooLarge { .. } = result {
            if let Some(url) = self.stream_url(path).await? {
                return Ok(ExtractionResult::Streamed { url });
            }
        }
        Ok(result)
    }

    /// Mint a media-gateway URL exposing a STORED entry as a virtual
    /// file, when the archive came from a URL and a relay is configured.
    pub async fn stream_url(&self, path: &str) -> Result<Option<String>> {
        let entry = self
            .entry(path)
            .ok_or_else(|| Error::entry_not_found(path))?;
        let (Some(origin), Some(base)) = (self.origin_url.as_deref(), self.proxy_base.as_deref())
        else {
            return Ok(None);
        };
        if entry.compression_method != CompressionMethod::Stored || entry.is_directory {
            return Ok(None);
        }

        let (start, end) = self.extractor().data_span(entry).await?;
        let mut url = Url::parse(&format!("{}/proxy", base.trim_end_matches('/')))
            .map_err(|_| Error::invalid_url(base))?;
        url.query_pairs_mut()
            .append_pair("url", origin)
            .append_pair("media", "1")
            .append_pair("type", mime_type(&entry.path))
            .append_pair("start", &start.to_string())
            .append_pair("end", &end.to_string());
        Ok(Some(url.to_string()))
    }

    /// Mint a forced-download relay URL for an entry.
    ///
    /// STORED entries pass straight through; DEFLATE entries are
    /// inflated server-side by the relay.
    pub async fn proxy_download_url(&self, path: &str) -> Result<Option<String>> {
        let entry = self
            .entry(path)
            .ok_or_else(|| Error::entry_not_found(path))?;
        let (Some(origin), Some(base)) = (self.origin_url.as_deref(), self.proxy_base.as_deref())
        else {
            return Ok(None);
        };
        if entry.is_directory {
            return Ok(None);
        }

        let (start, end) = self.extractor().data_span(entry).await?;
        let mut url = Url::parse(&format!("{}/proxy", base.trim_end_matches('/')))
            .map_err(|_| Error::invalid_url(base))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("url", origin)
                .append_pair("start", &start.to_string())
                .append_pair("end", &end.to_string())
                .append_pair("download", entry.name());
            if entry.compression_method == CompressionMethod::Deflate {
                q.append_pair("inflate", "1")
                    .append_pair("size", &entry.uncompressed_size.to_string());
            }
        }
        Ok(Some(url.to_string()))
    }

    /// Classify a selection before any fetching happens.
    pub fn plan_selection(&self, selected: &[String]) -> SelectionPlan {
        let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let chosen: Vec<&ZipEntry> = self
            .entries
            .iter()
            .filter(|e| selected_set.contains(e.path.as_str()))
            .collect();

        if chosen.is_empty() {
            return SelectionPlan::Empty;
        }

        if chosen.len() == 1 && !chosen[0].is_directory {
            return SelectionPlan::SingleEntry {
                path: chosen[0].path.clone(),
            };
        }

        // Everything selected and a URL origin: hand back the source
        // itself instead of refetching entry by entry.
        if chosen.len() == self.entries.len() {
            if let Some(url) = &self.origin_url {
                return SelectionPlan::RedirectToSource { url: url.clone() };
            }
        }

        let total_bytes: u64 = chosen
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.uncompressed_size)
            .sum();
        let needs_confirmation = total_bytes > self.policy.confirm_bytes
            || chosen.len() > self.policy.confirm_entries;

        SelectionPlan::Archive {
            paths: chosen.iter().map(|e| e.path.clone()).collect(),
            total_bytes,
            needs_confirmation,
        }
    }

    /// Assemble a new ZIP from the selected entry paths.
    ///
    /// Entries are refetched through the extractor and recompressed.
    /// Per-entry failures do not abort the build; the failed paths are
    /// returned so the caller can surface them.
    pub async fn build_archive(&self, selected: &[String]) -> Result<(Vec<u8>, Vec<SkippedEntry>)> {
        let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let extractor = self.extractor();
        let mut writer = ZipWriter::new();
        let mut skipped = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in self.entries.iter().filter(|e| selected_set.contains(e.path.as_str())) {
            seen.insert(entry.path.as_str());
            if entry.is_directory {
                writer.add_directory(&entry.path, entry.last_modified)?;
                continue;
            }

            match extractor.fetch_raw(entry).await {
                Ok(data) => writer.add_file(&entry.path, &data, entry.last_modified)?,
                Err(e) if e.is_entry_local() => {
                    warn!(path = %entry.path, error = %e, "skipping entry during re-archival");
                    skipped.push(SkippedEntry {
                        path: entry.path.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        for path in selected {
            if !seen.contains(path.as_str()) {
                skipped.push(SkippedEntry {
                    path: path.clone(),
                    reason: "not present in archive".to_string(),
                });
            }
        }

        Ok((writer.finish()?, skipped))
    }
}
