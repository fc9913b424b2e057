//! Capability probing for remote resources.
//!
//! Before an archive can be range-parsed the origin must be classified:
//! how big is the resource, does it serve partial content, and does it
//! have to be reached through the proxy relay. The ladder is HEAD, then
//! HEAD through the proxy, then a one-byte ranged GET. Every transport
//! failure demotes a capability rather than surfacing an error; only a
//! fully exhausted ladder fails.

use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use super::http::{content_range_total, proxy_fetch_url};
use super::RangeSupport;
use crate::error::{Error, Result};
use crate::policy::Policy;

/// What the probe ladder learned about a resource.
///
/// Immutable once returned.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Total resource size in bytes, zero if no probe revealed it
    pub total_size: u64,
    /// Range capability classification
    pub supports_ranges: RangeSupport,
    /// Whether the origin had to be reached through the proxy relay
    pub via_proxy: bool,
}

/// What a HEAD response revealed.
struct HeadInfo {
    total: u64,
    ranges_advertised: bool,
}

/// Classify a URL by probing its origin.
///
/// `proxy_base` is the relay to fall back to when the origin refuses
/// direct contact; without one, a failed direct probe is terminal.
pub async fn probe_source(
    client: &Client,
    url: &str,
    proxy_base: Option<&str>,
    policy: &Policy,
) -> Result<ProbeOutcome> {
    Url::parse(url).map_err(|_| Error::invalid_url(url))?;

    let mut via_proxy = false;
    let mut head = None;

    match head_probe(client, url, policy.head_timeout).await {
        Ok(info) => head = Some(info),
        Err(e) => {
            debug!("direct HEAD failed, demoting to proxy: {e}");
            if let Some(base) = proxy_base {
                via_proxy = true;
                let relay = proxy_fetch_url(base, url)?;
                match head_probe(client, relay.as_str(), policy.head_timeout).await {
                    Ok(info) => head = Some(info),
                    Err(e) => debug!("proxy HEAD failed: {e}"),
                }
            }
        }
    }

    // A HEAD that advertised both length and range support settles it.
    if let Some(info) = &head {
        if info.ranges_advertised && info.total > 0 {
            return Ok(ProbeOutcome {
                total_size: info.total,
                supports_ranges: RangeSupport::Yes,
                via_proxy,
            });
        }
    }

    // HEAD was inconclusive; a one-byte ranged GET settles range support,
    // and its Content-Range total is preferred over any HEAD figure.
    let probe_target = if via_proxy {
        proxy_fetch_url(proxy_base.unwrap_or_default(), url)?.to_string()
    } else {
        url.to_string()
    };

    match range_probe(client, &probe_target, policy.range_probe_timeout).await {
        Ok((true, total)) => {
            let total = if total > 0 {
                total
            } else {
                head.map(|h| h.total).unwrap_or(0)
            };
            Ok(ProbeOutcome {
                total_size: total,
                supports_ranges: RangeSupport::Yes,
                via_proxy,
            })
        }
        Ok((false, total)) => {
            let total = head
                .map(|h| h.total)
                .filter(|&t| t > 0)
                .unwrap_or(total);
            Ok(ProbeOutcome {
                total_size: total,
                supports_ranges: RangeSupport::No,
                via_proxy,
            })
        }
        Err(e) => {
            // Retry the ranged probe through the relay before giving up.
            if !via_proxy {
                if let Some(base) = proxy_base {
                    debug!("direct range probe failed, demoting to proxy: {e}");
                    let relay = proxy_fetch_url(base, url)?;
                    if let Ok((supported, total)) =
                        range_probe(client, relay.as_str(), policy.range_probe_timeout).await
                    {
                        let support = if supported {
                            RangeSupport::Yes
                        } else {
                            RangeSupport::No
                        };
                        return Ok(ProbeOutcome {
                            total_size: total,
                            supports_ranges: support,
                            via_proxy: true,
                        });
                    }
                }
            }
            match head {
                // The resource answered HEAD; it just cannot serve ranges.
                Some(info) => Ok(ProbeOutcome {
                    total_size: info.total,
                    supports_ranges: RangeSupport::No,
                    via_proxy,
                }),
                None => Err(e),
            }
        }
    }
}

/// Issue a HEAD and read size and range capability headers.
///
/// `X-File-Size` and `X-Range-Support` are consulted as fallbacks because
/// some edge runtimes strip standard headers from HEAD responses.
async fn head_probe(client: &Client, url: &str, deadline: Duration) -> Result<HeadInfo> {
    let resp = client.head(url).timeout(deadline).send().await?;
    if !resp.status().is_success() {
        return Err(Error::UnexpectedStatus {
            status: resp.status().as_u16(),
        });
    }

    let header_u64 = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    };
    let total = header_u64("content-length")
        .filter(|&len| len > 0)
        .or_else(|| header_u64("x-file-size"))
        .unwrap_or(0);

    let accept_ranges = resp
        .headers()
        .get("accept-ranges")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let relay_flag = resp
        .headers()
        .get("x-range-support")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let ranges_advertised = accept_ranges.contains("bytes") || relay_flag == "true";

    Ok(HeadInfo {
        total,
        ranges_advertised,
    })
}

/// Issue `Range: bytes=0-0` and classify the response.
///
/// Returns `(range_supported, total_size)`. The body is never read;
/// dropping the response aborts it, so a 200 answer does not stream the
/// whole resource.
async fn range_probe(client: &Client, url: &str, deadline: Duration) -> Result<(bool, u64)> {
    let resp = client
        .get(url)
        .header("Range", "bytes=0-0")
        .timeout(deadline)
        .send()
        .await?;

    match resp.status() {
        StatusCode::PARTIAL_CONTENT => {
            let total = resp
                .headers()
                .get("content-range")
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_total)
                .unwrap_or(0);
            Ok((true, total))
        }
        StatusCode::OK => {
            let total = resp
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            Ok((false, total))
        }
        status => Err(Error::UnexpectedStatus {
            status: status.as_u16(),
        }),
    }
}
