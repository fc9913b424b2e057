//! `/proxy` relay handlers.
//!
//! Forwards GET and HEAD to an arbitrary origin, preserving Range
//! semantics, so a browser client can issue the ranged reads the engine
//! needs against origins that refuse CORS. Also carries the
//! forced-download and server-side-inflate modes the explorer uses for
//! entries too large to decode in the client.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use flate2::read::DeflateDecoder;
use reqwest::Url;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

use super::media;
use super::AppState;

/// Upstream headers relayed back to the client verbatim.
const RELAYED_HEADERS: &[header::HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CONTENT_DISPOSITION,
];

/// User agent presented to origins.
const UPSTREAM_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Query parameters accepted by the `/proxy` endpoint.
#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    /// Absolute upstream URL
    pub url: Option<String>,
    /// Inclusive absolute start offset; with `end`, synthesizes a Range
    pub start: Option<u64>,
    /// Inclusive absolute end offset
    pub end: Option<u64>,
    /// Force a download response with this basename
    pub download: Option<String>,
    /// `1` to raw-inflate the fetched range server-side
    pub inflate: Option<String>,
    /// Declared decompressed size for `inflate=1`
    pub size: Option<u64>,
    /// `1` to serve the range as a virtual media file
    pub media: Option<String>,
    /// MIME type for media responses
    #[serde(rename = "type")]
    pub mime: Option<String>,
}

/// Relay-level error mapped onto the wire contract.
#[derive(Debug)]
pub enum AppError {
    /// Missing or unparseable request parameter (400)
    BadRequest(String),
    /// Origin unreachable or answered ≥ 400 (502)
    Upstream(String),
    /// Resource exceeds the relay's size policy (413)
    TooLarge { size: u64, limit: u64 },
    /// Server-side decompression failed (500)
    InflateFailed(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::TooLarge { size, limit } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("resource is {size} bytes, limit is {limit}"),
            ),
            Self::InflateFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            serde_json::json!({ "error": message }).to_string(),
        )
            .into_response()
    }
}

/// Parse and validate the `url` parameter.
pub(super) fn upstream_url(query: &ProxyQuery) -> Result<Url, AppError> {
    let raw = query
        .url
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("missing url parameter".into()))?;
    let url = Url::parse(raw).map_err(|_| AppError::BadRequest(format!("invalid url: {raw}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

/// Root of the origin, used as the Referer presented upstream.
fn origin_root(url: &Url) -> String {
    format!(
        "{}://{}/",
        url.scheme(),
        url.host_str().unwrap_or_default()
    )
}

/// Build an upstream request with the identity the relay presents.
pub(super) fn upstream_request(
    state: &AppState,
    method: reqwest::Method,
    url: &Url,
) -> reqwest::RequestBuilder {
    state
        .client
        .request(method, url.clone())
        .header(header::USER_AGENT, UPSTREAM_USER_AGENT)
        .header(header::REFERER, origin_root(url))
}

/// Handle `GET /proxy`.
pub async fn proxy_get(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if query.media.as_deref() == Some("1") {
        return media::serve_media(&state, &query, &headers).await;
    }

    let url = upstream_url(&query)?;
    let mut request = upstream_request(&state, reqwest::Method::GET, &url);

    // Explicit offsets win over a forwarded Range header.
    if let (Some(start), Some(end)) = (query.start, query.end) {
        request = request.header(header::RANGE, format!("bytes={start}-{end}"));
    } else if let Some(range) = headers.get(header::RANGE) {
        request = request.header(header::RANGE, range.clone());
    }

    let resp = request
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(AppError::Upstream(format!(
            "origin answered {status} for {url}"
        )));
    }

    if let Some(len) = resp.content_length() {
        if len > state.policy.proxy_max_response {
            return Err(AppError::TooLarge {
                size: len,
                limit: state.policy.proxy_max_response,
            });
        }
    }

    debug!(%url, status = %status, "relaying upstream response");

    if query.inflate.as_deref() == Some("1") {
        return inflate_response(&state, resp, &query).await;
    }

    if let Some(basename) = &query.download {
        return Ok(download_response(resp, basename));
    }

    // Plain relay: preserve status and the contract headers, stream the body.
    let mut builder = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap());
    for name in RELAYED_HEADERS {
        if let Some(value) = resp.headers().get(name) {
            builder = builder.header(name, value);
        }
    }
    Ok(builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap())
}

/// Inflate the fetched range server-side and answer with the plain bytes.
async fn inflate_response(
    state: &AppState,
    resp: reqwest::Response,
    query: &ProxyQuery,
) -> Result<Response, AppError> {
    let declared = query
        .size
        .ok_or_else(|| AppError::BadRequest("inflate=1 requires size".into()))?;
    if declared > state.policy.proxy_max_response {
        return Err(AppError::TooLarge {
            size: declared,
            limit: state.policy.proxy_max_response,
        });
    }

    let compressed = resp
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let mut decoder = DeflateDecoder::new(&compressed[..]);
    let mut out = Vec::with_capacity(declared as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AppError::InflateFailed(e.to_string()))?;
    if out.len() as u64 != declared {
        return Err(AppError::InflateFailed(format!(
            "decompressed to {} bytes, expected {declared}",
            out.len()
        )));
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, out.len())
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if let Some(basename) = &query.download {
        builder = builder.header(
            header::CONTENT_DISPOSITION,
            attachment_disposition(basename),
        );
    }
    Ok(builder.body(Body::from(out)).unwrap())
}

/// Force a download response: status 200 even for a ranged upstream,
/// attachment disposition, no Content-Range.
fn download_response(resp: reqwest::Response, basename: &str) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_DISPOSITION, attachment_disposition(basename));

    if let Some(len) = resp.content_length() {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(ct) = resp.headers().get(header::CONTENT_TYPE) {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }

    builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap()
}

/// Handle `HEAD /proxy`.
///
/// Always answers with `X-File-Size` and `X-Range-Support` alongside the
/// standard headers, because some edge runtimes strip standard headers
/// from HEAD responses.
pub async fn proxy_head(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, AppError> {
    let url = upstream_url(&query)?;

    let mut total: Option<u64> = None;
    let mut ranges = false;
    let mut content_type: Option<HeaderValue> = None;

    let head = upstream_request(&state, reqwest::Method::HEAD, &url)
        .send()
        .await;

    match head {
        Ok(resp) if resp.status().is_success() => {
            total = resp.content_length();
            ranges = resp
                .headers()
                .get(header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.contains("bytes"));
            content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
        }
        other => {
            if let Err(e) = &other {
                warn!(%url, error = %e, "upstream HEAD failed, probing with ranged GET");
            }
            // HEAD refused; a one-byte ranged GET classifies the origin.
            let probe = upstream_request(&state, reqwest::Method::GET, &url)
                .header(header::RANGE, "bytes=0-0")
                .send()
                .await
                .map_err(|e| AppError::Upstream(e.to_string()))?;

            match probe.status().as_u16() {
                206 => {
                    ranges = true;
                    total = probe
                        .headers()
                        .get(header::CONTENT_RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.rsplit_once('/'))
                        .and_then(|(_, t)| t.parse().ok());
                }
                200 => {
                    total = probe.content_length();
                }
                status => {
                    return Err(AppError::Upstream(format!(
                        "origin answered {status} for {url}"
                    )));
                }
            }
            content_type = probe.headers().get(header::CONTENT_TYPE).cloned();
            // Dropping the probe aborts its body.
        }
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("x-range-support", if ranges { "true" } else { "false" });
    if let Some(len) = total {
        builder = builder
            .header(header::CONTENT_LENGTH, len)
            .header("x-file-size", len);
    }
    if ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    Ok(builder.body(Body::empty()).unwrap())
}

/// Handle `OPTIONS /proxy` (non-preflight; preflights are answered by
/// the CORS layer with the same contract).
pub async fn proxy_options() -> Response {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-methods", "GET, HEAD, OPTIONS")
        .header("access-control-allow-headers", "Range")
        .header(
            "access-control-expose-headers",
            "Content-Length, Content-Range, Accept-Ranges, Content-Disposition, X-File-Size, X-Range-Support",
        )
        .header("access-control-max-age", "86400")
        .body(Body::empty())
        .unwrap()
}

/// `attachment; filename="…"` with the basename percent-encoded.
fn attachment_disposition(basename: &str) -> String {
    let mut encoded = String::with_capacity(basename.len());
    for byte in basename.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    format!("attachment; filename=\"{encoded}\"")
}
