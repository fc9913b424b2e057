//! Media gateway: serve a STORED entry as a seekable virtual file.
//!
//! A media player addresses the entry as if it were a standalone
//! resource of size `V`; the gateway remaps the player's relative
//! offsets onto the absolute span `[data_start, data_end]` inside the
//! enclosing archive and relays the origin's partial responses.
//! DEFLATE entries cannot be served this way; decoding is not
//! random-access.

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use tracing::debug;

use super::proxy::{upstream_request, upstream_url, AppError, ProxyQuery};
use super::AppState;

/// Cache policy for gateway responses; the minted URL is scoped to one
/// archive, so its content never changes.
const CACHE_CONTROL: &str = "max-age=3600, immutable";

/// Handle `GET /proxy?media=1&type=…&start=…&end=…`.
pub async fn serve_media(
    state: &AppState,
    query: &ProxyQuery,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let url = upstream_url(query)?;
    let (Some(data_start), Some(data_end)) = (query.start, query.end) else {
        return Err(AppError::BadRequest(
            "media=1 requires start and end".into(),
        ));
    };
    if data_end < data_start {
        return Err(AppError::BadRequest("end precedes start".into()));
    }
    let mime = query
        .mime
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());

    // Size of the virtual file the player believes it is reading.
    let virtual_size = data_end - data_start + 1;

    let relative = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_relative_range(v, virtual_size));

    let (rel_start, rel_end) = relative.unwrap_or((0, virtual_size - 1));
    let abs_start = data_start + rel_start;
    let abs_end = data_start + rel_end;

    debug!(
        %url,
        rel_start, rel_end, abs_start, abs_end, "remapping media range"
    );

    let resp = upstream_request(state, reqwest::Method::GET, &url)
        .header(header::RANGE, format!("bytes={abs_start}-{abs_end}"))
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    if resp.status().as_u16() != 206 {
        return Err(AppError::Upstream(format!(
            "origin cannot serve ranges for media playback (answered {})",
            resp.status()
        )));
    }

    let ranged = relative.is_some();
    let mut builder = Response::builder()
        .status(if ranged {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(header::CONTENT_TYPE, mime)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .header(header::CONTENT_LENGTH, rel_end - rel_start + 1);

    if ranged {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {rel_start}-{rel_end}/{virtual_size}"),
        );
    }

    Ok(builder
        .body(Body::from_stream(resp.bytes_stream()))
        .unwrap())
}

/// Parse a `Range` header relative to a virtual file of `virtual_size`
/// bytes.
///
/// Missing start or end bounds default to `0` and `virtual_size - 1`;
/// an end past the virtual file is truncated, not rejected. Returns
/// `None` for syntactically invalid headers (the caller treats that as
/// an unranged full-file request) and for empty ranges that cannot be
/// clamped into the file.
fn parse_relative_range(value: &str, virtual_size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    // Only the first range of a multi-range request is honored.
    let spec = spec.split(',').next()?.trim();
    let (left, right) = spec.split_once('-')?;

    let start: u64 = if left.is_empty() {
        0
    } else {
        left.trim().parse().ok()?
    };
    let end: u64 = if right.is_empty() {
        virtual_size - 1
    } else {
        right.trim().parse().ok()?
    };

    let end = end.min(virtual_size - 1);
    if start > end {
        return None;
    }
    Some((start, end))
}
