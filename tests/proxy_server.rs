//! Relay server tests: a real listener in front of a mock origin.

mod common;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use reqwest::StatusCode;
use std::io::Write;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{pseudo_random, sample_archive, RangeResponder};
use ziplens::server::{create_router, AppState};
use ziplens::{ArchiveHandle, Policy};

/// Bind the relay on an ephemeral port and return its base URL.
async fn start_relay(policy: Policy) -> String {
    let state = Arc::new(AppState::new(policy).unwrap());
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn start_origin(route: &str, data: Vec<u8>) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder::new(data))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn forwards_inbound_range_header() {
    let data = pseudo_random(1000);
    let origin = start_origin("/blob.bin", data.clone()).await;
    let relay = start_relay(Policy::default()).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[("url", format!("{}/blob.bin", origin.uri()))])
        .header("Range", "bytes=5-9")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 5-9/1000"
    );
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &data[5..=9]);
}

#[tokio::test]
async fn start_end_params_synthesize_a_range() {
    let data = pseudo_random(500);
    let origin = start_origin("/blob.bin", data.clone()).await;
    let relay = start_relay(Policy::default()).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[
            ("url", format!("{}/blob.bin", origin.uri())),
            ("start", "2".into()),
            ("end", "4".into()),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &data[2..=4]);
}

#[tokio::test]
async fn download_mode_forces_200_attachment() {
    let data = pseudo_random(500);
    let origin = start_origin("/blob.bin", data.clone()).await;
    let relay = start_relay(Policy::default()).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[
            ("url", format!("{}/blob.bin", origin.uri())),
            ("start", "10".into()),
            ("end", "19".into()),
            ("download", "part one.bin".into()),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-disposition").unwrap(),
        "attachment; filename=\"part%20one.bin\""
    );
    assert!(resp.headers().get("content-range").is_none());
    assert_eq!(resp.headers().get("content-length").unwrap(), "10");
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &data[10..=19]);
}

#[tokio::test]
async fn inflate_mode_decompresses_server_side() {
    let original = b"hello world hello world".to_vec();
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&original).unwrap();
    let compressed = encoder.finish().unwrap();

    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entry.deflate"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
        .mount(&origin)
        .await;
    let relay = start_relay(Policy::default()).await;

    let client = reqwest::Client::new();
    let url = format!("{}/entry.deflate", origin.uri());

    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[
            ("url", url.clone()),
            ("inflate", "1".into()),
            ("size", original.len().to_string()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap(), original);

    // A wrong declared size is a decompression failure, not a partial
    // answer.
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[("url", url), ("inflate", "1".into()), ("size", "999".into())])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn bad_requests_and_upstream_failures_map_to_contract_statuses() {
    let relay = start_relay(Policy::default()).await;
    let client = reqwest::Client::new();

    // Missing url
    let resp = client
        .get(format!("{relay}/proxy"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Unsupported scheme
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[("url", "ftp://example.com/a.zip")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Upstream 404 becomes 502 with a JSON error body
    let origin = MockServer::start().await;
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[("url", format!("{}/missing.zip", origin.uri()))])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert!(resp.text().await.unwrap().contains("error"));
}

#[tokio::test]
async fn oversized_upstream_is_rejected_with_413() {
    let data = pseudo_random(2000);
    let origin = start_origin("/big.bin", data).await;
    let relay = start_relay(Policy::default().with_proxy_max_response(100)).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{relay}/proxy"))
        .query(&[("url", format!("{}/big.bin", origin.uri()))])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn head_synthesizes_capability_headers() {
    let data = pseudo_random(1234);
    let origin = start_origin("/probe.bin", data).await;
    let relay = start_relay(Policy::default()).await;

    // The origin has no HEAD route; the relay must classify it with a
    // one-byte ranged GET and still answer the HEAD.
    let client = reqwest::Client::new();
    let resp = client
        .head(format!("{relay}/proxy"))
        .query(&[("url", format!("{}/probe.bin", origin.uri()))])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-range-support").unwrap(), "true");
    assert_eq!(resp.headers().get("x-file-size").unwrap(), "1234");
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
}

#[tokio::test]
async fn options_advertises_cors_contract() {
    let relay = start_relay(Policy::default()).await;
    let client = reqwest::Client::new();
    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{relay}/proxy"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get("access-control-allow-methods").unwrap(),
        "GET, HEAD, OPTIONS"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-headers").unwrap(),
        "Range"
    );
    assert_eq!(
        resp.headers().get("access-control-max-age").unwrap(),
        "86400"
    );
}

// ---------------------------------------------------------------------------
// Media gateway
// ---------------------------------------------------------------------------

async fn media_request(
    relay: &str,
    origin_url: &str,
    range: Option<&str>,
) -> reqwest::Response {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{relay}/proxy")).query(&[
        ("url", origin_url.to_string()),
        ("media", "1".into()),
        ("type", "video/mp4".into()),
        ("start", "1000".into()),
        ("end", "1499".into()),
    ]);
    if let Some(range) = range {
        req = req.header("Range", range);
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn media_gateway_remaps_relative_ranges() {
    let data = pseudo_random(2000);
    let origin = start_origin("/movie.mp4", data.clone()).await;
    let relay = start_relay(Policy::default()).await;
    let url = format!("{}/movie.mp4", origin.uri());

    let resp = media_request(&relay, &url, Some("bytes=100-199")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 100-199/500"
    );
    assert_eq!(resp.headers().get("content-length").unwrap(), "100");
    assert_eq!(resp.headers().get("content-type").unwrap(), "video/mp4");
    assert_eq!(resp.headers().get("accept-ranges").unwrap(), "bytes");
    assert_eq!(
        resp.headers().get("cache-control").unwrap(),
        "max-age=3600, immutable"
    );
    // The virtual file starts at absolute offset 1000.
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &data[1100..=1199]);
}

#[tokio::test]
async fn media_gateway_serves_full_file_without_range() {
    let data = pseudo_random(2000);
    let origin = start_origin("/movie.mp4", data.clone()).await;
    let relay = start_relay(Policy::default()).await;
    let url = format!("{}/movie.mp4", origin.uri());

    let resp = media_request(&relay, &url, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "500");
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &data[1000..=1499]);
}

#[tokio::test]
async fn media_gateway_clamps_and_tolerates_bad_ranges() {
    let data = pseudo_random(2000);
    let origin = start_origin("/movie.mp4", data.clone()).await;
    let relay = start_relay(Policy::default()).await;
    let url = format!("{}/movie.mp4", origin.uri());

    // End past the virtual file is truncated, not rejected.
    let resp = media_request(&relay, &url, Some("bytes=400-9999")).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 400-499/500"
    );

    // A syntactically invalid Range is treated as a full-file request.
    let resp = media_request(&relay, &url, Some("bytes=zz")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-length").unwrap(), "500");
}

// ---------------------------------------------------------------------------
// Engine through the relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_explores_an_origin_reachable_only_via_relay() {
    let archive = sample_archive();
    let origin = start_origin("/pkg.zip", archive).await;
    let relay = start_relay(Policy::default()).await;

    // The origin refuses HEAD (no route), so the direct probe fails and
    // the engine demotes to the relay, which classifies the origin and
    // forwards every ranged read.
    let url = format!("{}/pkg.zip", origin.uri());
    let policy = Policy::default().with_range_parse_threshold(0);
    let handle = ArchiveHandle::open_url(&url, Some(&relay), policy)
        .await
        .unwrap();

    assert!(handle.is_proxied());
    assert_eq!(handle.entries().len(), 4);

    let readme = handle.extract("README.md").await.unwrap();
    assert_eq!(&readme[..], b"# sample project\n");

    let media_url = handle.stream_url("assets/noise.bin").await.unwrap();
    // noise.bin was re-compressed, so no media URL for it.
    assert!(media_url.is_none());

    let download_url = handle.proxy_download_url("README.md").await.unwrap().unwrap();
    assert!(download_url.contains("download=README.md"));
    assert!(download_url.contains("inflate=1"));
}
