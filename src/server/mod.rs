//! Proxy and media relay server.
//!
//! Exposes the `/proxy` endpoint that lets a browser-hosted explorer
//! reach origins that refuse CORS or HEAD, and serves STORED entries as
//! seekable virtual files for media playback.

use axum::http::{HeaderName, Method};
use axum::routing::get;
use axum::Router;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::policy::Policy;

pub mod media;
pub mod proxy;

/// Shared state for the relay handlers.
pub struct AppState {
    /// Upstream HTTP client with connection pooling
    pub client: Client,
    /// Resource limits the relay enforces
    pub policy: Policy,
}

impl AppState {
    pub fn new(policy: Policy) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, policy })
    }
}

/// Create the relay router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([axum::http::header::RANGE])
        .expose_headers([
            axum::http::header::CONTENT_LENGTH,
            axum::http::header::CONTENT_RANGE,
            axum::http::header::ACCEPT_RANGES,
            axum::http::header::CONTENT_DISPOSITION,
            HeaderName::from_static("x-file-size"),
            HeaderName::from_static("x-range-support"),
        ])
        .max_age(Duration::from_secs(86_400));

    Router::new()
        .route(
            "/proxy",
            get(proxy::proxy_get)
                .head(proxy::proxy_head)
                .options(proxy::proxy_options),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and run the relay until interrupted.
pub async fn serve(bind: SocketAddr, policy: Policy) -> Result<()> {
    let state = Arc::new(AppState::new(policy)?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("relay listening on {}", bind);

    axum::serve(listener, app).await?;
    Ok(())
}
