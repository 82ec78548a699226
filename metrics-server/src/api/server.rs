//! API server setup and configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::compression::predicate::SizeAbove;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::{middleware, routes};
use crate::error::Result;
use crate::storage::MetricStore;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Listen address, `host:port`
    pub address: String,
    /// Maximum accepted request body, in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            body_limit: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    /// Shared signing key; requests and responses are signed when set.
    pub sign_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self {
            store,
            sign_key: None,
        }
    }

    pub fn with_sign_key(mut self, key: Option<String>) -> Self {
        self.sign_key = key.filter(|k| !k.is_empty()).map(Arc::from);
        self
    }
}

/// Build the router with all middleware and routes.
///
/// Layer order, outermost first: body limit, tracing, signature check,
/// response compression, request decompression. The signature is checked
/// over the body as received and the response is signed over the bytes
/// actually sent.
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    routes::create_router(state.clone())
        .layer(RequestDecompressionLayer::new())
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(0)))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::verify_signature,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    if req.uri().path() == "/ping" {
                        Span::none()
                    } else {
                        let mut make_span =
                            tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO);
                        use tower_http::trace::MakeSpan;
                        make_span.make_span(req)
                    }
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                ),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            state,
            cancel_token,
        }
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self) -> Result<()> {
        let router = build_router(self.state.clone(), self.config.body_limit);
        let listener = TcpListener::bind(&self.config.address).await?;
        let local_addr = listener.local_addr()?;

        tracing::info!("API server listening on http://{}", local_addr);

        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("API server shutting down...");
            })
            .await?;

        Ok(())
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
