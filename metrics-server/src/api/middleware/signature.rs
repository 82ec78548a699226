//! Body signature check for requests and signing for responses.
//!
//! Active only when the service has a signing key. A request with a body must
//! carry `HashSHA256: hex(sha256(body || key))`, computed over the body as it
//! was sent (still compressed if it was). Responses get the same header over
//! their bytes on the wire.

use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics_model::sign::{self, SIGNATURE_HEADER};
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// Middleware function verifying request signatures and signing responses.
pub async fn verify_signature(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = state.sign_key.clone() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    // Size is already bounded by the outer body limit layer.
    let bytes = match body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return ApiError::bad_request("unreadable request body").into_response();
        }
    };

    if !bytes.is_empty() {
        let provided = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        match provided {
            Some(signature) if sign::verify(&bytes, &key, signature) => {}
            Some(_) => {
                warn!(path = %parts.uri.path(), "Request signature mismatch");
                return ApiError::bad_request("wrong signature").into_response();
            }
            None => {
                warn!(path = %parts.uri.path(), "Missing request signature");
                return ApiError::bad_request("wrong signature").into_response();
            }
        }
    }

    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;
    sign_response(response, &key).await
}

async fn sign_response(response: Response, key: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to buffer response for signing");
            return ApiError::internal("failed to sign response").into_response();
        }
    };

    if !bytes.is_empty()
        && let Ok(value) = HeaderValue::from_str(&sign::sign(&bytes, key))
    {
        parts
            .headers
            .insert(HeaderName::from_static(SIGNATURE_HEADER), value);
    }

    Response::from_parts(parts, Body::from(bytes))
}
