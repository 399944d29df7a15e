//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries and hands them to the engine, which
//! verifies the signature, deduplicates, and records the facts on the
//! matching request before the handler answers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::AppState;
use crate::engine::EngineError;
use crate::provider::ProviderClient;
use crate::types::{DeliveryId, RequestId};
use crate::webhooks::{Outcome, SignatureError, SkipReason};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Invalid signature.
    #[error("invalid signature: {0}")]
    InvalidSignature(SignatureError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            WebhookError::MissingHeader(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            WebhookError::InvalidSignature(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            WebhookError::Engine(e) => e.into_response(),
        }
    }
}

/// Acknowledgement body for a processed delivery.
#[derive(Debug, Serialize)]
pub struct WebhookReceipt {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Delivery`: Unique delivery ID (UUID format)
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload (`workflow_run` or `pull_request`)
///
/// # Response
///
/// - 202 Accepted: processed, duplicate, or skipped (see the receipt's `outcome`)
/// - 400 Bad Request: Missing delivery ID
/// - 401 Unauthorized: Missing or invalid signature
/// - 500 Internal Server Error: Store failure
///
/// # Example
///
/// ```ignore
/// POST /webhook HTTP/1.1
/// X-GitHub-Event: workflow_run
/// X-GitHub-Delivery: 550e8400-e29b-41d4-a716-446655440000
/// X-Hub-Signature-256: sha256=...
/// Content-Type: application/json
///
/// {"action": "completed", "workflow_run": {...}, "repository": {...}}
///
/// HTTP/1.1 202 Accepted
///
/// {"outcome": "accepted", "request_id": "k3m9x2p7qrst", "seq": 1700000060000}
/// ```
pub async fn webhook_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookReceipt>), WebhookError> {
    let delivery_id = DeliveryId::new(
        header_str(&headers, HEADER_DELIVERY).ok_or(WebhookError::MissingHeader(HEADER_DELIVERY))?,
    );
    let signature = header_str(&headers, HEADER_SIGNATURE);

    debug!(
        delivery_id = %delivery_id,
        event_type = header_str(&headers, HEADER_EVENT).unwrap_or("unknown"),
        "Received webhook"
    );

    let outcome = app_state
        .engine()
        .record_webhook_event(&delivery_id, &body, signature)?;

    let label = outcome.label();
    let receipt = match outcome {
        Outcome::Rejected(e) => return Err(WebhookError::InvalidSignature(e)),
        Outcome::Accepted { request_id, seq } => WebhookReceipt {
            outcome: label,
            request_id: Some(request_id),
            seq,
            reason: None,
        },
        Outcome::Duplicate => WebhookReceipt {
            outcome: label,
            request_id: None,
            seq: None,
            reason: None,
        },
        Outcome::Skipped(reason) => WebhookReceipt {
            outcome: label,
            request_id: None,
            seq: None,
            reason: Some(reason),
        },
    };

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// Returns a header value if present and valid UTF-8.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
