//! Webhook ingestion.
//!
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Payload parsing for `workflow_run` and `pull_request` events
//! - Folding parsed events into requests

pub mod ingest;
pub mod payload;
pub mod signature;

pub use ingest::{EventEffect, Outcome, SkipReason, apply_event, precheck};
pub use payload::{
    PayloadError, PullRequestChange, PullRequestEvent, WebhookEvent, WorkflowRunEvent,
    parse_payload,
};
pub use signature::{
    SignatureError, compute_signature, format_signature_header, parse_signature_header,
    verify_signature,
};
