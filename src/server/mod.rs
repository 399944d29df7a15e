//! HTTP server for the lifecycle service.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, validates signatures, and records their
//!   facts on the matching request
//! - Exposes request creation, status polling, approval, and destroy
//! - Serves the change stream and the cached status summary
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries (returns 202 Accepted)
//! - `POST /api/v1/requests` - Creates a request
//! - `GET /api/v1/requests/{id}` - Returns a request with its derived status
//! - `GET /api/v1/requests/{id}/status?hidden=bool` - Repairs if needed and
//!   returns the status with a polling hint
//! - `POST /api/v1/requests/{id}/approve` - Records plan approval
//! - `POST /api/v1/requests/{id}/destroy` - Dispatches the destroy workflow
//! - `GET /api/v1/stream?since=N` - Change notifications after `N`
//! - `GET /api/v1/summary` - Status counts, cached
//! - `GET /health` - Returns 200 if server is running

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::routing::{get, post};

use crate::engine::Engine;
use crate::metrics::{Cached, StatusSummary};
use crate::provider::ProviderClient;

pub mod health;
pub mod requests;
pub mod webhook;

pub use health::health_handler;
pub use requests::{
    approve_handler, create_handler, destroy_handler, get_handler, status_handler,
    stream_handler, summary_handler,
};
pub use webhook::webhook_handler;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<P> {
    engine: Arc<Engine<P>>,
    summary: Arc<Mutex<Option<Cached<StatusSummary>>>>,
}

impl<P> Clone for AppState<P> {
    fn clone(&self) -> Self {
        AppState {
            engine: self.engine.clone(),
            summary: self.summary.clone(),
        }
    }
}

impl<P: ProviderClient> AppState<P> {
    pub fn new(engine: Arc<Engine<P>>) -> Self {
        AppState {
            engine,
            summary: Arc::new(Mutex::new(None)),
        }
    }

    pub fn engine(&self) -> &Engine<P> {
        &self.engine
    }

    /// Returns the status summary, recomputing it once the cached copy
    /// expires.
    pub fn summary(&self) -> Result<Cached<StatusSummary>, crate::engine::EngineError> {
        let mut slot = self.summary.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = self.engine.status_summary(slot.take())?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<P: ProviderClient + 'static>(app_state: AppState<P>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler::<P>))
        .route("/api/v1/requests", post(create_handler::<P>))
        .route("/api/v1/requests/{id}", get(get_handler::<P>))
        .route("/api/v1/requests/{id}/status", get(status_handler::<P>))
        .route("/api/v1/requests/{id}/approve", post(approve_handler::<P>))
        .route("/api/v1/requests/{id}/destroy", post(destroy_handler::<P>))
        .route("/api/v1/stream", get(stream_handler::<P>))
        .route("/api/v1/summary", get(summary_handler::<P>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
