//! The lifecycle reconciliation engine.
//!
//! [`Engine`] ties the pieces together: webhook ingestion writes facts into
//! request ledgers, client polls trigger repairs from the provider when the
//! repair policy asks for one, and every fact change is announced on the
//! event stream.
//!
//! # Concurrency
//!
//! Ingestion and repair are independent writers of the same request
//! snapshots. Neither holds a lock across a provider call: a repair reads the
//! request, fetches from the provider, then re-reads the request and applies
//! the fetched facts to the fresh copy. Two writers racing on the same
//! snapshot resolve as last-writer-wins; the ledger never regresses a
//! completed attempt, and the next repair re-derives anything lost.

mod refresh;

use std::sync::{Arc, Mutex};

use chrono::Duration;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::ledger::{AttemptUpdate, RunStatus, Stage};
use crate::lifecycle::{CanonicalStatus, StatusClass};
use crate::metrics::{Cached, DEFAULT_SUMMARY_TTL_SECS, StatusSummary};
use crate::polling::{PollingConfig, polling_interval};
use crate::provider::{ProviderClient, ProviderError};
use crate::repair::{RepairDecision, RepairPolicy, needs_repair};
use crate::store::{
    DeliveryRecord, DeliveryStore, RequestStore, StoreError, StreamStore,
};
use crate::stream::{DEFAULT_STREAM_CAPACITY, EventStream, StreamEventKind, StreamRead};
use crate::types::{
    DeliveryId, NewRequest, RandomSource, RepoId, Request, RequestId, Sha, generate_request_id,
};
use crate::webhooks::{
    EventEffect, Outcome, SkipReason, WebhookEvent, apply_event, parse_payload, precheck,
    verify_signature,
};

pub use refresh::RefreshReport;

/// Attempts at drawing an unused request id before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request {0} not found")]
    NotFound(RequestId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cannot {action} request {id} while it is {status}")]
    Conflict {
        id: RequestId,
        status: CanonicalStatus,
        action: &'static str,
    },

    #[error("request {0} has no repository or branch")]
    MissingCoordinates(RequestId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider unavailable: {0}")]
    Upstream(#[from] ProviderError),
}

/// The storage the engine runs on.
#[derive(Clone)]
pub struct Stores {
    pub requests: Arc<dyn RequestStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub stream: Arc<dyn StreamStore>,
}

impl Stores {
    /// Uses one store for all three concerns.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RequestStore + DeliveryStore + StreamStore + 'static,
    {
        Stores {
            requests: store.clone(),
            deliveries: store.clone(),
            stream: store,
        }
    }
}

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub webhook_secret: Vec<u8>,
    pub destroy_workflow: String,
    pub polling: PollingConfig,
    pub repair: RepairPolicy,
    pub stream_capacity: usize,
    pub summary_ttl: Duration,
}

impl EngineSettings {
    pub fn new(webhook_secret: impl Into<Vec<u8>>) -> Self {
        EngineSettings {
            webhook_secret: webhook_secret.into(),
            destroy_workflow: "destroy.yml".to_string(),
            polling: PollingConfig::new(),
            repair: RepairPolicy::default(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            summary_ttl: Duration::seconds(DEFAULT_SUMMARY_TTL_SECS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        EngineSettings {
            webhook_secret: config.webhook_secret.clone(),
            destroy_workflow: config.destroy_workflow.clone(),
            polling: config.polling,
            repair: config.repair,
            stream_capacity: config.stream_capacity,
            summary_ttl: config.summary_ttl,
        }
    }
}

/// The lifecycle reconciliation engine.
pub struct Engine<P> {
    requests: Arc<dyn RequestStore>,
    deliveries: Arc<dyn DeliveryStore>,
    stream: EventStream,
    provider: P,
    clock: Arc<dyn Clock>,
    random: Mutex<Box<dyn RandomSource + Send>>,
    settings: EngineSettings,
}

impl<P: ProviderClient> Engine<P> {
    pub fn new(
        stores: Stores,
        provider: P,
        clock: Arc<dyn Clock>,
        random: Box<dyn RandomSource + Send>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        let stream = EventStream::open(stores.stream, clock.clone(), settings.stream_capacity)?;
        Ok(Engine {
            requests: stores.requests,
            deliveries: stores.deliveries,
            stream,
            provider,
            clock,
            random: Mutex::new(random),
            settings,
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ─── Webhook ingestion ────────────────────────────────────────────────────

    /// Processes one webhook delivery.
    ///
    /// The signature is checked before anything else and the delivery id
    /// before any mutation. A delivery is recorded only once its request has
    /// been saved, so a crash in between leads to reprocessing, which the
    /// ledger absorbs.
    pub fn record_webhook_event(
        &self,
        delivery_id: &DeliveryId,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<Outcome, EngineError> {
        if let Err(e) = verify_signature(raw_body, signature_header, &self.settings.webhook_secret)
        {
            warn!(delivery_id = %delivery_id, error = %e, "Rejected webhook signature");
            return Ok(Outcome::Rejected(e));
        }

        if self.deliveries.head(delivery_id)? {
            debug!(delivery_id = %delivery_id, "Duplicate delivery");
            return Ok(Outcome::Duplicate);
        }

        let event = match parse_payload(raw_body) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(skipped(delivery_id, SkipReason::UnsupportedEvent)),
            Err(e) => {
                warn!(delivery_id = %delivery_id, error = %e, "Malformed webhook payload");
                return Ok(Outcome::Skipped(SkipReason::MalformedPayload));
            }
        };
        if let Err(reason) = precheck(&event) {
            return Ok(skipped(delivery_id, reason));
        }

        let Some(mut request) = self.find_request_for(&event)? else {
            return Ok(skipped(delivery_id, SkipReason::UnknownRequest));
        };

        let now = self.clock.now();
        let effect = match apply_event(&mut request, &event, now) {
            Ok(effect) => effect,
            Err(reason) => return Ok(skipped(delivery_id, reason)),
        };

        if effect.needs_save() {
            self.requests.put(&request)?;
        }
        self.deliveries.put(&DeliveryRecord {
            delivery_id: delivery_id.clone(),
            request_id: request.id.clone(),
            processed_at: now,
        })?;

        let seq = match effect {
            EventEffect::Changed(kind) => {
                let status = request.status();
                Some(self.stream.append(request.id.clone(), kind, Some(status))?.seq)
            }
            EventEffect::Refreshed | EventEffect::Unchanged => None,
        };

        info!(
            delivery_id = %delivery_id,
            request_id = %request.id,
            status = %request.status(),
            changed = seq.is_some(),
            "Accepted webhook"
        );
        Ok(Outcome::Accepted {
            request_id: request.id,
            seq,
        })
    }

    /// Finds the request an event belongs to.
    ///
    /// Matches on repository plus either the request's branch or its merge
    /// commit. When several requests match, the newest wins.
    fn find_request_for(&self, event: &WebhookEvent) -> Result<Option<Request>, EngineError> {
        let repo = event.repo();
        let branch = event.branch();
        let head_sha = event.head_sha();

        let found = self
            .requests
            .find_candidates(repo, branch, head_sha)?
            .into_iter()
            .filter(|r| owns_event(r, repo, branch, head_sha))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    // ─── Status and polling ───────────────────────────────────────────────────

    pub fn get_request(&self, id: &RequestId) -> Result<Request, EngineError> {
        self.requests
            .get(id)?
            .ok_or_else(|| EngineError::NotFound(id.clone()))
    }

    /// Derives the request's status from its stored facts.
    pub fn canonical_status(&self, id: &RequestId) -> Result<CanonicalStatus, EngineError> {
        Ok(self.get_request(id)?.status())
    }

    pub fn repair_decision(&self, id: &RequestId) -> Result<RepairDecision, EngineError> {
        let request = self.get_request(id)?;
        Ok(needs_repair(&request, &self.settings.repair, self.clock.now()))
    }

    pub fn should_repair(&self, id: &RequestId) -> Result<bool, EngineError> {
        Ok(self.repair_decision(id)?.is_needed())
    }

    pub fn polling_interval(
        &self,
        status: CanonicalStatus,
        tab_hidden: bool,
        rate_limited: bool,
    ) -> std::time::Duration {
        polling_interval(status, tab_hidden, rate_limited, &self.settings.polling)
    }

    // ─── Event stream ─────────────────────────────────────────────────────────

    /// Announces a change on the stream and returns its sequence number.
    pub fn append_stream_event(
        &self,
        request_id: &RequestId,
        kind: StreamEventKind,
    ) -> Result<u64, EngineError> {
        Ok(self.stream.append(request_id.clone(), kind, None)?.seq)
    }

    pub fn read_stream(&self, since: u64) -> StreamRead {
        self.stream.read(since)
    }

    // ─── Request lifecycle ────────────────────────────────────────────────────

    pub fn create_request(&self, params: NewRequest) -> Result<Request, EngineError> {
        if params.project.trim().is_empty() || params.environment.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "project and environment are required".to_string(),
            ));
        }
        if params.branch.as_ref().is_some_and(|b| b.trim().is_empty()) {
            return Err(EngineError::InvalidRequest("branch must not be empty".to_string()));
        }

        let id = self.fresh_request_id()?;
        let request = Request::new(id, params, self.clock.now());
        self.requests.put(&request)?;
        self.stream.append(
            request.id.clone(),
            StreamEventKind::RequestCreated,
            Some(request.status()),
        )?;

        info!(request_id = %request.id, project = %request.project, environment = %request.environment, "Created request");
        Ok(request)
    }

    fn fresh_request_id(&self) -> Result<RequestId, EngineError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = {
                let mut random = self.random.lock().unwrap_or_else(|e| e.into_inner());
                generate_request_id(&mut **random)
            };
            if self.requests.get(&id)?.is_none() {
                return Ok(id);
            }
            warn!(request_id = %id, "Request id collision, drawing again");
        }
        Err(EngineError::InvalidRequest(
            "could not draw an unused request id".to_string(),
        ))
    }

    /// Records approval of the current plan. Approving twice is a no-op; a
    /// newer plan run returns the request to `plan_ready` and needs its own
    /// approval.
    pub fn record_approval(&self, id: &RequestId) -> Result<Request, EngineError> {
        let mut request = self.get_request(id)?;
        let status = request.status();
        match status {
            CanonicalStatus::PlanReady => {}
            CanonicalStatus::Approved => return Ok(request),
            _ => {
                return Err(EngineError::Conflict {
                    id: id.clone(),
                    status,
                    action: "approve",
                });
            }
        }

        request.approve(self.clock.now());
        self.requests.put(&request)?;
        self.stream.append(
            request.id.clone(),
            StreamEventKind::Approved,
            Some(request.status()),
        )?;

        info!(request_id = %request.id, "Recorded approval");
        Ok(request)
    }

    /// Dispatches the destroy workflow and records the pending attempt.
    ///
    /// Requesting a destroy that is already in flight is a no-op.
    pub async fn request_destroy(&self, id: &RequestId) -> Result<Request, EngineError> {
        let request = self.get_request(id)?;
        let status = request.status();
        match status {
            CanonicalStatus::Destroying | CanonicalStatus::Destroyed => return Ok(request),
            CanonicalStatus::Planning | CanonicalStatus::Applying => {
                return Err(EngineError::Conflict {
                    id: id.clone(),
                    status,
                    action: "destroy",
                });
            }
            _ => {}
        }
        let (Some(repo), Some(branch)) = (request.repo.clone(), request.branch.clone()) else {
            return Err(EngineError::MissingCoordinates(id.clone()));
        };

        self.provider
            .dispatch_workflow(&repo, &self.settings.destroy_workflow, &branch)
            .await?;

        // Re-read: a webhook may have landed while the dispatch was in flight.
        let mut request = self.get_request(id)?;
        let now = self.clock.now();
        request.destroy_requested_at = Some(now);
        if let Err(e) = request
            .ledger
            .record_attempt(AttemptUpdate::new(Stage::Destroy, now).status(RunStatus::Requested))
        {
            warn!(request_id = %id, error = %e, "Could not record destroy dispatch");
        }
        request.touch(now);
        self.requests.put(&request)?;
        self.stream.append(
            request.id.clone(),
            StreamEventKind::DestroyRequested,
            Some(request.status()),
        )?;

        info!(request_id = %id, workflow = %self.settings.destroy_workflow, "Requested destroy");
        Ok(request)
    }

    // ─── Aggregates ───────────────────────────────────────────────────────────

    /// Returns status counts, reusing `cache` while it is fresh.
    pub fn status_summary(
        &self,
        cache: Option<Cached<StatusSummary>>,
    ) -> Result<Cached<StatusSummary>, EngineError> {
        let now = self.clock.now();
        if let Some(cached) = cache {
            if cached.is_fresh(now) {
                return Ok(cached);
            }
        }

        let requests = self.requests.list()?;
        let summary = StatusSummary::from_statuses(requests.iter().map(Request::status));
        debug!(total = summary.total, "Recomputed status summary");
        Ok(Cached::new(summary, now, self.settings.summary_ttl))
    }
}

fn skipped(delivery_id: &DeliveryId, reason: SkipReason) -> Outcome {
    debug!(delivery_id = %delivery_id, reason = ?reason, "Skipped webhook");
    Outcome::Skipped(reason)
}

/// True when an event on `repo` at `branch`/`head_sha` concerns `request`.
fn owns_event(request: &Request, repo: &RepoId, branch: Option<&str>, head_sha: Option<&Sha>) -> bool {
    if branch.is_some_and(|b| request.tracks(repo, b)) {
        return true;
    }
    let in_repo = request.repo.as_ref().is_some_and(|r| r.matches(repo));
    in_repo
        && head_sha.is_some_and(|sha| {
            request
                .merge_sha
                .as_ref()
                .is_some_and(|m| m.as_str().eq_ignore_ascii_case(sha.as_str()))
        })
}

/// The status to report alongside a polling hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub request_id: RequestId,
    pub status: CanonicalStatus,
    pub class: StatusClass,
    pub poll_after_ms: u64,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_error: Option<String>,
}
