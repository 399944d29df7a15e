//! Request endpoints: creation, inspection, polling, and actions.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::AppState;
use crate::engine::{EngineError, StatusView};
use crate::lifecycle::CanonicalStatus;
use crate::metrics::{Cached, StatusSummary};
use crate::provider::ProviderClient;
use crate::stream::StreamRead;
use crate::types::{NewRequest, Request, RequestId};

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::MissingCoordinates(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Upstream(e) if e.is_rate_limited() => StatusCode::TOO_MANY_REQUESTS,
            EngineError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }

        (status, self.to_string()).into_response()
    }
}

/// A request as served: its stored facts plus the derived status.
#[derive(Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: Request,
    pub status: CanonicalStatus,
}

impl From<Request> for RequestView {
    fn from(request: Request) -> Self {
        let status = request.status();
        RequestView { request, status }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    /// The client is not visible (background tab or process).
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub since: u64,
}

/// `POST /api/v1/requests`
pub async fn create_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Json(params): Json<NewRequest>,
) -> Result<(StatusCode, Json<RequestView>), EngineError> {
    let request = app_state.engine().create_request(params)?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

/// `GET /api/v1/requests/{id}`
pub async fn get_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<Json<RequestView>, EngineError> {
    let request = app_state.engine().get_request(&RequestId::new(id))?;
    Ok(Json(request.into()))
}

/// Status polling handler.
///
/// Repairs the request from the provider when the repair policy asks for it,
/// then returns the derived status with the interval the client should wait
/// before polling again (`0` once the request is terminal).
///
/// # Example
///
/// ```ignore
/// GET /api/v1/requests/k3m9x2p7qrst/status?hidden=false HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {
///   "request_id": "k3m9x2p7qrst",
///   "status": "applying",
///   "class": "active",
///   "poll_after_ms": 5000,
///   "rate_limited": false
/// }
/// ```
pub async fn status_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Path(id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusView>, EngineError> {
    let view = app_state
        .engine()
        .poll_status(&RequestId::new(id), query.hidden)
        .await?;
    Ok(Json(view))
}

/// `POST /api/v1/requests/{id}/approve`
pub async fn approve_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<Json<RequestView>, EngineError> {
    let request = app_state.engine().record_approval(&RequestId::new(id))?;
    Ok(Json(request.into()))
}

/// `POST /api/v1/requests/{id}/destroy`
///
/// Returns 202: the destroy workflow has been dispatched, not finished.
pub async fn destroy_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RequestView>), EngineError> {
    let request = app_state
        .engine()
        .request_destroy(&RequestId::new(id))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(request.into())))
}

/// `GET /api/v1/stream?since=N`
pub async fn stream_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
    Query(query): Query<StreamQuery>,
) -> Json<StreamRead> {
    Json(app_state.engine().read_stream(query.since))
}

/// `GET /api/v1/summary`
pub async fn summary_handler<P: ProviderClient>(
    State(app_state): State<AppState<P>>,
) -> Result<Json<Cached<StatusSummary>>, EngineError> {
    Ok(Json(app_state.summary()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::test_utils::sample_request;

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (
                EngineError::NotFound(RequestId::new("x")),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::MissingCoordinates(RequestId::new("x")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::Upstream(ProviderError::rate_limited("slow down")),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                EngineError::Upstream(ProviderError::transient("502 from upstream")),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn request_view_flattens_facts_and_status() {
        let view = RequestView::from(sample_request("req1"));
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["id"], "req1");
        assert_eq!(json["branch"], "tf/req1");
        assert_eq!(json["status"], "created");
    }
}
