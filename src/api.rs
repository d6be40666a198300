//! HTTP API for the local review daemon.
//!
//! A companion UI posts pairing QR codes and relay requests here and gets
//! back hashes plus the simulated asset changes.

use crate::error::{DecryptionError, RelayError, ReviewError};
use crate::normalizer::RelayRequest;
use crate::relay::{PairOutcome, RelayClient};
use crate::review::{ReviewOutcome, Reviewer};

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub reviewer: Reviewer,
    pub relay: RelayClient,
}

// ── Request/Response Types ──────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub paired: bool,
}

#[derive(Deserialize)]
pub struct PairRequest {
    /// Raw JSON text scanned from the QR code.
    pub qr: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// Review-boundary error rendered as `{error, kind, code}`.
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        let status = match &err {
            ReviewError::Decryption(DecryptionError::NoKey) => StatusCode::PRECONDITION_FAILED,
            ReviewError::Decryption(_) | ReviewError::Payload(_) | ReviewError::Hash(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ReviewError::Relay(RelayError::InvalidQr(_))
            | ReviewError::Relay(RelayError::Key(_)) => StatusCode::BAD_REQUEST,
            ReviewError::Relay(_) | ReviewError::Simulation(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError {
            status,
            body: ErrorBody {
                error: err.user_message(),
                kind: err.kind(),
                code: err.code(),
            },
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ReviewError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        paired: state.reviewer.cipher().key_slot().is_provisioned(),
    })
}

/// POST /pair
async fn pair(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PairRequest>,
) -> Result<Json<PairOutcome>, ApiError> {
    let outcome = state.relay.pair(&req.qr, state.reviewer.cipher().key_slot()).await?;
    Ok(Json(outcome))
}

/// POST /review. A review overtaken by a newer one answers 409.
async fn review(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RelayRequest>,
) -> Result<Json<ReviewOutcome>, ApiError> {
    match state.reviewer.review_latest(&request).await {
        Some(result) => Ok(Json(result?)),
        None => Err(ApiError {
            status: StatusCode::CONFLICT,
            body: ErrorBody {
                error: "A newer review replaced this one.".into(),
                kind: "superseded",
                code: None,
            },
        }),
    }
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/pair", post(pair))
        .route("/review", post(review))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{KeySlot, PayloadCipher};
    use crate::config::RpcEndpoints;
    use crate::events::EventInterpreter;
    use crate::hash::HashEngine;
    use crate::normalizer::TransactionNormalizer;
    use crate::rpc::RpcClient;
    use crate::simulation::SimulationGateway;
    use crate::tokens::StaticSource;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let reviewer = Reviewer::new(
            PayloadCipher::new(Arc::new(KeySlot::new())),
            TransactionNormalizer::default(),
            HashEngine::default(),
            Arc::new(SimulationGateway::new(
                RpcClient::default(),
                RpcEndpoints::new("http://127.0.0.1:9"),
            )),
            EventInterpreter::new(Arc::new(StaticSource::new())),
        );
        Arc::new(AppState {
            reviewer,
            relay: RelayClient::new(reqwest::Client::new(), "http://127.0.0.1:9", None),
        })
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_unpaired() {
        let resp = build_router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["paired"], false);
    }

    #[tokio::test]
    async fn test_review_without_key_is_precondition_failed() {
        let request = json!({
            "request_id": "req-1",
            "request_type": "eip712",
            "content": "AAAA",
            "from_device": "extension",
            "creation_date": "2025-03-01T12:00:00Z"
        });
        let resp = build_router(state()).oneshot(post_json("/review", request)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PRECONDITION_FAILED);
        let json = body_json(resp).await;
        assert_eq!(json["kind"], "decryption");
        assert!(json["error"].as_str().unwrap().contains("not paired"));
    }

    #[tokio::test]
    async fn test_pair_with_bad_qr_is_bad_request() {
        let resp = build_router(state())
            .oneshot(post_json("/pair", json!({ "qr": "{\"app\":\"lucid\"}" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["kind"], "relay");
    }
}
