//! HTTP API for recording units, sending single actions, and monitoring
//!
//! This is the surface the (out-of-scope) UI layer talks to. Depth counts
//! are reported separately per queue; combining them is the caller's
//! business.

use crate::config::ApiConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::tx::{AdmissionQueue, BatchQueue, Coalescer, RbfRequest, RbfSender};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coalescer: Arc<Coalescer>,
    pub queue: Arc<BatchQueue>,
    pub admission: Arc<AdmissionQueue>,
    pub rbf: Arc<RbfSender>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    coalescer: Arc<Coalescer>,
    queue: Arc<BatchQueue>,
    admission: Arc<AdmissionQueue>,
    rbf: Arc<RbfSender>,
) -> DispatchResult<()> {
    let state = AppState {
        coalescer,
        queue,
        admission,
        rbf,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/units", post(record_unit))
        .route("/actions", post(send_action))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Pipeline status with separate, precise depth counts
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        coalescer_pending_units: state.coalescer.pending_count(),
        dispatch_queue_depth: state.queue.queue_depth(),
        rbf_in_flight: state.admission.in_flight(),
        rbf_queued: state.admission.queue_depth(),
    })
}

/// Record one unit of work; it will be coalesced into a batch
async fn record_unit(State(state): State<AppState>) -> impl IntoResponse {
    state.coalescer.record_unit();
    (
        StatusCode::ACCEPTED,
        Json(RecordUnitResponse {
            pending_units: state.coalescer.pending_count(),
        }),
    )
}

/// Send a single latency-sensitive action through the RBF loop
async fn send_action(
    State(state): State<AppState>,
    Json(body): Json<ActionRequest>,
) -> impl IntoResponse {
    let request = match parse_action(&body) {
        Ok(request) => request,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ActionResponse::error(err.to_string())),
            )
        }
    };

    let rbf = state.rbf.clone();
    let result = state.admission.run(rbf.send(request, None)).await;

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ActionResponse {
                tx_hash: Some(format!("{:?}", outcome.tx_hash)),
                latency_ms: Some(outcome.latency.as_millis() as u64),
                attempts: Some(outcome.attempts),
                error: None,
            }),
        ),
        Err(DispatchError::DeadlineExceeded {
            attempts,
            last_hash,
        }) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ActionResponse {
                tx_hash: last_hash.map(|h| format!("{:?}", h)),
                latency_ms: None,
                attempts: Some(attempts),
                error: Some("deadline exceeded".to_string()),
            }),
        ),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(ActionResponse::error(err.to_string())),
        ),
    }
}

fn parse_action(body: &ActionRequest) -> DispatchResult<RbfRequest> {
    let to: Address = body
        .to
        .parse()
        .map_err(|_| DispatchError::InvalidRequest("invalid `to` address".to_string()))?;

    let value = U256::from_dec_str(&body.value_wei)
        .map_err(|_| DispatchError::InvalidRequest("invalid `value_wei`".to_string()))?;

    let data = match &body.data {
        Some(hex_data) => {
            let stripped = hex_data.trim_start_matches("0x");
            let bytes = hex::decode(stripped)
                .map_err(|_| DispatchError::InvalidRequest("invalid `data` hex".to_string()))?;
            Some(Bytes::from(bytes))
        }
        None => None,
    };

    Ok(RbfRequest {
        to,
        value,
        data,
        deadline: Duration::from_millis(body.deadline_ms.unwrap_or(0)),
    })
}

// Request/response types

#[derive(Deserialize)]
struct ActionRequest {
    to: String,
    value_wei: String,
    data: Option<String>,
    deadline_ms: Option<u64>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    coalescer_pending_units: u32,
    dispatch_queue_depth: usize,
    rbf_in_flight: usize,
    rbf_queued: usize,
}

#[derive(Serialize)]
struct RecordUnitResponse {
    pending_units: u32,
}

#[derive(Serialize)]
struct ActionResponse {
    tx_hash: Option<String>,
    latency_ms: Option<u64>,
    attempts: Option<u32>,
    error: Option<String>,
}

impl ActionResponse {
    fn error(message: String) -> Self {
        Self {
            tx_hash: None,
            latency_ms: None,
            attempts: None,
            error: Some(message),
        }
    }
}
