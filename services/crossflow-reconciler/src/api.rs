//! Read-only query API plus the batch intake endpoint
//!
//! Reads are projections of the store and the accumulator's in-memory
//! trees; an absent transfer or proof is an explicit non-existent answer,
//! never a 5xx. `POST /api/v1/batches` is the in-process face of the
//! message transport: the response is the batch's ack.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crossflow_db::{
    DbError, DbTransaction, PairingRepo, PgStore, TransactionRepo, TransferFilter,
};
use crossflow_spv::{MerkleAccumulator, MerkleLeaf, TreeKind};
use crossflow_types::Transaction;

use crate::contract::InProcessRootRegistry;
use crate::ingest::IngestQueue;

pub type Accumulator = MerkleAccumulator<PgStore, InProcessRootRegistry>;

pub struct ApiState {
    pub transactions: TransactionRepo,
    pub pairings: PairingRepo,
    pub accumulator: Arc<Accumulator>,
    pub queue: IngestQueue,
}

/// API errors
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/transfers", get(list_transfers))
        .route("/api/v1/transfers/:chain_id/:hash", get(get_transfer))
        .route("/api/v1/proof/:chain_id/:kind/:hash", get(get_proof))
        .route("/api/v1/roots/:chain_id", get(get_roots))
        .route("/api/v1/batches", post(post_batch))
        .route("/api/v1/refunds/:id", post(post_refund))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    address: Option<String>,
    side: Option<i16>,
    status: Option<i16>,
    page: Option<i64>,
    per_page: Option<i64>,
}

async fn list_transfers(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<DbTransaction>>, ApiError> {
    let filter = TransferFilter {
        address: query.address,
        side: query.side,
        status: query.status,
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(50),
    };
    Ok(Json(state.transactions.list(&filter).await?))
}

async fn get_transfer(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, hash)): Path<(i32, String)>,
) -> Result<Json<DbTransaction>, ApiError> {
    state
        .transactions
        .find_by_hash(chain_id, &hash)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("transfer {chain_id}/{hash} does not exist")))
}

#[derive(Debug, Serialize)]
struct ProofStepBody {
    is_left: bool,
    hash: String,
}

#[derive(Debug, Serialize)]
struct ProofBody {
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    leaf: Option<String>,
    proof: Vec<ProofStepBody>,
}

fn parse_kind(kind: &str) -> Result<TreeKind, ApiError> {
    match kind {
        "user" => Ok(TreeKind::UserTx),
        "maker" => Ok(TreeKind::MakerTx),
        other => Err(ApiError::BadRequest(format!(
            "unknown tree kind {other:?}; expected user or maker"
        ))),
    }
}

/// SPV inclusion proof for one transfer, located by its hash. Absence of
/// the transfer, the tree, or the leaf all answer `exists: false`.
async fn get_proof(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, kind, hash)): Path<(u32, String, String)>,
) -> Result<Json<ProofBody>, ApiError> {
    let kind = parse_kind(&kind)?;
    let absent = ProofBody {
        exists: false,
        root: None,
        leaf: None,
        proof: Vec::new(),
    };

    let Some(row) = state.transactions.find_by_hash(chain_id as i32, &hash).await? else {
        return Ok(Json(absent));
    };
    let expect_value = state
        .pairings
        .find_by_transaction(row.id)
        .await?
        .map(|p| p.expect_value)
        .unwrap_or_else(|| row.value.clone());

    let tx: Transaction = row.into();
    let leaf = MerkleLeaf::from_transaction(&tx, &expect_value).hash();
    let Some(proof) = state.accumulator.proof(chain_id, kind, &leaf) else {
        return Ok(Json(absent));
    };

    Ok(Json(ProofBody {
        exists: true,
        root: state.accumulator.root_hex(chain_id, kind),
        leaf: Some(hex::encode(leaf)),
        proof: proof
            .into_iter()
            .map(|step| ProofStepBody {
                is_left: step.is_left,
                hash: hex::encode(step.hash),
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct RootsBody {
    chain_id: u32,
    user_root: Option<String>,
    maker_root: Option<String>,
    user_leaves: usize,
    maker_leaves: usize,
}

async fn get_roots(
    State(state): State<Arc<ApiState>>,
    Path(chain_id): Path<u32>,
) -> Json<RootsBody> {
    Json(RootsBody {
        chain_id,
        user_root: state.accumulator.root_hex(chain_id, TreeKind::UserTx),
        maker_root: state.accumulator.root_hex(chain_id, TreeKind::MakerTx),
        user_leaves: state.accumulator.leaf_count(chain_id, TreeKind::UserTx),
        maker_leaves: state.accumulator.leaf_count(chain_id, TreeKind::MakerTx),
    })
}

#[derive(Debug, Serialize)]
struct BatchAck {
    accepted: bool,
}

/// Transport intake: the response carries the batch's ack. A `503` tells
/// the transport to redeliver.
async fn post_batch(
    State(state): State<Arc<ApiState>>,
    payload: String,
) -> Result<Json<BatchAck>, ApiError> {
    let ack = state
        .queue
        .deliver(payload)
        .await
        .ok_or_else(|| ApiError::Unavailable("intake is shut down".into()))?;
    match ack.await {
        Ok(true) => Ok(Json(BatchAck { accepted: true })),
        Ok(false) | Err(_) => Err(ApiError::Unavailable(
            "batch was not fully processed; redeliver".into(),
        )),
    }
}

async fn post_refund(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.transactions.mark_refunded(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
