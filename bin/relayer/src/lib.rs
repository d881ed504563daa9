//! Development relayer.
//!
//! Serves the relayer endpoints over an in-memory [`MemoryRelayer`]. Every
//! response body is `{ "error": bool, "payload": ... }`.
//!
//! Public keys are registered through `POST /relayer/identities` instead of
//! being resolved from a name system.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use nomad::crypto::IdentityPublicKey;
use nomad::identity::Identity;
use nomad::log::{BlobInfo, CommitRequest, PrecommitRequest, RefHash};
use nomad::relayer::{IdentityRegistration, MemoryRelayer, RecordLookup, Relayer, RelayerResponse};
use nomad::NomadError;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Shared relayer state.
pub type SharedRelayer = Arc<MemoryRelayer>;

type Reply = (StatusCode, Json<RelayerResponse>);

fn ok(payload: impl serde::Serialize) -> Reply {
    (StatusCode::OK, Json(RelayerResponse::success(payload)))
}

fn fail(err: NomadError) -> Reply {
    let status = match err {
        NomadError::RemoteRejected(_) | NomadError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, "request refused");
    (status, Json(RelayerResponse::from(err)))
}

/// Builds the router.
pub fn router(relayer: SharedRelayer) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/blob/:name/info", get(blob_info))
        .route("/relayer/precommit", post(precommit))
        .route("/relayer/commit", post(commit))
        .route("/relayer/records/:refhash", get(record_exists))
        .route("/relayer/identities", post(register_identity))
        .layer(TraceLayer::new_for_http())
        .with_state(relayer)
}

async fn health_check() -> Reply {
    ok("ok")
}

#[instrument(skip(relayer))]
async fn blob_info(State(relayer): State<SharedRelayer>, Path(name): Path<String>) -> Reply {
    let identity = match Identity::from_username(&name) {
        Ok(identity) => identity,
        Err(e) => return fail(e),
    };
    match relayer.blob_offset(&identity).await {
        Ok(offset) => ok(BlobInfo { offset }),
        Err(e) => fail(e),
    }
}

#[instrument(skip_all, fields(tld = %request.tld, offset = request.offset))]
async fn precommit(
    State(relayer): State<SharedRelayer>,
    Json(request): Json<PrecommitRequest>,
) -> Reply {
    match relayer.precommit(&request).await {
        Ok(result) => ok(result),
        Err(e) => fail(e),
    }
}

#[instrument(skip_all, fields(tld = %request.tld, offset = request.offset))]
async fn commit(
    State(relayer): State<SharedRelayer>,
    Json(request): Json<CommitRequest>,
) -> Reply {
    match relayer.commit(&request).await {
        Ok(result) => ok(result),
        Err(e) => fail(e),
    }
}

/// Query of `GET /relayer/records/:refhash`.
#[derive(Debug, Deserialize)]
struct RecordQuery {
    tld: String,
    #[serde(default)]
    subdomain: String,
}

#[instrument(skip(relayer))]
async fn record_exists(
    State(relayer): State<SharedRelayer>,
    Path(refhash): Path<String>,
    Query(query): Query<RecordQuery>,
) -> Reply {
    match lookup_record(&relayer, &query, &refhash).await {
        Ok(exists) => ok(RecordLookup { exists }),
        Err(e) => fail(e),
    }
}

async fn lookup_record(
    relayer: &MemoryRelayer,
    query: &RecordQuery,
    refhash: &str,
) -> nomad::Result<bool> {
    let identity = Identity::with_subdomain(&query.tld, &query.subdomain)?;
    let refhash = RefHash::new(refhash)?;
    relayer.has_record(&identity, &refhash).await
}

#[instrument(skip_all, fields(tld = %body.tld))]
async fn register_identity(
    State(relayer): State<SharedRelayer>,
    Json(body): Json<IdentityRegistration>,
) -> Reply {
    let registered = (|| {
        let identity = Identity::with_subdomain(&body.tld, &body.subdomain)?;
        let public_key = IdentityPublicKey::from_hex(&body.public_key)?;
        relayer.register_identity(&identity, public_key)?;
        Ok::<_, NomadError>(identity)
    })();
    match registered {
        Ok(identity) => {
            info!(identity = %identity, "identity registered");
            ok(identity.username())
        }
        Err(e) => fail(e),
    }
}
