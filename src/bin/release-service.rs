//! HTTP surface for the release service (§6).
//!
//! Mirrors the teacher's `main.rs` startup shape: `dotenvy` then
//! `tracing_subscriber` with an `EnvFilter`, but serves requests instead
//! of running a trading loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sealedmessage::cas::CasClient;
use sealedmessage::config::Config;
use sealedmessage::crypto::keccak256;
use sealedmessage::envelope_store::{EnvelopeStore, ReceiverEnvelopeRecord};
use sealedmessage::error::SealedMessageError;
use sealedmessage::escrow::{seal_escrow, server_escrow_key};
use sealedmessage::ledger::{HttpLedgerAdapter, LedgerAdapter};
use sealedmessage::mapping_store::MappingStore;
use sealedmessage::release::{release, ReleaseRequest};
use sealedmessage::session::{receiver_envelope_hash, ReceiverEnvelope};

struct AppState {
    config: Config,
    envelopes: EnvelopeStore,
    mappings: MappingStore,
    cas: CasClient,
    ledger: Box<dyn LedgerAdapter>,
}

type SharedState = Arc<AppState>;

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

fn error_status(err: &SealedMessageError) -> StatusCode {
    match err {
        SealedMessageError::InvalidArgument(_)
        | SealedMessageError::CommitmentMismatch
        | SealedMessageError::MappingConflict
        | SealedMessageError::ShortHashExhausted
        | SealedMessageError::ShortCiphertext => StatusCode::BAD_REQUEST,
        SealedMessageError::Unauthorized => StatusCode::UNAUTHORIZED,
        SealedMessageError::NotFound | SealedMessageError::EnvelopeMissing => StatusCode::NOT_FOUND,
        SealedMessageError::Revoked => StatusCode::CONFLICT,
        SealedMessageError::Locked => StatusCode::LOCKED,
        SealedMessageError::AuthFailure
        | SealedMessageError::EntropyUnavailable
        | SealedMessageError::NetworkError(_)
        | SealedMessageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SealedMessageError) -> Response {
    let status = error_status(&err);
    (status, Json(ErrorBody { ok: false, error: err.to_string() })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrapRequest {
    session_key: String,
    commitment: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WrapPayload {
    ciphertext: String,
    iv: String,
    auth_tag: String,
    key_version: u32,
}

#[derive(Serialize)]
struct WrapResponse {
    ok: bool,
    wrap: WrapPayload,
}

/// `POST /escrow/wrap` (§6).
async fn escrow_wrap(State(state): State<SharedState>, Json(req): Json<WrapRequest>) -> Response {
    let session_key_bytes = match hex::decode(&req.session_key) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("sessionKey must be 32 bytes of hex".into())),
    };
    let mut session_key = [0u8; 32];
    session_key.copy_from_slice(&session_key_bytes);

    let commitment_bytes = match hex::decode(&req.commitment) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("commitment must be 32 bytes of hex".into())),
    };
    if keccak256(&session_key).as_slice() != commitment_bytes.as_slice() {
        return error_response(SealedMessageError::CommitmentMismatch);
    }

    if state.config.escrow_key_part_a.is_empty() || state.config.escrow_key_part_b.is_empty() {
        return error_response(SealedMessageError::Internal("escrow key parts are not configured".into()));
    }

    let server_key = server_escrow_key(&state.config.escrow_key_part_a, &state.config.escrow_key_part_b);
    match seal_escrow(&server_key, state.config.escrow_key_version, &session_key) {
        Ok(envelope) => Json(WrapResponse {
            ok: true,
            wrap: WrapPayload {
                ciphertext: hex::encode(&envelope.ct_e),
                iv: hex::encode(envelope.iv_e),
                auth_tag: hex::encode(envelope.tag_e),
                key_version: envelope.key_version,
            },
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeSaveRequest {
    c_s: String,
    h_r: String,
    h_ct: String,
    pub_sender: String,
    ct_r: String,
    iv_r: String,
    tag_r: String,
    metadata_short_hash: Option<String>,
    metadata_keccak: Option<String>,
}

/// `POST /escrow/envelope` (§6).
async fn escrow_envelope_save(State(state): State<SharedState>, Json(req): Json<EnvelopeSaveRequest>) -> Response {
    let ct_r = match hex::decode(&req.ct_r) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("ct_r must be 32 bytes".into())),
    };
    let iv_r_bytes = match hex::decode(&req.iv_r) {
        Ok(bytes) if bytes.len() == 12 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("iv_r must be 12 bytes".into())),
    };
    let tag_r_bytes = match hex::decode(&req.tag_r) {
        Ok(bytes) if bytes.len() == 16 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("tag_r must be 16 bytes".into())),
    };
    let pub_sender_bytes = match hex::decode(&req.pub_sender) {
        Ok(bytes) if bytes.len() == 33 => bytes,
        _ => return error_response(SealedMessageError::InvalidArgument("pub_sender must be 33 bytes".into())),
    };
    let expected_h_r = match hex::decode(&req.h_r) {
        Ok(bytes) => bytes,
        Err(_) => return error_response(SealedMessageError::InvalidArgument("H_r is not valid hex".into())),
    };

    let mut iv_r = [0u8; 12];
    iv_r.copy_from_slice(&iv_r_bytes);
    let mut tag_r = [0u8; 16];
    tag_r.copy_from_slice(&tag_r_bytes);
    let mut pub_sender = [0u8; 33];
    pub_sender.copy_from_slice(&pub_sender_bytes);

    let envelope = ReceiverEnvelope { ct_r, iv_r, tag_r };
    let computed_h_r = receiver_envelope_hash(&envelope, &pub_sender);
    if computed_h_r.as_slice() != expected_h_r.as_slice() {
        return error_response(SealedMessageError::CommitmentMismatch);
    }

    let now = chrono::Utc::now();
    let record = ReceiverEnvelopeRecord {
        c_s: req.c_s.to_lowercase(),
        h_r: req.h_r.to_lowercase(),
        h_ct: req.h_ct.to_lowercase(),
        metadata_short_hash: req.metadata_short_hash,
        metadata_keccak: req.metadata_keccak,
        pub_sender: req.pub_sender.to_lowercase(),
        envelope,
        created_at: now,
        updated_at: now,
        release: None,
    };

    match state.envelopes.save(record) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeQuery {
    commitment: Option<String>,
    receiver_envelope_hash: Option<String>,
}

/// `GET /escrow/envelope?commitment=&receiverEnvelopeHash=` (§6).
async fn escrow_envelope_get(State(state): State<SharedState>, Query(query): Query<EnvelopeQuery>) -> Response {
    let by_commitment = match &query.commitment {
        Some(c_s) => state.envelopes.get_by_commitment(&c_s.to_lowercase()),
        None => Ok(None),
    };

    let record = match by_commitment {
        Ok(Some(record)) => Some(record),
        Ok(None) => match &query.receiver_envelope_hash {
            Some(h_r) => match state.envelopes.find_by_envelope_hash(&h_r.to_lowercase()) {
                Ok(found) => found,
                Err(e) => return error_response(e),
            },
            None => None,
        },
        Err(e) => return error_response(e),
    };

    match record {
        Some(record) => Json(serde_json::json!({ "ok": true, "record": record })).into_response(),
        None => error_response(SealedMessageError::NotFound),
    }
}

/// `POST /release` (§4.10, §6).
async fn release_handler(State(state): State<SharedState>, Json(req): Json<ReleaseRequest>) -> Response {
    match release(state.ledger.as_ref(), &state.envelopes, &state.cas, req).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /mapping/<shortHash>` (§6).
async fn mapping_by_short_hash(State(state): State<SharedState>, Path(short_hash): Path<String>) -> Response {
    match state.mappings.get_by_short_hash(&short_hash) {
        Ok(Some(record)) => Json(serde_json::json!({ "ok": true, "record": record })).into_response(),
        Ok(None) => error_response(SealedMessageError::NotFound),
        Err(e) => error_response(e),
    }
}

/// `GET /mapping/by-metadata/<keccak>` (§6).
async fn mapping_by_metadata_keccak(State(state): State<SharedState>, Path(keccak): Path<String>) -> Response {
    match state.mappings.get_by_metadata_keccak(&keccak) {
        Ok(Some(record)) => Json(serde_json::json!({ "ok": true, "record": record })).into_response(),
        Ok(None) => error_response(SealedMessageError::NotFound),
        Err(e) => error_response(e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = Config::load()?;
    info!("sealedmessage release-service starting, bind={}", config.release_service_bind_addr);

    let ledger_base_url = std::env::var("LEDGER_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:9000".to_string());
    let ledger = HttpLedgerAdapter::new(ledger_base_url, Duration::from_secs(config.ledger_timeout_secs))?;

    let cas = CasClient::new(
        config.cas_gateways.clone(),
        Duration::from_secs(config.gateway_timeout_secs),
        config.allow_stub_uris,
    )?;

    let bind_addr: SocketAddr = config.release_service_bind_addr.parse()?;

    let state = Arc::new(AppState {
        envelopes: EnvelopeStore::open("escrow-envelopes.json"),
        mappings: MappingStore::open("mapping-store.json"),
        cas,
        ledger: Box::new(ledger),
        config,
    });

    let app = Router::new()
        .route("/escrow/wrap", post(escrow_wrap))
        .route("/escrow/envelope", post(escrow_envelope_save).get(escrow_envelope_get))
        .route("/release", post(release_handler))
        .route("/mapping/:short_hash", get(mapping_by_short_hash))
        .route("/mapping/by-metadata/:keccak", get(mapping_by_metadata_keccak))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("listening on {bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
