//! C10: release service orchestration (§4.10).
//!
//! Pure-ish orchestration over the ledger, envelope store and CAS: validates
//! the unlock predicate and commitment equalities, fetches the ciphertext,
//! and returns the materials a client needs to decrypt. Never `K_s` or the
//! escrow plaintext.

use serde::{Deserialize, Serialize};

use crate::cas::CasClient;
use crate::crypto::keccak256;
use crate::envelope_store::EnvelopeStore;
use crate::error::{Result, SealedMessageError};
use crate::ledger::LedgerAdapter;
use crate::session::ReceiverEnvelope;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRequest {
    pub message_id: String,
    pub viewer: String,
    pub uri: Option<String>,
    pub iv: Option<String>,
    pub auth_tag: Option<String>,
    pub c_s: String,
    pub h_r: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub ct_m: String,
    pub tag_m: String,
    pub iv_m: String,
    pub pub_sender: String,
    pub receiver_envelope: ReceiverEnvelope,
    pub c_s: String,
    pub h_r: String,
    pub ciphertext_hash_verified: bool,
    pub h_ct_computed: String,
    pub metadata_short_hash: Option<String>,
    pub metadata_keccak: Option<String>,
    pub is_stub: bool,
}

fn is_well_formed_address(address: &str) -> bool {
    let trimmed = address.trim();
    !trimmed.is_empty() && trimmed.len() >= 4
}

fn is_zero_hex(value: &str) -> bool {
    value.chars().all(|c| c == '0')
}

/// `POST /release` (§4.10, §6). The HTTP layer (`bin/release-service.rs`)
/// maps the `Result` here onto status codes; this function only deals in
/// the error taxonomy.
pub async fn release(
    ledger: &dyn LedgerAdapter,
    envelopes: &EnvelopeStore,
    cas: &CasClient,
    request: ReleaseRequest,
) -> Result<ReleaseResponse> {
    if !is_well_formed_address(&request.viewer) {
        return Err(SealedMessageError::Unauthorized);
    }

    let message = ledger.get_message(&request.message_id, &request.viewer).await?;

    let submitted_c_s = request.c_s.trim().to_lowercase();
    if message.c_s.to_lowercase() != submitted_c_s {
        return Err(SealedMessageError::CommitmentMismatch);
    }
    if let Some(h_r) = &request.h_r {
        if !is_zero_hex(&message.h_r) && message.h_r.to_lowercase() != h_r.trim().to_lowercase() {
            return Err(SealedMessageError::CommitmentMismatch);
        }
    }
    // request.uri / request.iv / request.auth_tag are warn-only per §4.10
    // step 2: the client may pass stale copies, so they are accepted
    // without comparison here (no fatal path for them).

    if message.revoked {
        return Err(SealedMessageError::Revoked);
    }

    let financial = ledger.get_financial_view(&request.message_id).await?;
    if !financial.is_unlocked {
        return Err(SealedMessageError::Locked);
    }

    let record = match envelopes.get_by_commitment(&message.c_s)? {
        Some(record) => record,
        None => match &request.h_r {
            Some(h_r) => envelopes.find_by_envelope_hash(&h_r.to_lowercase())?.ok_or(SealedMessageError::EnvelopeMissing)?,
            None => return Err(SealedMessageError::EnvelopeMissing),
        },
    };

    let cas_result = cas.get(&message.uri).await?;
    let blob = cas_result.blob;
    if blob.len() <= 16 {
        return Err(SealedMessageError::ShortCiphertext);
    }
    let split_at = blob.len() - 16;
    let (ct_m, tag_m) = blob.split_at(split_at);

    let h_ct_computed = keccak256(&blob);
    let expected_h_ct = hex::decode(message.h_ct.trim_start_matches("0x"))
        .map_err(|_| SealedMessageError::Internal("ledger H_ct is not valid hex".into()))?;
    let ciphertext_hash_verified = h_ct_computed.as_slice() == expected_h_ct.as_slice();

    Ok(ReleaseResponse {
        ct_m: hex::encode(ct_m),
        tag_m: hex::encode(tag_m),
        iv_m: message.iv_m.clone(),
        pub_sender: record.pub_sender.clone(),
        receiver_envelope: record.envelope.clone(),
        c_s: message.c_s.clone(),
        h_r: message.h_r.clone(),
        ciphertext_hash_verified,
        h_ct_computed: hex::encode(h_ct_computed),
        metadata_short_hash: record.metadata_short_hash.clone(),
        metadata_keccak: record.metadata_keccak.clone(),
        is_stub: cas_result.is_stub,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{aes_gcm_encrypt, random_iv, random_session_key};
    use crate::envelope_store::ReceiverEnvelopeRecord;
    use crate::ledger::{InMemoryLedgerAdapter, MessageRecord};
    use crate::session::ReceiverEnvelope;
    use chrono::{Duration, Utc};
    use std::time::{SystemTime, UNIX_EPOCH};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_envelope_store() -> EnvelopeStore {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir().join(format!("sealedmessage-release-test-{nanos}.json"));
        EnvelopeStore::open(path)
    }

    struct Fixture {
        ledger: InMemoryLedgerAdapter,
        envelopes: EnvelopeStore,
        cas: CasClient,
        _server: MockServer,
        message_id: String,
        session_key: [u8; 32],
        request: ReleaseRequest,
    }

    async fn build_fixture(condition_mask: u8, unlock_time: chrono::DateTime<Utc>, paid_amount: u128, tamper: bool) -> Fixture {
        let session_key = random_session_key().unwrap();
        let c_s = crate::session::session_commitment(&session_key);
        let h_r = keccak256_placeholder();

        let iv_m = random_iv().unwrap();
        let plaintext = b"Hello from SealedMessage";
        let (mut ct_m, tag_m) = aes_gcm_encrypt(&session_key, &iv_m, plaintext).unwrap();
        if tamper {
            ct_m[0] ^= 0xFF;
        }
        let mut blob = ct_m.clone();
        blob.extend_from_slice(&tag_m);
        let h_ct = keccak256(&blob);

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/the-cid"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(blob.clone()))
            .mount(&server)
            .await;

        let message_id = "msg-1".to_string();
        let ledger = InMemoryLedgerAdapter::new();
        ledger.insert(MessageRecord {
            message_id: message_id.clone(),
            sender: "0xsender".to_string(),
            receiver: "0xreceiver".to_string(),
            uri: "the-cid".to_string(),
            iv_m: hex::encode(iv_m),
            tag_m: hex::encode(tag_m),
            h_ct: hex::encode(h_ct),
            metadata_keccak: "0".repeat(64),
            ct_e: "0".repeat(64),
            iv_e: "0".repeat(24),
            tag_e: "0".repeat(32),
            escrow_version: 1,
            c_s: hex::encode(c_s),
            h_r: hex::encode(h_r),
            created_at: Utc::now() - Duration::days(1),
            unlock_time,
            required_payment: 1000,
            paid_amount,
            condition_mask,
            revoked: false,
        });

        let envelopes = temp_envelope_store();
        envelopes
            .save(ReceiverEnvelopeRecord {
                c_s: hex::encode(c_s),
                h_r: hex::encode(h_r),
                h_ct: hex::encode(h_ct),
                metadata_short_hash: None,
                metadata_keccak: None,
                pub_sender: "02".to_string() + &"aa".repeat(32),
                envelope: ReceiverEnvelope { ct_r: vec![9u8; 32], iv_r: [1u8; 12], tag_r: [2u8; 16] },
                created_at: Utc::now(),
                updated_at: Utc::now(),
                release: None,
            })
            .unwrap();

        let cas = CasClient::new(vec![server.uri()], std::time::Duration::from_secs(5), false).unwrap();

        let request = ReleaseRequest {
            message_id: message_id.clone(),
            viewer: "0xreceiver".to_string(),
            uri: Some("the-cid".to_string()),
            iv: None,
            auth_tag: None,
            c_s: hex::encode(c_s),
            h_r: Some(hex::encode(h_r)),
        };

        Fixture { ledger, envelopes, cas, _server: server, message_id, session_key, request }
    }

    fn keccak256_placeholder() -> [u8; 32] {
        keccak256(b"placeholder-receiver-envelope-hash")
    }

    #[tokio::test]
    async fn happy_path_time_only_unlock() {
        let fixture = build_fixture(1, Utc::now() - Duration::seconds(10), 0, false).await;
        let response = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap();
        assert!(response.ciphertext_hash_verified);

        let ct_m = hex::decode(&response.ct_m).unwrap();
        let tag_m: [u8; 16] = hex::decode(&response.tag_m).unwrap().try_into().unwrap();
        let iv_m: [u8; 12] = hex::decode(&response.iv_m).unwrap().try_into().unwrap();
        let plaintext = crate::crypto::aes_gcm_decrypt(&fixture.session_key, &iv_m, &ct_m, &tag_m).unwrap();
        assert_eq!(plaintext, b"Hello from SealedMessage");
    }

    #[tokio::test]
    async fn locked_before_unlock_time() {
        let fixture = build_fixture(1, Utc::now() + Duration::seconds(120), 0, false).await;
        let err = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap_err();
        assert!(matches!(err, SealedMessageError::Locked));
    }

    #[tokio::test]
    async fn revoked_message_is_rejected() {
        let fixture = build_fixture(1, Utc::now() - Duration::seconds(10), 0, false).await;
        fixture.ledger.revoke(&fixture.message_id);
        let err = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap_err();
        assert!(matches!(err, SealedMessageError::Revoked));
    }

    #[tokio::test]
    async fn tampered_ciphertext_flags_hash_mismatch_but_still_returns() {
        let fixture = build_fixture(1, Utc::now() - Duration::seconds(10), 0, true).await;
        let response = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap();
        assert!(!response.ciphertext_hash_verified);
    }

    #[tokio::test]
    async fn unauthorized_viewer_is_rejected() {
        let mut fixture = build_fixture(1, Utc::now() - Duration::seconds(10), 0, false).await;
        fixture.request.viewer = "0xsomeone-unrelated".to_string();
        let err = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap_err();
        assert!(matches!(err, SealedMessageError::Unauthorized));
    }

    #[tokio::test]
    async fn commitment_mismatch_is_rejected() {
        let mut fixture = build_fixture(1, Utc::now() - Duration::seconds(10), 0, false).await;
        fixture.request.c_s = "ff".repeat(32);
        let err = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap_err();
        assert!(matches!(err, SealedMessageError::CommitmentMismatch));
    }

    #[tokio::test]
    async fn payment_and_time_combined_mask() {
        let fixture = build_fixture(3, Utc::now() - Duration::seconds(10), 500, false).await;
        let first_request = fixture.request.clone();
        let err = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, first_request).await.unwrap_err();
        assert!(matches!(err, SealedMessageError::Locked));

        fixture.ledger.set_paid_amount(&fixture.message_id, 1000);
        let response = release(&fixture.ledger, &fixture.envelopes, &fixture.cas, fixture.request).await.unwrap();
        assert!(response.ciphertext_hash_verified);
    }
}
