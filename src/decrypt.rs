//! Decrypt engine.
//!
//! Client-side: recovers `K_s` from the receiver envelope (trying the
//! receiver's or auditing sender's identity, and, if legacy acceptance is
//! enabled, historical KDF variants), verifies the commitment, decrypts
//! the payload, and resolves `"F:"` pointers.

use crate::cas::CasClient;
use crate::crypto::{aes_gcm_decrypt, ecdh, keccak256, sha256};
use crate::error::{Result, SealedMessageError};
use crate::mapping_store::MappingStore;
use crate::metadata::{parse_pointer, unseal_metadata, EncryptedMetadataEnvelope, MetadataObject};
use crate::session::ReceiverEnvelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    Receiver,
    Sender,
}

pub struct DecryptInput<'a> {
    pub role: ViewerRole,
    /// `[derived, fallback?]`. The fallback candidate is included only
    /// when the caller resolved one.
    pub candidate_privs: &'a [[u8; 32]],
    pub pub_sender: &'a [u8; 33],
    /// Required when `role == Sender` (auditing flow).
    pub pub_receiver: Option<&'a [u8; 33]>,
    pub envelope: &'a ReceiverEnvelope,
    pub commitment: [u8; 32],
    pub iv_m: [u8; 12],
    pub ct_m: &'a [u8],
    pub tag_m: [u8; 16],
    pub legacy_accept_candidates: bool,
}

pub struct DecryptedMessage {
    pub session_key: [u8; 32],
    pub plaintext: Vec<u8>,
}

/// Candidate AES keys derived from the raw ECDH point, in the priority
/// order of §4.11 step 4. Candidates (b)-(d) exist only for historical
/// senders and are gated behind `legacy_accept_candidates` (§9).
fn derive_candidate_keys(shared: &[u8; 65], legacy_accept_candidates: bool) -> Vec<[u8; 32]> {
    let mut candidate_a = [0u8; 32];
    candidate_a.copy_from_slice(&shared[1..33]);
    let mut candidates = vec![candidate_a];

    if legacy_accept_candidates {
        candidates.push(sha256(&shared[1..]));
        candidates.push(sha256(shared));
        let mut candidate_d = [0u8; 32];
        candidate_d.copy_from_slice(&shared[0..32]);
        candidates.push(candidate_d);
    }
    candidates
}

/// Recovers `K_s` from the receiver envelope (§4.11 steps 1-5). Any
/// `AuthFailure` encountered while trying a wrong candidate key is
/// swallowed; only exhausting every candidate is reported as `AuthFailure`.
pub fn recover_session_key(input: &DecryptInput) -> Result<[u8; 32]> {
    let peer_pub = match input.role {
        ViewerRole::Receiver => input.pub_sender,
        ViewerRole::Sender => input
            .pub_receiver
            .ok_or_else(|| SealedMessageError::InvalidArgument("peer_pub is required for the sender role".into()))?,
    };

    for priv_key in input.candidate_privs {
        let shared = ecdh(priv_key, peer_pub)?;
        for derived_key in derive_candidate_keys(&shared, input.legacy_accept_candidates) {
            let Ok(plaintext) = aes_gcm_decrypt(&derived_key, &input.envelope.iv_r, &input.envelope.ct_r, &input.envelope.tag_r)
            else {
                continue;
            };
            if plaintext.len() != 32 {
                continue;
            }
            let mut session_key = [0u8; 32];
            session_key.copy_from_slice(&plaintext);
            if keccak256(&session_key) == input.commitment {
                return Ok(session_key);
            }
        }
    }
    Err(SealedMessageError::AuthFailure)
}

/// Full decrypt (§4.11 steps 1-6). A payload-level `AuthFailure` is fatal:
/// the commitment already bound `K_s`, so there is no next candidate left
/// to try.
pub fn decrypt_message(input: &DecryptInput) -> Result<DecryptedMessage> {
    let session_key = recover_session_key(input)?;
    let plaintext = aes_gcm_decrypt(&session_key, &input.iv_m, input.ct_m, &input.tag_m)?;
    Ok(DecryptedMessage { session_key, plaintext })
}

/// §4.11 step 7: resolves a `"F:<shortHash>"` pointer through the mapping
/// store and decrypts the referenced metadata envelope. Returns `None` for
/// ordinary inline plaintext.
pub async fn resolve_pointer(
    mapping_store: &MappingStore,
    cas: &CasClient,
    session_key: &[u8; 32],
    plaintext: &[u8],
) -> Result<Option<MetadataObject>> {
    let text = std::str::from_utf8(plaintext)
        .map_err(|_| SealedMessageError::InvalidArgument("payload is not valid UTF-8".into()))?;
    let Some(short_hash) = parse_pointer(text) else {
        return Ok(None);
    };

    let mapping = mapping_store.get_by_short_hash(short_hash)?.ok_or(SealedMessageError::NotFound)?;
    let cas_result = cas.get(&mapping.full_hash).await?;
    let envelope: EncryptedMetadataEnvelope =
        serde_json::from_slice(&cas_result.blob).map_err(|e| SealedMessageError::Internal(e.to_string()))?;

    let (object, computed_keccak) = unseal_metadata(session_key, &envelope)?;
    if let Some(expected) = &mapping.metadata_keccak {
        if hex::encode(computed_keccak) != *expected {
            return Err(SealedMessageError::CommitmentMismatch);
        }
    }
    Ok(Some(object))
}
