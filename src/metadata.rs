//! C6: metadata envelope.
//!
//! The message payload itself is either inline plaintext or a `"F:<shortHash>"`
//! pointer into a richer, separately-encrypted metadata object (attachment
//! info, preview), §4.6.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::{aes_gcm_decrypt, aes_gcm_encrypt, keccak256, random_iv};
use crate::error::{Result, SealedMessageError};

/// Base58 alphabet (no `0`, `O`, `I`, `l`), 58 symbols, per §4.6 step 1.
const SHORT_HASH_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const SHORT_HASH_LEN: usize = 6;
const SHORT_HASH_MAX_ATTEMPTS: usize = 64;

/// Plaintext ≤ this many bytes skips the metadata envelope entirely and is
/// encrypted inline, still recording a `"text-inline"` mapping row (§4.6).
pub const TEXT_INLINE_MAX_LEN: usize = 32;

pub fn is_text_inline_eligible(plaintext: &[u8]) -> bool {
    plaintext.len() <= TEXT_INLINE_MAX_LEN
}

pub fn message_pointer(short_hash: &str) -> String {
    format!("F:{short_hash}")
}

pub fn parse_pointer(message: &str) -> Option<&str> {
    message.strip_prefix("F:")
}

fn random_short_hash_candidate() -> Result<String> {
    let mut raw = [0u8; SHORT_HASH_LEN];
    OsRng.try_fill_bytes(&mut raw).map_err(|_| SealedMessageError::EntropyUnavailable)?;
    let candidate = raw
        .iter()
        .map(|b| SHORT_HASH_ALPHABET[*b as usize % SHORT_HASH_ALPHABET.len()] as char)
        .collect();
    Ok(candidate)
}

/// Draws shortHashes until `is_taken` reports one free, bounded by
/// `SHORT_HASH_MAX_ATTEMPTS` (**ShortHashExhausted** beyond that, §4.6
/// step 1).
pub fn generate_unique_short_hash(mut is_taken: impl FnMut(&str) -> bool) -> Result<String> {
    for _ in 0..SHORT_HASH_MAX_ATTEMPTS {
        let candidate = random_short_hash_candidate()?;
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(SealedMessageError::ShortHashExhausted)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub cid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewInfo {
    pub thumbnail: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// The metadata JSON body, discriminated on `type` per the sum-type
/// guidance in §9 ("Dynamic/duck-typed API shapes") rather than inferred
/// structurally from which optional fields are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MetadataPayload {
    #[serde(rename = "text-inline")]
    TextInline { message: String },
    #[serde(rename = "text-encrypted")]
    TextEncrypted { message: String },
    #[serde(rename = "file-encrypted")]
    FileEncrypted { attachment: AttachmentInfo, preview: Option<PreviewInfo> },
}

impl MetadataPayload {
    pub fn type_tag(&self) -> &'static str {
        match self {
            MetadataPayload::TextInline { .. } => "text-inline",
            MetadataPayload::TextEncrypted { .. } => "text-encrypted",
            MetadataPayload::FileEncrypted { .. } => "file-encrypted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataObject {
    pub short_hash: String,
    #[serde(flatten)]
    pub payload: MetadataPayload,
}

/// The CAS-published, session-key-encrypted wrapper around a
/// `MetadataObject` (§4.6 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMetadataEnvelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub payload_type: String,
    pub short_hash: String,
    pub encoding: String,
    #[serde(with = "crate::session::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::session::hex_array12")]
    pub iv: [u8; 12],
    #[serde(with = "crate::session::hex_array16")]
    pub auth_tag: [u8; 16],
    pub length: usize,
    pub keccak: String,
    pub created_at: DateTime<Utc>,
}

/// The unencrypted companion document published alongside a locked
/// message so the UI has something to show before unlock (§4.6 step 5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicSummary {
    pub short_hash: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
    pub thumbnail: Option<String>,
}

/// Encrypts `payload` under `session_key` and returns the CAS-ready
/// envelope plus `metadataKeccak` (I4).
pub fn seal_metadata(
    session_key: &[u8; 32],
    short_hash: String,
    payload: MetadataPayload,
) -> Result<(EncryptedMetadataEnvelope, [u8; 32])> {
    let object = MetadataObject { short_hash: short_hash.clone(), payload };
    let json = serde_json::to_vec(&object).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
    let metadata_keccak = keccak256(&json);

    let iv = random_iv()?;
    let (ciphertext, auth_tag) = aes_gcm_encrypt(session_key, &iv, &json)?;

    let envelope = EncryptedMetadataEnvelope {
        version: 1,
        payload_type: object.payload.type_tag().to_string(),
        short_hash,
        encoding: "aes-256-gcm".to_string(),
        length: json.len(),
        ciphertext,
        iv,
        auth_tag,
        keccak: hex::encode(metadata_keccak),
        created_at: Utc::now(),
    };
    Ok((envelope, metadata_keccak))
}

/// Decrypts an envelope and recomputes `metadataKeccak` over the recovered
/// JSON bytes so the caller can check it against I4 independently of what
/// the envelope itself claims in its `keccak` field.
pub fn unseal_metadata(session_key: &[u8; 32], envelope: &EncryptedMetadataEnvelope) -> Result<(MetadataObject, [u8; 32])> {
    let json = aes_gcm_decrypt(session_key, &envelope.iv, &envelope.ciphertext, &envelope.auth_tag)?;
    let computed_keccak = keccak256(&json);
    let object: MetadataObject =
        serde_json::from_slice(&json).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
    Ok((object, computed_keccak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_session_key;
    use std::collections::HashSet;

    #[test]
    fn short_hash_has_expected_length_and_alphabet() {
        let hash = generate_unique_short_hash(|_| false).unwrap();
        assert_eq!(hash.chars().count(), SHORT_HASH_LEN);
        assert!(hash.chars().all(|c| SHORT_HASH_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn short_hash_retries_on_collision_then_succeeds() {
        let mut seen_once = false;
        let hash = generate_unique_short_hash(|_| {
            if seen_once {
                false
            } else {
                seen_once = true;
                true
            }
        })
        .unwrap();
        assert_eq!(hash.chars().count(), SHORT_HASH_LEN);
    }

    #[test]
    fn short_hash_exhausts_when_always_taken() {
        let err = generate_unique_short_hash(|_| true).unwrap_err();
        assert!(matches!(err, SealedMessageError::ShortHashExhausted));
    }

    #[test]
    fn short_hashes_are_not_degenerate() {
        let hashes: HashSet<String> = (0..50).map(|_| generate_unique_short_hash(|_| false).unwrap()).collect();
        assert!(hashes.len() > 1, "shortHash generator appears to produce a constant value");
    }

    /// Drawing 10_000 shortHashes against a taken-set that grows with
    /// every draw never yields a duplicate. The retry loop in
    /// `generate_unique_short_hash` always rejects an already-claimed
    /// candidate rather than returning it. (See `mapping_store.rs` for the
    /// store-level P7 collision-rejection test.)
    #[test]
    fn ten_thousand_short_hashes_contain_no_collisions() {
        let mut taken: HashSet<String> = HashSet::new();
        for _ in 0..10_000 {
            let hash = generate_unique_short_hash(|candidate| taken.contains(candidate)).unwrap();
            assert!(taken.insert(hash), "generator returned an already-taken shortHash");
        }
        assert_eq!(taken.len(), 10_000);
    }

    #[test]
    fn seal_and_unseal_text_inline_round_trips() {
        let session_key = random_session_key().unwrap();
        let payload = MetadataPayload::TextInline { message: "hi there".to_string() };
        let (envelope, keccak_at_seal) = seal_metadata(&session_key, "Ab12Cd".to_string(), payload).unwrap();
        assert_eq!(envelope.payload_type, "text-inline");

        let (object, keccak_at_unseal) = unseal_metadata(&session_key, &envelope).unwrap();
        assert_eq!(keccak_at_seal, keccak_at_unseal);
        assert_eq!(hex::encode(keccak_at_unseal), envelope.keccak);
        match object.payload {
            MetadataPayload::TextInline { message } => assert_eq!(message, "hi there"),
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn seal_and_unseal_file_encrypted_round_trips() {
        let session_key = random_session_key().unwrap();
        let payload = MetadataPayload::FileEncrypted {
            attachment: AttachmentInfo {
                file_name: "report.pdf".to_string(),
                file_size: 4096,
                mime_type: "application/pdf".to_string(),
                cid: "bafy...".to_string(),
            },
            preview: Some(PreviewInfo { thumbnail: "base64thumb".to_string(), width: Some(128), height: Some(128) }),
        };
        let (envelope, _) = seal_metadata(&session_key, "Zz99Qw".to_string(), payload.clone()).unwrap();
        assert_eq!(envelope.payload_type, "file-encrypted");

        let (object, _) = unseal_metadata(&session_key, &envelope).unwrap();
        assert_eq!(object.payload, payload);
    }

    #[test]
    fn wrong_session_key_fails_to_unseal() {
        let session_key = random_session_key().unwrap();
        let other_key = random_session_key().unwrap();
        let payload = MetadataPayload::TextInline { message: "secret".to_string() };
        let (envelope, _) = seal_metadata(&session_key, "Ab12Cd".to_string(), payload).unwrap();
        let err = unseal_metadata(&other_key, &envelope).unwrap_err();
        assert!(matches!(err, SealedMessageError::AuthFailure));
    }

    #[test]
    fn pointer_round_trips() {
        let pointer = message_pointer("Ab12Cd");
        assert_eq!(pointer, "F:Ab12Cd");
        assert_eq!(parse_pointer(&pointer), Some("Ab12Cd"));
        assert_eq!(parse_pointer("plain text"), None);
    }

    #[test]
    fn text_inline_eligibility_boundary() {
        assert!(is_text_inline_eligible(&[0u8; 32]));
        assert!(!is_text_inline_eligible(&[0u8; 33]));
    }
}
