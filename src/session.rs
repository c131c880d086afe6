//! C4: session wrapper.
//!
//! Wraps a fresh random session key `K_s` for a single receiver via ECDH
//! between the sender's private key and the receiver's public key (§4.4).

use serde::{Deserialize, Serialize};

use crate::crypto::{aes_gcm_encrypt, ecdh, keccak256, random_iv, random_session_key, secp256k1_pubkey_compressed};
use crate::error::{Result, SealedMessageError};

/// The `{ct_r, iv_r, tag_r}` triple from §3. AES-256-GCM wrap of
/// `K_s` under the ECDH-derived key. Serializable as-is for the envelope
/// store (C7) and the `/escrow/envelope` wire format (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverEnvelope {
    #[serde(with = "hex_bytes")]
    pub ct_r: Vec<u8>,
    #[serde(with = "hex_array12")]
    pub iv_r: [u8; 12],
    #[serde(with = "hex_array16")]
    pub tag_r: [u8; 16],
}

pub struct SealedSession {
    pub session_key: [u8; 32],
    pub envelope: ReceiverEnvelope,
    /// `H_r`: `keccak256(ct_r ‖ iv_r ‖ tag_r ‖ pub_sender)`, I2.
    pub envelope_hash: [u8; 32],
    pub pub_sender: [u8; 33],
}

/// `keccak256(ct_r ‖ iv_r ‖ tag_r ‖ pub_sender)`, I2. Always includes
/// `pub_sender`; no code path in this crate constructs or accepts the
/// historical form that omits it (§9 Open Questions).
pub fn receiver_envelope_hash(envelope: &ReceiverEnvelope, pub_sender: &[u8; 33]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(envelope.ct_r.len() + 12 + 16 + 33);
    buf.extend_from_slice(&envelope.ct_r);
    buf.extend_from_slice(&envelope.iv_r);
    buf.extend_from_slice(&envelope.tag_r);
    buf.extend_from_slice(pub_sender);
    keccak256(&buf)
}

/// `keccak256(K_s)`, I1. The session-key commitment `C_s`.
pub fn session_commitment(session_key: &[u8; 32]) -> [u8; 32] {
    keccak256(session_key)
}

/// `seal_session(priv_sender, pub_receiver)` from §4.4.
pub fn seal_session(priv_sender: &[u8; 32], pub_receiver: &[u8]) -> Result<SealedSession> {
    let pub_sender = secp256k1_pubkey_compressed(priv_sender)?;
    let session_key = random_session_key()?;

    let shared = ecdh(priv_sender, pub_receiver)?;
    let mut derived_key = [0u8; 32];
    derived_key.copy_from_slice(&shared[1..33]);

    let iv_r = random_iv()?;
    let (ct_r, tag_r) = aes_gcm_encrypt(&derived_key, &iv_r, &session_key)?;
    if ct_r.len() != 32 {
        return Err(SealedMessageError::Internal("receiver-envelope ciphertext is not 32 bytes".into()));
    }

    let envelope = ReceiverEnvelope { ct_r, iv_r, tag_r };
    let envelope_hash = receiver_envelope_hash(&envelope, &pub_sender);

    Ok(SealedSession { session_key, envelope, envelope_hash, pub_sender })
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod hex_array12 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 12], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[u8; 12], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into().map_err(|_| serde::de::Error::custom("expected 12 bytes"))
    }
}

pub(crate) mod hex_array16 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<[u8; 16], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into().map_err(|_| serde::de::Error::custom("expected 16 bytes"))
    }
}
