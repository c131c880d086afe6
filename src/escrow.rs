//! C5: escrow wrapper.
//!
//! Wraps `K_s` a second time under a server-held key assembled from two
//! split parts, so no single held secret alone can unwrap it (§4.5).

use serde::{Deserialize, Serialize};

use crate::crypto::{aes_gcm_decrypt, aes_gcm_encrypt, random_iv, sha256};
use crate::error::{Result, SealedMessageError};
use crate::session::session_commitment;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowEnvelope {
    #[serde(with = "crate::session::hex_bytes")]
    pub ct_e: Vec<u8>,
    #[serde(with = "crate::session::hex_array12")]
    pub iv_e: [u8; 12],
    #[serde(with = "crate::session::hex_array16")]
    pub tag_e: [u8; 16],
    pub key_version: u32,
}

/// `K_server = sha256(part_A ‖ part_B)` (§4.5 step 1). Parts are taken as
/// raw UTF-8/hex-agnostic bytes, matching how they arrive from `Config`.
pub fn server_escrow_key(part_a: &str, part_b: &str) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(part_a.len() + part_b.len());
    preimage.extend_from_slice(part_a.as_bytes());
    preimage.extend_from_slice(part_b.as_bytes());
    sha256(&preimage)
}

/// `seal_escrow(K_server, key_version, K_s)` from §4.5 steps 2-3.
pub fn seal_escrow(server_key: &[u8; 32], key_version: u32, session_key: &[u8; 32]) -> Result<EscrowEnvelope> {
    let iv_e = random_iv()?;
    let (ct_e, tag_e) = aes_gcm_encrypt(server_key, &iv_e, session_key)?;
    if ct_e.len() != 32 {
        return Err(SealedMessageError::Internal("escrow ciphertext is not 32 bytes".into()));
    }
    Ok(EscrowEnvelope { ct_e, iv_e, tag_e, key_version })
}

/// Recovers `K_s` from an escrow envelope. Callers that also hold the
/// expected commitment `C_s` should follow with `verify_commitment`; this
/// function alone does not check it (§4.9 step 6, "commitment mismatch").
pub fn unseal_escrow(server_key: &[u8; 32], envelope: &EscrowEnvelope) -> Result<[u8; 32]> {
    let plaintext = aes_gcm_decrypt(server_key, &envelope.iv_e, &envelope.ct_e, &envelope.tag_e)?;
    if plaintext.len() != 32 {
        return Err(SealedMessageError::Internal("unsealed escrow payload is not 32 bytes".into()));
    }
    let mut session_key = [0u8; 32];
    session_key.copy_from_slice(&plaintext);
    Ok(session_key)
}

/// `keccak256(K_s) == C_s`, the escrow-side half of I1.
pub fn verify_commitment(session_key: &[u8; 32], expected_commitment: &[u8; 32]) -> bool {
    &session_commitment(session_key) == expected_commitment
}
