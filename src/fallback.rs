//! C3: fallback keystore.
//!
//! A purely deterministic, no-I/O receiver keypair derived from the
//! receiver's address and a server-held seed (§4.3). Used by a sender when
//! the ledger reports no registered public key for the receiver.

use crate::crypto::{keccak256, reduce_scalar_mod_n, secp256k1_pubkey_compressed, sha256};
use crate::error::Result;

/// `generate_fallback(address) -> (priv, pub)` from §4.3:
/// `H_keccak(seed ‖ addr_lower ‖ "fallback-v1")` reduced via SHA-256 mod n.
pub fn generate_fallback(seed: &str, address: &str) -> Result<([u8; 32], [u8; 33])> {
    let addr_lower = address.trim().to_lowercase();

    let mut preimage = Vec::with_capacity(seed.len() + addr_lower.len() + "fallback-v1".len());
    preimage.extend_from_slice(seed.as_bytes());
    preimage.extend_from_slice(addr_lower.as_bytes());
    preimage.extend_from_slice(b"fallback-v1");

    let keccak_digest = keccak256(&preimage);
    let priv_key = reduce_scalar_mod_n(sha256(&keccak_digest))?;
    let pub_key = secp256k1_pubkey_compressed(&priv_key)?;
    Ok((priv_key, pub_key))
}
