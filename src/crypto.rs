//! Crypto primitives.
//!
//! Pure, allocation-explicit wrappers over AES-256-GCM, secp256k1 ECDH,
//! SHA-256 and Keccak-256. No component above this module touches an AEAD
//! or elliptic-curve type directly; everyone goes through here.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{Result, SealedMessageError};

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// AES-256-GCM encrypt. Returns `(ciphertext, tag)`, never interleaved.
/// Callers that need the CAS wire format concatenate `ciphertext ‖ tag`
/// themselves (see `session.rs` / the message-payload path).
pub fn aes_gcm_encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_LEN])> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    let mut combined = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SealedMessageError::Internal("aes-256-gcm encrypt failed".into()))?;
    let tag_at = combined.len() - TAG_LEN;
    let tag_bytes = combined.split_off(tag_at);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((combined, tag))
}

/// AES-256-GCM decrypt. Fails with `AuthFailure` on any tag mismatch.
/// Never partial-decrypts.
pub fn aes_gcm_decrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8], tag: &[u8; TAG_LEN]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);
    cipher
        .decrypt(nonce, combined.as_slice())
        .map_err(|_| SealedMessageError::AuthFailure)
}

/// Raw secp256k1 ECDH: scalar-multiplies `pub_point` by `priv_scalar` and
/// returns the resulting point in uncompressed SEC1 form
/// (`0x04 ‖ X(32) ‖ Y(32)`, 65 bytes). Callers slice `[1..33]` to obtain the
/// X-coordinate derived key.
pub fn ecdh(priv_key: &[u8], pub_key: &[u8]) -> Result<[u8; 65]> {
    let sk = SecretKey::from_slice(priv_key)
        .map_err(|_| SealedMessageError::InvalidArgument("invalid ECDH private key".into()))?;
    let pk = PublicKey::from_sec1_bytes(pub_key)
        .map_err(|_| SealedMessageError::InvalidArgument("invalid ECDH public key".into()))?;

    let shared_point = (pk.to_projective() * *sk.to_nonzero_scalar()).to_affine();
    let encoded = shared_point.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    if bytes.len() != 65 {
        return Err(SealedMessageError::Internal("unexpected ECDH point encoding length".into()));
    }
    let mut out = [0u8; 65];
    out.copy_from_slice(bytes);
    Ok(out)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// `n` bytes from the platform CSPRNG. Fails with `EntropyUnavailable`
/// rather than silently degrading to a PRNG.
pub fn random_bytes(n: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|_| SealedMessageError::EntropyUnavailable)?;
    Ok(buf)
}

pub fn random_iv() -> Result<[u8; IV_LEN]> {
    let bytes = random_bytes(IV_LEN)?;
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}

pub fn random_session_key() -> Result<[u8; KEY_LEN]> {
    let bytes = random_bytes(KEY_LEN)?;
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

// secp256k1 group order n, big-endian.
const SECP256K1_ORDER: [u8; 32] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE, 0xBA, 0xAE, 0xDC,
    0xE6, 0xAF, 0x48, 0xA0, 0x3B, 0xBF, 0xD2, 0x5E, 0x8C, 0xD0, 0x36, 0x41, 0x41,
];

fn be_geq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    for i in 0..32 {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    true
}

fn be_sub(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow: i16 = 0;
    for i in (0..32).rev() {
        let mut diff = a[i] as i16 - b[i] as i16 - borrow;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out[i] = diff as u8;
    }
    out
}

/// Reduce a 256-bit big-endian value mod the secp256k1 curve order and
/// reject the zero scalar. `hash` is always < 2^256, and `2^256 - n` is
/// negligibly small, so a single conditional subtraction fully reduces it.
/// Used to turn a hash digest into a private scalar per the `priv =
/// H(...) mod n` derivation used by the identity and fallback keystores.
pub fn reduce_scalar_mod_n(hash: [u8; 32]) -> Result<[u8; 32]> {
    let reduced = if be_geq(&hash, &SECP256K1_ORDER) { be_sub(&hash, &SECP256K1_ORDER) } else { hash };
    if reduced.iter().all(|&b| b == 0) {
        return Err(SealedMessageError::Internal("derived zero private scalar".into()));
    }
    Ok(reduced)
}

/// `secp256k1_pub(priv, compressed=true)`.
pub fn secp256k1_pubkey_compressed(priv_key: &[u8; 32]) -> Result<[u8; 33]> {
    let sk = SecretKey::from_slice(priv_key)
        .map_err(|_| SealedMessageError::InvalidArgument("invalid private scalar".into()))?;
    let encoded = sk.public_key().to_encoded_point(true);
    let bytes = encoded.as_bytes();
    if bytes.len() != 33 {
        return Err(SealedMessageError::Internal("unexpected compressed pubkey length".into()));
    }
    let mut out = [0u8; 33];
    out.copy_from_slice(bytes);
    Ok(out)
}
