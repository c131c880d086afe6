//! C2: identity keystore.
//!
//! Deterministically derives a per-address encryption keypair from a
//! wallet signature (§4.2). Caches the signature (never the private key)
//! and the derived compressed public key, keyed by lowercased address.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::crypto::{reduce_scalar_mod_n, secp256k1_pubkey_compressed, sha256};
use crate::error::{Result, SealedMessageError};

pub type SignFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Wallet-signing is an external suspension point (§5): the signer almost
/// always round-trips through a browser extension or hardware wallet, so
/// it is modeled as async rather than synthesizing a blocking facade over
/// it (§9 "Async/blocking").
pub trait WalletSigner: Send + Sync {
    fn sign<'a>(&'a self, message: &'a [u8]) -> SignFuture<'a>;
}

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// `M_addr` from §3: the exact bytes the wallet is asked to sign.
pub fn encryption_key_message(address: &str) -> Vec<u8> {
    format!("SealedMessage|EncryptionKey|v1\nAddress:{}", normalize_address(address)).into_bytes()
}

struct CachedIdentity {
    signature: Vec<u8>,
    pub_key: [u8; 33],
}

/// Per-process, in-memory cache of derived identity keypairs. Injected as
/// a capability into whatever component needs it (§9 "Global state").
/// Never reached via an ambient global.
#[derive(Default)]
pub struct IdentityKeystore {
    cache: Mutex<HashMap<String, CachedIdentity>>,
}

impl IdentityKeystore {
    pub fn new() -> Self {
        Self { cache: Mutex::new(HashMap::new()) }
    }

    /// Returns the cached or freshly-derived compressed public key for
    /// `address`. Never returns (or caches) the private scalar.
    pub async fn get_or_create_pub(&self, address: &str, signer: &dyn WalletSigner) -> Result<[u8; 33]> {
        let addr = normalize_address(address);

        if let Some(cached) = self.cache.lock().unwrap().get(&addr) {
            return Ok(cached.pub_key);
        }

        let message = encryption_key_message(&addr);
        let signature = signer.sign(&message).await?;
        if signature.len() < 65 {
            return Err(SealedMessageError::InvalidArgument(format!(
                "wallet signature too short: {} bytes, need >= 65",
                signature.len()
            )));
        }

        let priv_key = reduce_scalar_mod_n(sha256(&signature))?;
        let pub_key = secp256k1_pubkey_compressed(&priv_key)?;

        self.cache.lock().unwrap().insert(addr, CachedIdentity { signature, pub_key });
        Ok(pub_key)
    }

    /// Re-derives the private scalar for an address already present in
    /// the cache (used by the decrypt engine, which needs the scalar, not
    /// just the public key). Returns `Unauthorized` if the address has
    /// never been derived in this process.
    pub fn private_key_for(&self, address: &str) -> Result<[u8; 32]> {
        let addr = normalize_address(address);
        let cache = self.cache.lock().unwrap();
        let cached = cache.get(&addr).ok_or(SealedMessageError::Unauthorized)?;
        reduce_scalar_mod_n(sha256(&cached.signature))
    }

    /// Clears the cached signature and public key for `address` (explicit
    /// sign-out, §4.2).
    pub fn clear(&self, address: &str) {
        self.cache.lock().unwrap().remove(&normalize_address(address));
    }
}
