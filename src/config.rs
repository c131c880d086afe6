//! Ambient configuration, loaded from the environment.
//!
//! Unlike the teacher's `config.json`-backed trading parameters, the values
//! here are mostly secrets or deployment topology, so they come from env
//! vars (via `dotenvy`) rather than a tracked file.

use crate::error::{Result, SealedMessageError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Hex, non-empty. Half of `K_server = sha256(part_A ‖ part_B)`.
    pub escrow_key_part_a: String,
    /// Hex, non-empty. Other half of `K_server`.
    pub escrow_key_part_b: String,
    /// Monotone integer stamped onto every escrow envelope, default 1.
    pub escrow_key_version: u32,
    /// Non-empty seed for deterministic fallback receiver keys.
    pub fallback_seed: String,
    /// Ordered CAS gateway base URLs; first is tried first.
    pub cas_gateways: Vec<String>,
    /// Bind address for the release-service HTTP surface.
    pub release_service_bind_addr: String,
    /// Per-gateway CAS fetch timeout, seconds (default 15s).
    pub gateway_timeout_secs: u64,
    /// Ledger read timeout, seconds (default 30s).
    pub ledger_timeout_secs: u64,
    /// Whether the `"stub"`-substring CAS short-circuit is honored.
    /// Defaults to `false`: a test hook production deployments
    /// should disable.
    pub allow_stub_uris: bool,
    /// Whether decrypt-engine KDF candidates (b)-(d) are tried. Defaults
    /// to `false`; fresh deployments only ever need candidate (a).
    pub legacy_accept_candidates: bool,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from the process environment. Fails with
    /// `InvalidArgument` if either escrow key part or the fallback seed is
    /// missing: these are load-bearing secrets, not tunables with a safe
    /// default. Escrow key parts must additionally be valid hex (§6).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let escrow_key_part_a = env_string("ESCROW_KEY_PART_A")
            .ok_or_else(|| SealedMessageError::InvalidArgument("ESCROW_KEY_PART_A missing or empty".into()))?;
        let escrow_key_part_b = env_string("ESCROW_KEY_PART_B")
            .ok_or_else(|| SealedMessageError::InvalidArgument("ESCROW_KEY_PART_B missing or empty".into()))?;
        if hex::decode(&escrow_key_part_a).is_err() {
            return Err(SealedMessageError::InvalidArgument("ESCROW_KEY_PART_A is not valid hex".into()));
        }
        if hex::decode(&escrow_key_part_b).is_err() {
            return Err(SealedMessageError::InvalidArgument("ESCROW_KEY_PART_B is not valid hex".into()));
        }
        let fallback_seed = env_string("FALLBACK_SEED")
            .ok_or_else(|| SealedMessageError::InvalidArgument("FALLBACK_SEED missing or empty".into()))?;

        let cas_gateways = env_string("CAS_GATEWAYS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|| vec!["https://ipfs.io/ipfs".to_string()]);

        Ok(Self {
            escrow_key_part_a,
            escrow_key_part_b,
            escrow_key_version: env_u32("ESCROW_KEY_VERSION", 1),
            fallback_seed,
            cas_gateways,
            release_service_bind_addr: env_string("RELEASE_SERVICE_BIND_ADDR")
                .unwrap_or_else(|| "127.0.0.1:8787".to_string()),
            gateway_timeout_secs: env_u64("GATEWAY_TIMEOUT_SECS", 15),
            ledger_timeout_secs: env_u64("LEDGER_TIMEOUT_SECS", 30),
            allow_stub_uris: env_bool("ALLOW_STUB_URIS", false),
            legacy_accept_candidates: env_bool("LEGACY_ACCEPT_CANDIDATES", false),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            escrow_key_part_a: "a1b2c3".to_string(),
            escrow_key_part_b: "d4e5f6".to_string(),
            escrow_key_version: 1,
            fallback_seed: "test-fallback-seed".to_string(),
            cas_gateways: vec!["https://gateway.example".to_string()],
            release_service_bind_addr: "127.0.0.1:8787".to_string(),
            gateway_timeout_secs: 15,
            ledger_timeout_secs: 30,
            allow_stub_uris: true,
            legacy_accept_candidates: false,
        }
    }
}
