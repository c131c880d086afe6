//! Crate-wide error taxonomy (§7). Every fallible library API returns
//! `Result<T, SealedMessageError>`; `anyhow` is reserved for the binary
//! entrypoint, matching the teacher's own `main.rs` boundary.

use thiserror::Error;

// `CiphertextHashMismatch` from §7's table has no variant here on purpose:
// the release service treats it as warn-only and surfaces it as a response
// flag (`ciphertextHashVerified`), never as an `Err` (§4.10 step 8).
#[derive(Debug, Error)]
pub enum SealedMessageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// CSPRNG failure. Never retried locally, surfaced as-is.
    #[error("entropy source unavailable")]
    EntropyUnavailable,

    /// AES-GCM tag mismatch. Swallowed by the decrypt engine while trying
    /// envelope-unwrap candidates; fatal once raised during payload
    /// decryption (§4.11 step 6).
    #[error("authentication failed")]
    AuthFailure,

    /// I1/I2/I4 violation.
    #[error("commitment mismatch")]
    CommitmentMismatch,

    #[error("no envelope record for this commitment")]
    EnvelopeMissing,

    #[error("message is locked")]
    Locked,

    #[error("message has been revoked")]
    Revoked,

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("mapping conflict")]
    MappingConflict,

    #[error("short-hash space exhausted")]
    ShortHashExhausted,

    #[error("network error: {0}")]
    NetworkError(String),

    /// CAS blob shorter than a single AES-GCM tag.
    #[error("ciphertext blob shorter than one auth tag")]
    ShortCiphertext,

    /// Catch-all for invariants that should be unreachable outside of a
    /// bug (wrong-length buffers passed between trusted internal callers).
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SealedMessageError>;
