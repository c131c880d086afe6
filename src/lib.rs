//! SealedMessage: hybrid-encryption envelope/escrow pipeline and release
//! service. See `DESIGN.md` for the grounding ledger and `SPEC_FULL.md`
//! for the full requirements this crate implements.

pub mod cas;
pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod envelope_store;
pub mod error;
pub mod escrow;
pub mod fallback;
pub mod keystore;
pub mod ledger;
pub mod mapping_store;
pub mod metadata;
pub mod release;
pub mod session;
