//! C9: ledger adapter.
//!
//! Read-only view over the external ledger (§4.9). `HttpLedgerAdapter` talks
//! to a deployed chain-indexer HTTP facade; `InMemoryLedgerAdapter` is the
//! fixture used by release-service tests and local development.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SealedMessageError};

pub const CONDITION_TIME: u8 = 1;
pub const CONDITION_PAYMENT: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub sender: String,
    pub receiver: String,
    pub uri: String,
    pub iv_m: String,
    pub tag_m: String,
    pub h_ct: String,
    pub metadata_keccak: String,
    pub ct_e: String,
    pub iv_e: String,
    pub tag_e: String,
    pub escrow_version: u32,
    pub c_s: String,
    pub h_r: String,
    pub created_at: DateTime<Utc>,
    pub unlock_time: DateTime<Utc>,
    pub required_payment: u128,
    pub paid_amount: u128,
    pub condition_mask: u8,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialView {
    pub unlock_time: DateTime<Utc>,
    pub required_payment: u128,
    pub paid_amount: u128,
    pub condition_mask: u8,
    pub is_unlocked: bool,
}

/// `isUnlocked` from §4.9: both flags are AND-only. The historical "OR"
/// semantics some deployments used is explicitly rejected (§9).
pub fn is_unlocked(
    condition_mask: u8,
    now: DateTime<Utc>,
    unlock_time: DateTime<Utc>,
    required_payment: u128,
    paid_amount: u128,
) -> bool {
    let time_ok = condition_mask & CONDITION_TIME == 0 || now >= unlock_time;
    let payment_ok = condition_mask & CONDITION_PAYMENT == 0 || paid_amount >= required_payment;
    time_ok && payment_ok
}

pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// External collaborator seam (§1 "Out of scope": the blockchain ledger
/// itself). Modeled as an async trait via a boxed future, matching the
/// suspension-point pattern used for wallet signing in `keystore.rs`.
pub trait LedgerAdapter: Send + Sync {
    fn get_message<'a>(&'a self, message_id: &'a str, viewer: &'a str) -> LedgerFuture<'a, MessageRecord>;
    fn get_financial_view<'a>(&'a self, message_id: &'a str) -> LedgerFuture<'a, FinancialView>;
}

pub struct HttpLedgerAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SealedMessageError::NetworkError(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into() })
    }
}

impl LedgerAdapter for HttpLedgerAdapter {
    fn get_message<'a>(&'a self, message_id: &'a str, viewer: &'a str) -> LedgerFuture<'a, MessageRecord> {
        Box::pin(async move {
            let url = format!("{}/messages/{}", self.base_url, message_id);
            let resp = self
                .client
                .get(&url)
                .query(&[("viewer", viewer)])
                .send()
                .await
                .map_err(|e| SealedMessageError::NetworkError(e.to_string()))?;

            match resp.status() {
                reqwest::StatusCode::NOT_FOUND => Err(SealedMessageError::NotFound),
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Err(SealedMessageError::Unauthorized),
                status if !status.is_success() => Err(SealedMessageError::NetworkError(format!("ledger returned {status}"))),
                _ => resp.json::<MessageRecord>().await.map_err(|e| SealedMessageError::NetworkError(e.to_string())),
            }
        })
    }

    fn get_financial_view<'a>(&'a self, message_id: &'a str) -> LedgerFuture<'a, FinancialView> {
        Box::pin(async move {
            let url = format!("{}/messages/{}/financial", self.base_url, message_id);
            let resp =
                self.client.get(&url).send().await.map_err(|e| SealedMessageError::NetworkError(e.to_string()))?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(SealedMessageError::NotFound);
            }
            if !resp.status().is_success() {
                return Err(SealedMessageError::NetworkError(format!("ledger returned {}", resp.status())));
            }
            resp.json::<FinancialView>().await.map_err(|e| SealedMessageError::NetworkError(e.to_string()))
        })
    }
}

/// In-memory fixture for tests and local development.
#[derive(Default)]
pub struct InMemoryLedgerAdapter {
    records: Mutex<HashMap<String, MessageRecord>>,
}

impl InMemoryLedgerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: MessageRecord) {
        self.records.lock().unwrap().insert(record.message_id.clone(), record);
    }

    pub fn set_paid_amount(&self, message_id: &str, paid_amount: u128) {
        if let Some(record) = self.records.lock().unwrap().get_mut(message_id) {
            record.paid_amount = paid_amount;
        }
    }

    pub fn revoke(&self, message_id: &str) {
        if let Some(record) = self.records.lock().unwrap().get_mut(message_id) {
            record.revoked = true;
        }
    }
}

impl LedgerAdapter for InMemoryLedgerAdapter {
    fn get_message<'a>(&'a self, message_id: &'a str, viewer: &'a str) -> LedgerFuture<'a, MessageRecord> {
        Box::pin(async move {
            let records = self.records.lock().unwrap();
            let record = records.get(message_id).ok_or(SealedMessageError::NotFound)?;
            let viewer_lower = viewer.trim().to_lowercase();
            if viewer_lower != record.sender.to_lowercase() && viewer_lower != record.receiver.to_lowercase() {
                return Err(SealedMessageError::Unauthorized);
            }
            Ok(record.clone())
        })
    }

    fn get_financial_view<'a>(&'a self, message_id: &'a str) -> LedgerFuture<'a, FinancialView> {
        Box::pin(async move {
            let records = self.records.lock().unwrap();
            let record = records.get(message_id).ok_or(SealedMessageError::NotFound)?;
            let unlocked =
                is_unlocked(record.condition_mask, Utc::now(), record.unlock_time, record.required_payment, record.paid_amount);
            Ok(FinancialView {
                unlock_time: record.unlock_time,
                required_payment: record.required_payment,
                paid_amount: record.paid_amount,
                condition_mask: record.condition_mask,
                is_unlocked: unlocked,
            })
        })
    }
}
