//! C7: envelope store.
//!
//! File-backed map `C_s -> ReceiverEnvelopeRecord`. Writes go to a sibling
//! temp file then `rename`, so a reader never observes a partially-written
//! file; a single in-process `Mutex` serializes writers (§4.7, §5).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SealedMessageError};
use crate::session::ReceiverEnvelope;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub reason: Option<String>,
    pub tx_hash: Option<String>,
    pub released_by: Option<String>,
    pub released_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverEnvelopeRecord {
    pub c_s: String,
    pub h_r: String,
    pub h_ct: String,
    pub metadata_short_hash: Option<String>,
    pub metadata_keccak: Option<String>,
    pub pub_sender: String,
    pub envelope: ReceiverEnvelope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub release: Option<ReleaseInfo>,
}

pub struct EnvelopeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EnvelopeStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    fn load(&self) -> Result<HashMap<String, ReceiverEnvelopeRecord>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SealedMessageError::Internal(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(SealedMessageError::Internal(e.to_string())),
        }
    }

    fn persist(&self, records: &HashMap<String, ReceiverEnvelopeRecord>) -> Result<()> {
        let json = serde_json::to_vec_pretty(records).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Idempotent by `C_s`: a second `save` for an already-known commitment
    /// preserves the original `createdAt` (§4.7, P6).
    pub fn save(&self, mut record: ReceiverEnvelopeRecord) -> Result<()> {
        if record.c_s.is_empty() || record.h_r.is_empty() || record.h_ct.is_empty() {
            return Err(SealedMessageError::InvalidArgument(
                "commitment, receiver-envelope hash and ciphertext hash are required".into(),
            ));
        }

        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.load()?;

        if let Some(existing) = records.get(&record.c_s) {
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();

        records.insert(record.c_s.clone(), record);
        self.persist(&records)
    }

    pub fn get_by_commitment(&self, c_s: &str) -> Result<Option<ReceiverEnvelopeRecord>> {
        Ok(self.load()?.get(c_s).cloned())
    }

    /// Linear scan, acceptable at current scale (§4.7).
    pub fn find_by_envelope_hash(&self, h_r: &str) -> Result<Option<ReceiverEnvelopeRecord>> {
        Ok(self.load()?.into_values().find(|record| record.h_r == h_r))
    }

    pub fn mark_released(
        &self,
        c_s: &str,
        reason: Option<String>,
        tx_hash: Option<String>,
        released_by: Option<String>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.load()?;
        let record = records.get_mut(c_s).ok_or(SealedMessageError::EnvelopeMissing)?;
        record.release = Some(ReleaseInfo { reason, tx_hash, released_by, released_at: Utc::now() });
        record.updated_at = Utc::now();
        self.persist(&records)
    }
}
