//! C8: mapping store.
//!
//! `shortHash -> MappingRecord` plus a secondary `metadataKeccak ->
//! shortHash` index, so a receiver who only knows the keccak can still find
//! the metadata envelope (§4.8). Same file-backed, lock-then-rename
//! persistence shape as the envelope store (C7).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SealedMessageError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MappingRecord {
    pub short_hash: String,
    pub full_hash: String,
    pub metadata_keccak: Option<String>,
    pub public_hash: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingStoreData {
    primary: HashMap<String, MappingRecord>,
    #[serde(default)]
    by_metadata_keccak: HashMap<String, String>,
}

pub struct MappingStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl MappingStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    fn load(&self) -> Result<MappingStoreData> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(MappingStoreData::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| SealedMessageError::Internal(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MappingStoreData::default()),
            Err(e) => Err(SealedMessageError::Internal(e.to_string())),
        }
    }

    fn persist(&self, data: &MappingStoreData) -> Result<()> {
        let json = serde_json::to_vec_pretty(data).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &json).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| SealedMessageError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn is_taken(&self, short_hash: &str) -> Result<bool> {
        Ok(self.load()?.primary.contains_key(short_hash))
    }

    /// Writes `record`. A `shortHash` already occupied by a *different*
    /// record is a **MappingConflict** (§3 "uniqueness is probabilistic,
    /// the store MUST reject collisions", P7); re-saving the same record
    /// unchanged stays idempotent. A `metadataKeccak` already indexed under
    /// a different `shortHash` is also a **MappingConflict** (§4.8) rather
    /// than a silent merge: two distinct shortHashes claiming the same
    /// underlying metadata bytes indicates a bug upstream, not a
    /// legitimate re-upload.
    pub fn save(&self, record: MappingRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        let mut data = self.load()?;

        if let Some(existing) = data.primary.get(&record.short_hash) {
            if existing != &record {
                return Err(SealedMessageError::MappingConflict);
            }
        }

        if let Some(keccak) = &record.metadata_keccak {
            if let Some(existing) = data.by_metadata_keccak.get(keccak) {
                if existing != &record.short_hash {
                    return Err(SealedMessageError::MappingConflict);
                }
            }
            data.by_metadata_keccak.insert(keccak.clone(), record.short_hash.clone());
        }

        data.primary.insert(record.short_hash.clone(), record);
        self.persist(&data)
    }

    pub fn get_by_short_hash(&self, short_hash: &str) -> Result<Option<MappingRecord>> {
        Ok(self.load()?.primary.get(short_hash).cloned())
    }

    /// Tolerates an absent secondary index entirely (§4.8): a receiver who
    /// only holds the keccak and never saw the shortHash gets `None`, not
    /// an error.
    pub fn get_by_metadata_keccak(&self, keccak: &str) -> Result<Option<MappingRecord>> {
        let data = self.load()?;
        Ok(data.by_metadata_keccak.get(keccak).and_then(|short_hash| data.primary.get(short_hash).cloned()))
    }
}
