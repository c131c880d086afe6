//! CAS adapter.
//!
//! Thin HTTP facade over a content-addressed blob store run by a separate
//! service. Fans out across an ordered gateway list with a per-gateway
//! timeout and try-next-on-error.

use std::time::Duration;

use crate::error::{Result, SealedMessageError};

pub struct CasGetResult {
    pub blob: Vec<u8>,
    pub is_stub: bool,
}

pub struct CasClient {
    client: reqwest::Client,
    gateways: Vec<String>,
    allow_stub_uris: bool,
}

impl CasClient {
    pub fn new(gateways: Vec<String>, gateway_timeout: Duration, allow_stub_uris: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(gateway_timeout)
            .build()
            .map_err(|e| SealedMessageError::NetworkError(e.to_string()))?;
        Ok(Self { client, gateways, allow_stub_uris })
    }

    /// Fetches the blob at `uri`. When `allow_stub_uris` is set and `uri`
    /// contains the substring `"stub"`, returns a canned plaintext blob
    /// without touching the network. A test hook production deployments
    /// should leave disabled.
    pub async fn get(&self, uri: &str) -> Result<CasGetResult> {
        if self.allow_stub_uris && uri.contains("stub") {
            return Ok(CasGetResult { blob: stub_blob(), is_stub: true });
        }

        let mut last_err = None;
        for gateway in &self.gateways {
            let url = format!("{}/{}", gateway.trim_end_matches('/'), uri.trim_start_matches('/'));
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(bytes) => return Ok(CasGetResult { blob: bytes.to_vec(), is_stub: false }),
                    Err(e) => last_err = Some(SealedMessageError::NetworkError(e.to_string())),
                },
                Ok(resp) => last_err = Some(SealedMessageError::NetworkError(format!("gateway returned {}", resp.status()))),
                Err(e) => last_err = Some(SealedMessageError::NetworkError(e.to_string())),
            }
        }
        Err(last_err.unwrap_or_else(|| SealedMessageError::NetworkError("no CAS gateways configured".into())))
    }

    /// Uploads `bytes` to the first configured gateway and returns its CID.
    pub async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let gateway = self
            .gateways
            .first()
            .ok_or_else(|| SealedMessageError::NetworkError("no CAS gateways configured".into()))?;
        let url = format!("{}/add", gateway.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| SealedMessageError::NetworkError(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SealedMessageError::NetworkError(format!("CAS upload failed with status {}", resp.status())));
        }
        resp.text().await.map(|s| s.trim().to_string()).map_err(|e| SealedMessageError::NetworkError(e.to_string()))
    }
}

fn stub_blob() -> Vec<u8> {
    b"stub-plaintext-payload".to_vec()
}
