//! HTTP client for the catalogue service.
//!
//! Implements the core `CatalogueClient` port. The catalogue is
//! rate-sensitive, so this client is only ever reached through the
//! cache-shielded `FilterResolver`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use dx_core::catalogue::CatalogueRecord;
use dx_core::ports::CatalogueClient;
use dx_core::{DxError, Result};

#[derive(Debug, Deserialize)]
struct CatalogueResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

pub struct HttpCatalogueClient {
    http: reqwest::Client,
    base: String,
}

impl HttpCatalogueClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DxError::Internal(anyhow::anyhow!(e)))?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<CatalogueResponse> {
        let url = format!("{}{path}", self.base);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DxError::Upstream("catalogue call timed out".into())
                } else {
                    DxError::Upstream(format!("catalogue call failed: {e}"))
                }
            })?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DxError::NotFound("catalogue item".into()));
        }
        if !resp.status().is_success() {
            return Err(DxError::Upstream(format!(
                "catalogue returned {}",
                resp.status()
            )));
        }
        resp.json::<CatalogueResponse>()
            .await
            .map_err(|e| DxError::Upstream(format!("malformed catalogue response: {e}")))
    }
}

#[async_trait]
impl CatalogueClient for HttpCatalogueClient {
    async fn lookup(&self, id: &str) -> Result<CatalogueRecord> {
        let resp = self.fetch("/item", &[("id", id)]).await?;
        let first = resp
            .results
            .into_iter()
            .next()
            .ok_or_else(|| DxError::NotFound(format!("catalogue item {id}")))?;
        serde_json::from_value(first)
            .map_err(|e| DxError::Upstream(format!("malformed catalogue item: {e}")))
    }

    async fn provider_of(&self, id: &str) -> Result<String> {
        let resp = self
            .fetch("/relationship", &[("id", id), ("rel", "provider")])
            .await?;
        let first = resp
            .results
            .into_iter()
            .next()
            .ok_or_else(|| DxError::NotFound(format!("no provider registered for {id}")))?;
        // Older catalogue records carry ownerUserId instead.
        first
            .get("providerUserId")
            .or_else(|| first.get("ownerUserId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| DxError::NotFound(format!("no provider registered for {id}")))
    }
}
