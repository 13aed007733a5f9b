//! # Tool Backend HTTP Client
//!
//! Thin client for the three backend operations the tool bridge can invoke:
//! caller lookup, portal-link SMS issuance, and callback persistence. These
//! services are conventional request/response collaborators; the only
//! gateway-side obligations are a bounded request timeout and bearer
//! authentication from configuration.

use crate::config::ToolBackendConfig;
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// What the caller-lookup service returns for a phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRecord {
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub id_document_on_file: bool,
    #[serde(default)]
    pub claim_count: u32,
    #[serde(default)]
    pub account_status: Option<String>,
}

/// HTTP client over the tool backend, one per call session.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: ToolBackendConfig,
}

impl BackendClient {
    pub fn new(config: ToolBackendConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Tool(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Look a caller up by phone number.
    pub async fn lookup_caller(&self, phone_number: &str) -> AppResult<CallerRecord> {
        let response = self
            .http
            .get(self.url(&self.config.caller_lookup_path))
            .bearer_auth(&self.config.api_key)
            .query(&[("phone_number", phone_number)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<CallerRecord>().await?)
    }

    /// Ask the SMS integration to text the caller a portal link.
    pub async fn send_portal_link(&self, phone_number: &str) -> AppResult<()> {
        self.http
            .post(self.url(&self.config.portal_link_path))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "phone_number": phone_number }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Persist a callback request for the caller.
    pub async fn schedule_callback(
        &self,
        phone_number: &str,
        name: Option<&str>,
        preferred_time: Option<&str>,
    ) -> AppResult<()> {
        self.http
            .post(self.url(&self.config.callback_path))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "phone_number": phone_number,
                "name": name,
                "preferred_time": preferred_time,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_duplicate_slashes() {
        let client = BackendClient::new(ToolBackendConfig {
            base_url: "http://backend.internal/".to_string(),
            ..ToolBackendConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("/api/callers/lookup"),
            "http://backend.internal/api/callers/lookup"
        );
    }

    #[test]
    fn test_caller_record_tolerates_partial_payloads() {
        let record: CallerRecord = serde_json::from_str(r#"{"found": true}"#).unwrap();
        assert!(record.found);
        assert!(record.full_name.is_none());
        assert_eq!(record.claim_count, 0);
    }
}
