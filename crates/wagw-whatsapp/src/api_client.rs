//! HTTP client for the WhatsApp session gateway.
//!
//! Provides low-level request helpers with retry logic and error mapping.
//! Every call is scoped to one gateway instance and authenticated with the
//! `apikey` header.

use crate::error::{WhatsAppError, WhatsAppErrorCode, WhatsAppResult};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the session gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway base URL, e.g. `http://127.0.0.1:8080`.
    pub base_url: String,
    /// Value of the `apikey` header.
    pub api_key: String,
    /// Gateway instance holding the WhatsApp session.
    pub instance_name: String,
    /// Timeout in seconds for API calls.
    pub timeout_sec: u64,
    /// Maximum retries for transient failures of read calls.
    pub max_retries: u32,
    /// Connection-state poll interval for the session watcher.
    pub poll_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            api_key: String::new(),
            instance_name: "franky45".into(),
            timeout_sec: 30,
            max_retries: 2,
            poll_interval_secs: 5,
        }
    }
}

/// Low-level HTTP client for the session gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Create a new client from configuration.
    pub fn new(config: &GatewayConfig) -> WhatsAppResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(WhatsAppError::not_configured("Gateway base URL is empty"));
        }
        if config.instance_name.trim().is_empty() {
            return Err(WhatsAppError::not_configured("Gateway instance name is empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| WhatsAppError::network(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ─── URL helpers ─────────────────────────────────────────────────

    /// Instance-scoped URL: `{base}/{group}/{action}/{instance}`.
    pub fn instance_url(&self, group: &str, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            group,
            action,
            self.config.instance_name
        )
    }

    // ─── HTTP primitives ─────────────────────────────────────────────

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.config.api_key.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&self.config.api_key) {
                headers.insert("apikey", v);
            }
        }
        headers
    }

    /// GET with automatic retry.
    pub async fn get(&self, url: &str) -> WhatsAppResult<serde_json::Value> {
        self.get_with_retry(url).await
    }

    /// POST JSON body. One attempt only; sends are never repeated.
    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> WhatsAppResult<serde_json::Value> {
        debug!("POST {}", url);
        let resp = self
            .client
            .post(url)
            .headers(self.auth_headers())
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| WhatsAppError::network(e.to_string()))?;
        Self::read_response(resp).await
    }

    async fn read_response(resp: reqwest::Response) -> WhatsAppResult<serde_json::Value> {
        let status = resp.status().as_u16();
        let resp_body = resp.text().await.unwrap_or_default();

        if !(200..300).contains(&status) {
            return Err(WhatsAppError::from_api_response(status, &resp_body));
        }
        if resp_body.trim().is_empty() {
            return Ok(serde_json::json!({}));
        }
        serde_json::from_str(&resp_body)
            .map_err(|e| WhatsAppError::serialization(format!("JSON parse error: {}", e)))
    }

    // ─── Read path with retry ────────────────────────────────────────

    async fn get_with_retry(&self, url: &str) -> WhatsAppResult<serde_json::Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!("GET {} (attempt {})", url, attempt);

            let req = self.client.get(url).headers(self.auth_headers());

            match req.send().await {
                Ok(r) => {
                    let err = match Self::read_response(r).await {
                        Ok(v) => return Ok(v),
                        Err(e) if e.http_status.is_some() => e,
                        Err(e) => return Err(e),
                    };
                    if Self::is_retryable(&err) && attempt <= self.config.max_retries {
                        warn!("Retryable gateway error (attempt {}): {}", attempt, err);
                        tokio::time::sleep(Self::backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    if attempt <= self.config.max_retries {
                        warn!("Gateway network error (attempt {}): {}", attempt, e);
                        tokio::time::sleep(Self::backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(WhatsAppError::network(e.to_string()));
                }
            }
        }
    }

    fn is_retryable(err: &WhatsAppError) -> bool {
        matches!(
            err.code,
            WhatsAppErrorCode::RateLimited | WhatsAppErrorCode::NetworkError
        ) || matches!(err.http_status, Some(500) | Some(502) | Some(503))
    }

    /// Exponential backoff with jitter.
    fn backoff_delay(attempt: u32) -> Duration {
        let base_ms = 500u64 * 2u64.pow(attempt.saturating_sub(1));
        let jitter = rand::random::<u64>() % 250;
        Duration::from_millis(base_ms + jitter)
    }
}
