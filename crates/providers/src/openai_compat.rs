//! OpenAI-compatible chat-completions client.
//!
//! Works with model serving endpoints (`https://{host}/serving-endpoints`),
//! OpenAI itself, and any local server exposing `/chat/completions`.
//! One `complete` call is exactly one HTTP request: the retry policy
//! lives in the tool loop, not here.

use async_trait::async_trait;
use servechat_config::EndpointConfig;
use servechat_core::error::ProviderError;
use servechat_core::provider::{ModelResponse, ProviderRequest};
use std::time::Duration;
use tracing::{debug, warn};

use crate::wire;

/// Seconds to wait after a 429 when the endpoint sends no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible model endpoint client.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new client for `base_url` (without the `/chat/completions` suffix).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Client for a workspace's serving endpoints (convenience constructor).
    pub fn databricks(host: &str, token: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            "databricks",
            servechat_config::serving_endpoints_url(host),
            token,
        )
    }

    /// Build from the `[endpoint]` config section.
    pub fn from_config(endpoint: &EndpointConfig) -> Result<Self, ProviderError> {
        let base_url = endpoint.resolved_base_url().ok_or_else(|| {
            ProviderError::NotConfigured(
                "set endpoint.host / endpoint.base_url or DATABRICKS_HOST".into(),
            )
        })?;
        let token = endpoint.token.clone().ok_or_else(|| {
            ProviderError::NotConfigured("set endpoint.token or DATABRICKS_TOKEN".into())
        })?;
        let name = if endpoint.base_url.is_some() {
            "openai-compat"
        } else {
            "databricks"
        };
        Self::new(name, base_url, token)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => ProviderError::AuthenticationFailed(if body.is_empty() {
            "Invalid token or insufficient permissions".into()
        } else {
            body
        }),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl servechat_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = wire::encode_request(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !(200..300).contains(&status) {
            warn!(provider = %self.name, status, body = %text, "Endpoint returned error");
            return Err(status_error(status, retry_after, text));
        }

        let parsed = wire::decode_response(&text)?;
        debug!(
            provider = %self.name,
            finish_reason = %parsed.finish_reason,
            tool_calls = parsed.tool_calls.len(),
            total_tokens = parsed.usage.total_tokens,
            "Completion received"
        );
        Ok(parsed)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servechat_core::Provider;

    #[test]
    fn databricks_constructor_normalises_host() {
        let provider =
            OpenAiCompatProvider::databricks("https://adb-1.azuredatabricks.net/", "dapi").unwrap();
        assert_eq!(provider.name(), "databricks");
        assert_eq!(
            provider.base_url(),
            "https://adb-1.azuredatabricks.net/serving-endpoints"
        );
    }

    #[test]
    fn from_config_requires_token_and_url() {
        let mut endpoint = EndpointConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&endpoint),
            Err(ProviderError::NotConfigured(_))
        ));

        endpoint.base_url = Some("http://localhost:8080/v1/".into());
        assert!(OpenAiCompatProvider::from_config(&endpoint).is_err());

        endpoint.token = Some("t".into());
        let provider = OpenAiCompatProvider::from_config(&endpoint).unwrap();
        assert_eq!(provider.base_url(), "http://localhost:8080/v1");
        assert_eq!(provider.name(), "openai-compat");
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(429, Some(12), String::new()),
            ProviderError::RateLimited { retry_after_secs: 12 }
        ));
        assert!(matches!(
            status_error(429, None, String::new()),
            ProviderError::RateLimited {
                retry_after_secs: DEFAULT_RETRY_AFTER_SECS
            }
        ));
        assert!(matches!(
            status_error(403, None, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));

        let server_side = status_error(503, None, "overloaded".into());
        assert!(server_side.is_transport());
        let client_side = status_error(400, None, "bad".into());
        assert!(!client_side.is_transport());
    }
}
