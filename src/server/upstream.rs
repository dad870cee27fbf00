//! Upstream LLM aggregator client used by the forwarding handler.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::ServerConfig;
use crate::provider::HistoryEntry;

/// Boxed future type for upstream calls.
pub type UpstreamFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP I/O timeouts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Generations can be slow, thinking models especially.
const CLIENT_TIMEOUT: Duration = Duration::from_mins(2);

/// Failure talking to the aggregator.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No API key is configured.
    #[error("API key is missing")]
    MissingApiKey,
    /// The aggregator refused the configured key.
    #[error("API key rejected by upstream: {0}")]
    Unauthorized(String),
    /// Any other non-success status.
    #[error("upstream status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// Network failure.
    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The body was not a chat completion.
    #[error("upstream response malformed: {0}")]
    Decode(String),
    /// The completion contained no text.
    #[error("upstream returned an empty completion")]
    EmptyCompletion,
}

impl UpstreamError {
    /// Whether the failure is an authorization problem with the API key.
    #[must_use]
    pub fn is_api_key_error(&self) -> bool {
        self.to_string().contains("API key")
    }
}

/// A completion request resolved against the model catalog.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamRequest {
    /// Aggregator model id.
    pub model: String,
    /// Full conversation including the new prompt as the last entry.
    pub messages: Vec<HistoryEntry>,
    /// Sampling temperature, sent for thinking models only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// An LLM aggregation API.
pub trait Upstream: Send + Sync {
    /// Generate one completion.
    fn generate(&self, request: UpstreamRequest) -> UpstreamFuture<'_, Result<String, UpstreamError>>;
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat-completions aggregator speaking the `OpenAI` wire format (`OpenRouter` by default).
pub struct AggregatorUpstream {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AggregatorUpstream {
    /// Build a client from the server configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CLIENT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.upstream_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post_completion(&self, request: UpstreamRequest) -> Result<String, UpstreamError> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Unauthorized(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: CompletionBody = response
            .json()
            .await
            .map_err(|err| UpstreamError::Decode(err.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(UpstreamError::EmptyCompletion)
    }
}

impl Upstream for AggregatorUpstream {
    fn generate(&self, request: UpstreamRequest) -> UpstreamFuture<'_, Result<String, UpstreamError>> {
        Box::pin(self.post_completion(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    #[test]
    fn test_api_key_errors_are_recognised() {
        assert!(UpstreamError::MissingApiKey.is_api_key_error());
        assert!(UpstreamError::Unauthorized("bad key".to_string()).is_api_key_error());
        assert!(!UpstreamError::EmptyCompletion.is_api_key_error());
        assert!(
            !UpstreamError::Status {
                status: 429,
                body: "slow down".to_string()
            }
            .is_api_key_error()
        );
    }

    #[test]
    fn test_request_omits_temperature_when_absent() {
        let request = UpstreamRequest {
            model: "openai/gpt-4o".to_string(),
            messages: vec![HistoryEntry {
                role: Role::User,
                content: "Hello".to_string(),
            }],
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let upstream = AggregatorUpstream::new(&ServerConfig::default()).unwrap();
        let err = upstream
            .generate(UpstreamRequest {
                model: "openai/gpt-4o".to_string(),
                messages: Vec::new(),
                temperature: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MissingApiKey));
    }
}
