//! HTTP completion provider that posts to the forwarding server.

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::config::ClientConfig;
use crate::provider::wire::{ChatRequest, ChatResponse, ErrorBody};
use crate::provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, ProviderError, ProviderFuture,
};

/// Message reported when the caller cancels an in-flight request.
const ABORT_MESSAGE: &str = "The user aborted a request";

/// Async client for the `/api/chat` forwarding route.
pub struct HttpCompletionProvider {
    client: Client,
    endpoint: String,
}

impl HttpCompletionProvider {
    /// Build a client for `config.endpoint`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post_chat(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = ChatRequest {
            message: Some(request.message),
            history: request.history,
            model: Some(request.model),
            priority: Some(request.priority),
        };

        let url = format!("{}/api/chat", self.endpoint);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            };
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        Ok(CompletionResponse {
            text: body.response,
        })
    }
}

impl CompletionProvider for HttpCompletionProvider {
    fn complete(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>> {
        Box::pin(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("completion request cancelled before settlement");
                    Err(ProviderError::Aborted(ABORT_MESSAGE.to_string()))
                }
                result = self.post_chat(request) => result,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::core::message::{Priority, Role};
    use crate::provider::HistoryEntry;
    use crate::server::{AppState, create_router};
    use crate::server::upstream::UpstreamError;
    use crate::testing::{ScriptedUpstream, UpstreamScript};

    async fn spawn_server(upstream: Arc<ScriptedUpstream>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(Arc::new(AppState::new(upstream)));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider_for(endpoint: String) -> HttpCompletionProvider {
        let config = ClientConfig {
            endpoint,
            ..ClientConfig::default()
        };
        HttpCompletionProvider::new(&config).unwrap()
    }

    fn request(message: &str, model: &str) -> CompletionRequest {
        CompletionRequest {
            history: vec![HistoryEntry {
                role: Role::User,
                content: "earlier".to_string(),
            }],
            message: message.to_string(),
            model: model.to_string(),
            priority: Priority::Medium,
        }
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![UpstreamScript::Reply(
            "Hi there".to_string(),
        )]));
        let provider = provider_for(spawn_server(Arc::clone(&upstream)).await);

        let response = provider
            .complete(request("Hello", "gemini-2.5-flash"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.text, "Hi there");
        let seen = upstream.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn test_error_body_becomes_http_error() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![]));
        let provider = provider_for(spawn_server(upstream).await);

        let err = provider
            .complete(request("Hello", "gpt-2"), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::Http { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Model gpt-2 is not supported");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_api_key_failure_maps_to_unauthorized() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![UpstreamScript::Fail(
            UpstreamError::MissingApiKey,
        )]));
        let provider = provider_for(spawn_server(upstream).await);

        let err = provider
            .complete(request("Hello", "4o"), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Http { status: 401, .. }));
        assert!(err.message().contains("API key"));
    }

    #[tokio::test]
    async fn test_cancellation_settles_as_aborted() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![UpstreamScript::Hang]));
        let provider = provider_for(spawn_server(upstream).await);
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = provider
            .complete(request("Hello", "4o"), token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderError::ABORT_KIND);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let provider = provider_for(format!("http://{addr}"));

        let err = provider
            .complete(request("Hello", "4o"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
