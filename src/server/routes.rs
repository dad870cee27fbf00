//! HTTP route handlers for the chat forwarding API.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::core::message::Role;
use crate::core::models::{DEFAULT_MODEL, ModelInfo, catalog, find_model};
use crate::provider::HistoryEntry;
use crate::provider::wire::{ChatRequest, ChatResponse, ErrorBody};

use super::state::AppState;
use super::upstream::UpstreamRequest;

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        .route("/api/chat", post(chat_completion))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "parlor-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Model catalog response.
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    /// Selectable models, in picker order.
    pub models: &'static [ModelInfo],
    /// Model used when a request names none.
    pub default: &'static str,
}

async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: catalog(),
        default: DEFAULT_MODEL,
    })
}

/// Handle chat completion requests.
async fn chat_completion(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(%rejection, "rejected chat body");
        api_error(StatusCode::BAD_REQUEST, "Message is required")
    })?;

    let message = request
        .message
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Message is required"))?;

    let model_id = request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let model = find_model(&model_id).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Model {model_id} is not supported"),
        )
    })?;
    let priority = request.priority.unwrap_or_default();

    let mut messages = request.history;
    messages.push(HistoryEntry {
        role: Role::User,
        content: message,
    });

    let upstream_request = UpstreamRequest {
        model: model.upstream_id.to_string(),
        messages,
        temperature: model.is_thinking.then_some(priority.temperature()),
    };

    match state.upstream.generate(upstream_request).await {
        Ok(response) => Ok(Json(ChatResponse {
            success: true,
            response,
            model: model.id.to_string(),
            priority,
        })),
        Err(err) if err.is_api_key_error() => {
            tracing::error!(error = %err, model = model.id, "upstream rejected API key");
            Err(api_error(
                StatusCode::UNAUTHORIZED,
                "API key is invalid or missing",
            ))
        }
        Err(err) => {
            tracing::error!(error = %err, model = model.id, "upstream generation failed");
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate response",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::core::message::Priority;
    use crate::server::upstream::UpstreamError;
    use crate::testing::{ScriptedUpstream, UpstreamScript};

    async fn post_chat(upstream: Arc<ScriptedUpstream>, body: Value) -> (StatusCode, Value) {
        let router = create_router(Arc::new(AppState::new(upstream)));
        let response = router
            .oneshot(
                Request::post("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_blank_message_is_rejected() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![]));
        let (status, body) = post_chat(Arc::clone(&upstream), json!({"message": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message is required");

        let (status, _) = post_chat(Arc::clone(&upstream), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(upstream.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_is_rejected() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![]));
        let (status, body) =
            post_chat(upstream, json!({"message": "Hi", "model": "gpt-2"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Model gpt-2 is not supported");
    }

    #[tokio::test]
    async fn test_defaults_and_history_are_forwarded() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![UpstreamScript::Reply(
            "Hello back".to_string(),
        )]));
        let (status, body) = post_chat(
            Arc::clone(&upstream),
            json!({
                "message": "Hello",
                "history": [{"role": "user", "content": "before"}, {"role": "assistant", "content": "ok"}]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["response"], "Hello back");
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["priority"], "High");

        let seen = upstream.requests();
        assert_eq!(seen[0].model, "google/gemini-2.5-flash");
        assert_eq!(seen[0].messages.len(), 3);
        assert_eq!(seen[0].messages[2].content, "Hello");
        assert_eq!(seen[0].temperature, None);
    }

    #[tokio::test]
    async fn test_thinking_model_gets_priority_temperature() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![UpstreamScript::Reply(
            "thought".to_string(),
        )]));
        let (status, body) = post_chat(
            Arc::clone(&upstream),
            json!({"message": "Think", "model": "o4-mini", "priority": "Low"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["priority"], "Low");
        assert_eq!(
            upstream.requests()[0].temperature,
            Some(Priority::Low.temperature())
        );
    }

    #[tokio::test]
    async fn test_upstream_failures_map_to_status() {
        let upstream = Arc::new(ScriptedUpstream::new(vec![
            UpstreamScript::Fail(UpstreamError::Unauthorized("invalid".to_string())),
            UpstreamScript::Fail(UpstreamError::EmptyCompletion),
        ]));

        let (status, body) = post_chat(Arc::clone(&upstream), json!({"message": "a"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "API key is invalid or missing");

        let (status, body) = post_chat(upstream, json!({"message": "b"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to generate response");
    }

    #[tokio::test]
    async fn test_models_endpoint_lists_catalog() {
        let router = create_router(Arc::new(AppState::new(Arc::new(ScriptedUpstream::new(
            vec![],
        )))));
        let response = router
            .oneshot(Request::get("/api/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["models"].as_array().unwrap().len(), catalog().len());
        assert_eq!(body["default"], DEFAULT_MODEL);
        assert!(body["models"][0].get("upstream_id").is_none());
    }
}
