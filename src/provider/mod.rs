//! Completion provider seam.
//!
//! The session controller talks to a provider through [`CompletionProvider`];
//! [`HttpCompletionProvider`] is the production implementation that posts to
//! the forwarding server.

pub mod http;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::message::{Priority, Role};

pub use http::HttpCompletionProvider;

/// Boxed future type for provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One prior turn sent along with a new prompt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Author of the turn.
    pub role: Role,
    /// Turn text.
    pub content: String,
}

/// Everything a provider needs to produce one completion.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    /// Prior turns, oldest first.
    pub history: Vec<HistoryEntry>,
    /// The new user prompt.
    pub message: String,
    /// Catalog model id.
    pub model: String,
    /// Generation priority.
    pub priority: Priority,
}

/// A settled completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionResponse {
    /// Generated text.
    pub text: String,
}

/// Failure of a completion call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call was abandoned because its cancellation token fired.
    #[error("request aborted: {0}")]
    Aborted(String),
    /// The endpoint answered with a non-success status.
    #[error("http status {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error text reported by the endpoint.
        message: String,
    },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Kind tag carried by transport-level cancellations.
    pub const ABORT_KIND: &'static str = "AbortError";

    /// Stable kind tag, comparable across transports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Aborted(_) => Self::ABORT_KIND,
            Self::Http { .. } => "HttpError",
            Self::Transport(_) => "TransportError",
            Self::Decode(_) => "DecodeError",
        }
    }

    /// Human-readable message without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Aborted(message)
            | Self::Http { message, .. }
            | Self::Transport(message)
            | Self::Decode(message) => message,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A network endpoint that turns a message history into one completion.
pub trait CompletionProvider: Send + Sync {
    /// Produce a completion for `request`.
    ///
    /// Cancellation is cooperative: implementations should settle promptly
    /// once `cancel` fires, typically with [`ProviderError::Aborted`].
    fn complete(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>>;
}
