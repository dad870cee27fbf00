//! JSON bodies exchanged with the forwarding server's `/api/chat` route.

use serde::{Deserialize, Serialize};

use crate::core::message::Priority;
use crate::provider::HistoryEntry;

/// Chat completion request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The new user prompt.
    #[serde(default)]
    pub message: Option<String>,
    /// Prior turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Catalog model id; the default model when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Generation priority; `High` when absent.
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Chat completion response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Always `true` on the success path.
    pub success: bool,
    /// The assistant's response.
    pub response: String,
    /// Catalog model id used.
    pub model: String,
    /// Priority used.
    pub priority: Priority,
}

/// Error body returned with every non-success status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error.
    pub error: String,
}
