//! Catalog of selectable generation models.

use serde::Serialize;

/// Model selected when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// A model offered in the model picker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Identifier used by clients.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Vendor label.
    pub provider: &'static str,
    /// Thinking variants honour the priority setting.
    pub is_thinking: bool,
    /// Model id understood by the upstream aggregator.
    #[serde(skip)]
    pub upstream_id: &'static str,
}

const CATALOG: &[ModelInfo] = &[
    ModelInfo {
        id: "gemini-2.5-flash",
        name: "Gemini 2.5 Flash",
        provider: "Google",
        is_thinking: false,
        upstream_id: "google/gemini-2.5-flash",
    },
    ModelInfo {
        id: "gemini-2.5-flash-thinking",
        name: "Gemini 2.5 Flash (Thinking)",
        provider: "Google",
        is_thinking: true,
        upstream_id: "google/gemini-2.5-flash",
    },
    ModelInfo {
        id: "gemini-2.5-pro",
        name: "Gemini 2.5 Pro",
        provider: "Google",
        is_thinking: false,
        upstream_id: "google/gemini-2.5-pro",
    },
    ModelInfo {
        id: "o4-mini",
        name: "o4-mini",
        provider: "OpenAI",
        is_thinking: true,
        upstream_id: "openai/o4-mini",
    },
    ModelInfo {
        id: "4o",
        name: "4o",
        provider: "OpenAI",
        is_thinking: false,
        upstream_id: "openai/gpt-4o",
    },
    ModelInfo {
        id: "claude-4-sonnet",
        name: "Claude 4 Sonnet",
        provider: "Anthropic",
        is_thinking: false,
        upstream_id: "anthropic/claude-sonnet-4",
    },
    ModelInfo {
        id: "claude-4-sonnet-thinking",
        name: "Claude 4 Sonnet (Thinking)",
        provider: "Anthropic",
        is_thinking: true,
        upstream_id: "anthropic/claude-sonnet-4",
    },
];

/// All selectable models, in picker order.
#[must_use]
pub const fn catalog() -> &'static [ModelInfo] {
    CATALOG
}

/// Look up a model by client id.
#[must_use]
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    CATALOG.iter().find(|model| model.id == id)
}
