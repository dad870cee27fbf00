//! Message model for chat transcripts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{MessageKey, RemoteMessageId};

/// Author of a chat message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Model output (or a synthesized failure notice).
    Assistant,
}

impl Role {
    /// Stable string form for storage and the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// Generation priority selected next to the model picker.
///
/// Only thinking models honour it; it maps to a sampling temperature.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Focused, low-temperature output.
    #[default]
    High,
    /// Balanced output.
    Medium,
    /// Loose, high-temperature output.
    Low,
}

impl Priority {
    /// Stable string form for storage and the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Sampling temperature sent upstream for thinking models.
    #[must_use]
    pub const fn temperature(self) -> f64 {
        match self {
            Self::High => 0.2,
            Self::Medium => 0.6,
            Self::Low => 1.0,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(value.to_string()),
        }
    }
}

/// One turn of a conversation as held by the session controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Local key used to write persistence results back onto the live list.
    pub key: MessageKey,
    /// Author of the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Model that produced the message (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Priority the turn was submitted or generated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
    /// Marks a synthesized failure notice.
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_id: Option<RemoteMessageId>,
}

impl ChatMessage {
    /// Build a user message stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            key: MessageKey::new(),
            role: Role::User,
            content: content.into(),
            model: None,
            priority: None,
            timestamp: Utc::now(),
            is_error: false,
            remote_id: None,
        }
    }

    /// Record the priority the turn was submitted with.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Build an assistant reply stamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>, model: impl Into<String>, priority: Priority) -> Self {
        Self {
            key: MessageKey::new(),
            role: Role::Assistant,
            content: content.into(),
            model: Some(model.into()),
            priority: Some(priority),
            timestamp: Utc::now(),
            is_error: false,
            remote_id: None,
        }
    }

    /// Build a synthesized failure notice shown in place of a reply.
    #[must_use]
    pub fn failure(notice: impl Into<String>, model: impl Into<String>, priority: Priority) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(notice, model, priority)
        }
    }

    /// Rebuild a message read back from the remote store.
    #[must_use]
    pub fn persisted(
        remote_id: RemoteMessageId,
        role: Role,
        content: String,
        model: Option<String>,
        priority: Option<Priority>,
        timestamp: DateTime<Utc>,
        is_error: bool,
    ) -> Self {
        Self {
            key: MessageKey::new(),
            role,
            content,
            model,
            priority,
            timestamp,
            is_error,
            remote_id: Some(remote_id),
        }
    }

    /// Forget the durable id so the message is appended again, for instance
    /// to a conversation owned by a different identity.
    pub const fn detach_remote_id(&mut self) {
        self.remote_id = None;
    }

    /// Durable id, once the message has been appended to the remote store.
    #[must_use]
    pub const fn remote_id(&self) -> Option<RemoteMessageId> {
        self.remote_id
    }

    /// Whether the message still exists only in memory or the draft buffer.
    #[must_use]
    pub const fn is_unsaved(&self) -> bool {
        self.remote_id.is_none()
    }

    /// Record the durable id. An id is assigned at most once; later calls are ignored.
    ///
    /// Returns `true` if the id was recorded.
    pub fn assign_remote_id(&mut self, id: RemoteMessageId) -> bool {
        if self.remote_id.is_some() {
            return false;
        }
        self.remote_id = Some(id);
        true
    }
}
