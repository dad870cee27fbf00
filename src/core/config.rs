//! Configuration for the chat client and forwarding server.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::UserId;
use crate::core::message::Priority;
use crate::core::models::{DEFAULT_MODEL, find_model};

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Remote conversation store settings.
    pub storage: StorageConfig,
    /// Draft buffer settings.
    pub draft: DraftConfig,
    /// Completion client settings.
    pub client: ClientConfig,
    /// Forwarding server settings.
    pub server: ServerConfig,
    /// Defaults applied to new submissions.
    pub defaults: DefaultsConfig,
}

impl ChatConfig {
    /// Build a configuration from `PARLOR_*` environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup over the defaults.
    ///
    /// Unparseable numbers, priorities and identities are ignored.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("PARLOR_DB_PATH") {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("PARLOR_DRAFT_PATH") {
            config.draft.path = PathBuf::from(path);
        }
        if let Some(endpoint) = lookup("PARLOR_ENDPOINT") {
            config.client.endpoint = endpoint;
        }
        if let Some(secs) = lookup("PARLOR_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.client.request_timeout_secs = secs;
        }
        if let Some(port) = lookup("PARLOR_PORT").and_then(|v| v.parse().ok()) {
            config.server.port = port;
        }
        if let Some(url) = lookup("PARLOR_UPSTREAM_URL") {
            config.server.upstream_url = url;
        }
        config.server.api_key = lookup("PARLOR_API_KEY").filter(|key| !key.trim().is_empty());
        if let Some(model) = lookup("PARLOR_MODEL") {
            config.defaults.model = model;
        }
        if let Some(priority) = lookup("PARLOR_PRIORITY").and_then(|v| v.parse().ok()) {
            config.defaults.priority = priority;
        }
        config.defaults.user = lookup("PARLOR_USER").and_then(|v| v.parse().ok());

        config
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        validate_table_name("storage.conversations_table", &self.storage.conversations_table)?;
        validate_table_name("storage.messages_table", &self.storage.messages_table)?;

        if self.client.request_timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "client.request_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.client.connect_timeout_secs == 0 {
            return Err(ChatError::InvalidConfig(
                "client.connect_timeout_secs must be > 0".to_string(),
            ));
        }

        Url::parse(&self.client.endpoint)?;
        Url::parse(&self.server.upstream_url)?;

        if find_model(&self.defaults.model).is_none() {
            return Err(ChatError::InvalidConfig(format!(
                "defaults.model {} is not supported",
                self.defaults.model
            )));
        }

        Ok(())
    }
}

fn validate_table_name(field: &str, name: &str) -> ChatResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidConfig(format!(
            "{field} must be a non-empty identifier, got {name:?}"
        )))
    }
}

/// Storage configuration for persisted conversations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub conversations_table: String,
    /// Message table name.
    pub messages_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("parlor.sqlite"),
            conversations_table: "conversations".to_string(),
            messages_table: "messages".to_string(),
        }
    }
}

/// Draft buffer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DraftConfig {
    /// File holding the unsaved transcript snapshot.
    pub path: PathBuf,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("parlor-draft.json"),
        }
    }
}

/// Completion client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the forwarding server.
    pub endpoint: String,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl ClientConfig {
    /// Whole-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000".to_string(),
            request_timeout_secs: 120,
            connect_timeout_secs: 5,
        }
    }
}

/// Forwarding server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// Base URL of the OpenAI-compatible aggregator.
    pub upstream_url: String,
    /// Aggregator API key.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            upstream_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
        }
    }
}

/// Defaults applied to new submissions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Model id from the catalog.
    pub model: String,
    /// Generation priority.
    pub priority: Priority,
    /// Identity used by the terminal client.
    pub user: Option<UserId>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            priority: Priority::High,
            user: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        ChatConfig::default().validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let user = UserId::new();
        let user_str = user.to_string();
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("PARLOR_PORT", "8080"),
            ("PARLOR_PRIORITY", "low"),
            ("PARLOR_MODEL", "o4-mini"),
            ("PARLOR_USER", user_str.as_str()),
            ("PARLOR_API_KEY", "sk-test"),
        ]));

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.defaults.priority, Priority::Low);
        assert_eq!(config.defaults.model, "o4-mini");
        assert_eq!(config.defaults.user, Some(user));
        assert_eq!(config.server.api_key.as_deref(), Some("sk-test"));
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_numbers_fall_back_to_defaults() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("PARLOR_PORT", "not-a-port"),
            ("PARLOR_REQUEST_TIMEOUT_SECS", "-3"),
        ]));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.client.request_timeout_secs, 120);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ChatConfig::default();
        config.storage.messages_table = "messages; DROP".to_string();
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));

        let mut config = ChatConfig::default();
        config.client.endpoint = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ChatError::Url(_))));

        let mut config = ChatConfig::default();
        config.defaults.model = "gpt-2".to_string();
        assert!(matches!(config.validate(), Err(ChatError::InvalidConfig(_))));
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let mut config = ChatConfig::default();
        config.server.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
