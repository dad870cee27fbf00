//! Core chat types: configuration, errors, identifiers, messages and the model catalog.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;
pub mod models;

pub use config::{ChatConfig, ClientConfig, DefaultsConfig, DraftConfig, ServerConfig, StorageConfig};
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, MessageKey, RemoteMessageId, RequestId, UserId};
pub use message::{ChatMessage, Priority, Role};
pub use models::{DEFAULT_MODEL, ModelInfo, catalog, find_model};
