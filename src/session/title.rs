//! Conversation title synthesis.

use crate::core::message::{ChatMessage, Role};

/// Label used when a conversation has no user message yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Longest title kept before truncation, in characters.
pub const MAX_TITLE_CHARS: usize = 50;

/// Derive a title from the first user message.
///
/// The content is cut at [`MAX_TITLE_CHARS`] characters with `"..."` appended
/// when anything was cut.
#[must_use]
pub fn synthesize_title(messages: &[ChatMessage]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return DEFAULT_TITLE.to_string();
    };

    let mut chars = first.content.chars();
    let head: String = chars.by_ref().take(MAX_TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
