//! Distinguishes user-initiated cancellation from genuine provider failures.

use crate::provider::ProviderError;

/// How a failed completion should be surfaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    /// The user stopped the request; offer recovery instead of an error.
    UserCancelled,
    /// A real failure; show an error message in the transcript.
    GenuineFailure,
}

/// Whether `err` looks like a user-initiated cancellation.
///
/// Matches the abort kind tag, or the words "abort" / "stop" anywhere in the
/// message or display form. The substring match is a compatibility shim for
/// transports that only surface cancellation as text.
#[must_use]
pub fn is_cancellation(err: &ProviderError) -> bool {
    if err.kind() == ProviderError::ABORT_KIND {
        return true;
    }
    mentions_cancellation(err.message()) || mentions_cancellation(&err.to_string())
}

fn mentions_cancellation(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("abort") || lower.contains("stop")
}

/// Classify a failed completion.
#[must_use]
pub fn classify(err: &ProviderError) -> Classification {
    if is_cancellation(err) {
        Classification::UserCancelled
    } else {
        Classification::GenuineFailure
    }
}

/// Text of the assistant message shown in place of a failed reply.
#[must_use]
pub fn failure_notice(err: &ProviderError) -> String {
    format!(
        "Sorry, I encountered an error: {}. Please check your API key and try again.",
        err.message()
    )
}
