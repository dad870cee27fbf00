//! Conversation session: the state machine and the policies it relies on.

pub mod classifier;
pub mod controller;
pub mod draft;
pub mod identity;
pub mod reconcile;
pub mod title;

pub use classifier::{Classification, classify, failure_notice, is_cancellation};
pub use controller::{RequestState, SessionController, SessionError, StoppedPrompt, TurnOutcome};
pub use draft::{DraftBuffer, DraftSnapshot, FileDraftBuffer, MemoryDraftBuffer};
pub use identity::{IdentityProvider, StaticIdentity};
pub use reconcile::{Reconciliation, Reconciler};
pub use title::{DEFAULT_TITLE, synthesize_title};
