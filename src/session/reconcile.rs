//! Persist the unsaved suffix of a transcript to the remote store.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::ids::{ConversationId, MessageKey, RemoteMessageId, UserId};
use crate::core::message::ChatMessage;
use crate::store::{ConversationStore, StoreError, StoreResult};

use super::draft::DraftBuffer;
use super::identity::IdentityProvider;
use super::title::synthesize_title;

/// Result of one reconciliation pass.
///
/// Assignments are keyed by [`MessageKey`] so the caller can write them onto
/// whatever the live transcript looks like once the pass settles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Identity the pass ran as.
    pub owner: Option<UserId>,
    /// Conversation the messages belong to, including one created by this pass.
    pub conversation_id: Option<ConversationId>,
    /// Durable ids obtained during this pass, in append order.
    pub assigned: Vec<(MessageKey, RemoteMessageId)>,
    /// Every message passed in is now durable.
    pub complete: bool,
    /// The store has no such conversation for `owner`.
    pub conversation_missing: bool,
}

impl Reconciliation {
    /// Record assigned ids onto `messages` by key. Returns how many were applied.
    pub fn apply(&self, messages: &mut [ChatMessage]) -> usize {
        let mut applied = 0;
        for (key, id) in &self.assigned {
            let Some(message) = messages.iter_mut().find(|m| m.key == *key) else {
                continue;
            };
            if message.assign_remote_id(*id) {
                applied += 1;
            }
        }
        applied
    }
}

/// Makes local messages durable, at most once each.
pub struct Reconciler {
    store: Arc<dyn ConversationStore>,
    identity: Arc<dyn IdentityProvider>,
    draft: Arc<dyn DraftBuffer>,
}

impl Reconciler {
    /// Create a reconciler over the given handles.
    #[must_use]
    pub fn new(
        store: Arc<dyn ConversationStore>,
        identity: Arc<dyn IdentityProvider>,
        draft: Arc<dyn DraftBuffer>,
    ) -> Self {
        Self {
            store,
            identity,
            draft,
        }
    }

    /// Append every message lacking a remote id to `active`, creating the
    /// conversation first when there is none.
    ///
    /// Never fails: store errors are logged and the pass stops early, leaving
    /// the draft buffer intact for a later attempt.
    pub async fn reconcile(
        &self,
        active: Option<ConversationId>,
        messages: &[ChatMessage],
    ) -> Reconciliation {
        let mut outcome = Reconciliation {
            conversation_id: active,
            ..Reconciliation::default()
        };

        let Some(owner) = self.identity.current() else {
            debug!("no identity; keeping messages local");
            return outcome;
        };
        outcome.owner = Some(owner);

        let unsaved: Vec<&ChatMessage> = messages.iter().filter(|m| m.is_unsaved()).collect();

        let conversation_id = match active {
            Some(id) => id,
            None if unsaved.is_empty() => {
                outcome.complete = true;
                return outcome;
            }
            None => match self.create(owner, messages).await {
                Some(id) => {
                    outcome.conversation_id = Some(id);
                    id
                }
                None => return outcome,
            },
        };

        if let Err(err) = self
            .append_all(owner, conversation_id, &unsaved, &mut outcome.assigned)
            .await
        {
            warn!(
                conversation = %conversation_id,
                error = %err,
                saved = outcome.assigned.len(),
                "failed to append message; will retry later"
            );
            outcome.conversation_missing = matches!(err, StoreError::NotFound(_));
            return outcome;
        }

        outcome.complete = true;
        self.finish(conversation_id, outcome.assigned.len());
        outcome
    }

    async fn create(&self, owner: UserId, messages: &[ChatMessage]) -> Option<ConversationId> {
        let title = synthesize_title(messages);
        match self.store.create_conversation(owner, &title).await {
            Ok(meta) => {
                info!(conversation = %meta.id, title = %meta.title, "conversation created");
                Some(meta.id)
            }
            Err(err) => {
                warn!(error = %err, "failed to create conversation; will retry later");
                None
            }
        }
    }

    /// Append in order, stopping at the first failure.
    async fn append_all(
        &self,
        owner: UserId,
        conversation_id: ConversationId,
        unsaved: &[&ChatMessage],
        assigned: &mut Vec<(MessageKey, RemoteMessageId)>,
    ) -> StoreResult<()> {
        for message in unsaved {
            let remote_id = self
                .store
                .append_message(owner, conversation_id, message)
                .await?;
            assigned.push((message.key, remote_id));
        }
        Ok(())
    }

    fn finish(&self, conversation_id: ConversationId, saved: usize) {
        if let Err(err) = self.draft.clear() {
            warn!(error = %err, "failed to clear draft after reconciliation");
        }
        debug!(conversation = %conversation_id, saved, "reconciliation complete");
    }
}
