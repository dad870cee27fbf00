//! Session state machine: submission, cancellation, stopped-prompt recovery
//! and conversation switching for one live conversation.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::ids::{ConversationId, MessageKey, RequestId, UserId};
use crate::core::message::{ChatMessage, Priority};
use crate::provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, HistoryEntry, ProviderError,
};
use crate::store::{ConversationMeta, ConversationStore, StoreError};

use super::classifier::{Classification, classify, failure_notice};
use super::draft::{DraftBuffer, DraftSnapshot};
use super::identity::IdentityProvider;
use super::reconcile::{Reconciliation, Reconciler};

/// Externally observable request lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestState {
    /// No outstanding request.
    Idle,
    /// A request is in flight, or its result is being persisted.
    Pending,
    /// Cancellation was requested; waiting for the request to settle.
    Cancelling,
}

/// Recovery record kept after the user stops a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoppedPrompt {
    /// Prompt as originally submitted.
    pub content: String,
    /// Model it was submitted with.
    pub model: String,
    /// Priority it was submitted with.
    pub priority: Priority,
    /// Key of the unanswered user message left in the transcript.
    pub message_key: MessageKey,
}

/// How a submission settled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TurnOutcome {
    /// An assistant reply was appended.
    Replied,
    /// A failure notice was appended.
    Failed,
    /// The user cancelled; the stopped-prompt slot is filled.
    Stopped,
    /// The settlement no longer matched the in-flight request and was dropped.
    Discarded,
}

/// Rejection of a session operation. Nothing was changed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The prompt is blank.
    #[error("message is empty")]
    EmptyMessage,
    /// Another operation is in progress.
    #[error("a request is already in progress")]
    Busy,
    /// No identity is signed in.
    #[error("please sign in to send messages")]
    Unauthenticated,
    /// The conversation store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Activity {
    Idle,
    Generating {
        request: RequestId,
        token: CancellationToken,
        cancelling: bool,
    },
    Persisting,
    Switching,
}

struct SessionState {
    messages: Vec<ChatMessage>,
    active: Option<ConversationId>,
    /// Identity `active` belongs to.
    owner: Option<UserId>,
    activity: Activity,
    stopped: Option<StoppedPrompt>,
}

impl SessionState {
    const fn is_idle(&self) -> bool {
        matches!(self.activity, Activity::Idle)
    }

    fn reset(&mut self) {
        self.messages.clear();
        self.active = None;
        self.owner = None;
        self.stopped = None;
    }

    /// Unbind from the remote conversation; every message becomes unsaved.
    fn detach(&mut self) {
        self.active = None;
        self.owner = None;
        for message in &mut self.messages {
            message.detach_remote_id();
        }
    }

    /// Make `current` the owner of the transcript. A conversation owned by
    /// another identity is detached; returns `true` when that happened.
    fn bind_owner(&mut self, current: UserId) -> bool {
        match self.owner {
            Some(owner) if owner != current => {
                self.detach();
                true
            }
            Some(_) => false,
            None => {
                if self.active.is_some() {
                    self.owner = Some(current);
                }
                false
            }
        }
    }

    fn absorb(&mut self, outcome: &Reconciliation) -> usize {
        if self.active.is_none() && outcome.conversation_id.is_some() {
            self.active = outcome.conversation_id;
            self.owner = outcome.owner;
        }
        outcome.apply(&mut self.messages)
    }

    /// Whether `request` is the one in flight and, if so, whether it was cancelled.
    fn settling(&self, request: RequestId) -> Option<bool> {
        match &self.activity {
            Activity::Generating {
                request: current,
                cancelling,
                ..
            } if *current == request => Some(*cancelling),
            _ => None,
        }
    }

    /// Fold a settled completion into the transcript.
    fn record(
        &mut self,
        ticket: Ticket,
        result: Result<CompletionResponse, ProviderError>,
        cancelled: bool,
    ) -> TurnOutcome {
        let CompletionRequest {
            message,
            model,
            priority,
            ..
        } = ticket.completion;
        match result {
            Ok(response) => {
                self.messages
                    .push(ChatMessage::assistant(response.text, model, priority));
                TurnOutcome::Replied
            }
            Err(err) if cancelled || classify(&err) == Classification::UserCancelled => {
                info!(request = %ticket.request, "request stopped by user");
                self.stopped = Some(StoppedPrompt {
                    content: message,
                    model,
                    priority,
                    message_key: ticket.user_key,
                });
                TurnOutcome::Stopped
            }
            Err(err) => {
                warn!(request = %ticket.request, error = %err, "completion failed");
                self.messages
                    .push(ChatMessage::failure(failure_notice(&err), model, priority));
                TurnOutcome::Failed
            }
        }
    }
}

/// A request handed to the provider, identified for settlement.
struct Ticket {
    request: RequestId,
    completion: CompletionRequest,
    token: CancellationToken,
    user_key: MessageKey,
}

/// Owns the live transcript and drives every turn of it.
pub struct SessionController {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ConversationStore>,
    identity: Arc<dyn IdentityProvider>,
    draft: Arc<dyn DraftBuffer>,
    reconciler: Reconciler,
    state: RwLock<SessionState>,
}

impl SessionController {
    /// Build a controller, restoring the transcript held in the draft buffer.
    #[must_use]
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ConversationStore>,
        identity: Arc<dyn IdentityProvider>,
        draft: Arc<dyn DraftBuffer>,
    ) -> Self {
        let hydrated = match draft.load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "failed to read draft; starting empty");
                DraftSnapshot::default()
            }
        };
        if !hydrated.messages.is_empty() {
            info!(count = hydrated.messages.len(), "restored draft transcript");
        }

        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            Arc::clone(&draft),
        );
        Self {
            provider,
            store,
            identity,
            draft,
            reconciler,
            state: RwLock::new(SessionState {
                messages: hydrated.messages,
                active: hydrated.conversation_id,
                owner: hydrated.owner,
                activity: Activity::Idle,
                stopped: None,
            }),
        }
    }

    /// Copy of the live transcript.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().await.messages.clone()
    }

    /// Remote conversation the transcript belongs to, if created.
    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.state.read().await.active
    }

    /// Current request lifecycle state.
    pub async fn request_state(&self) -> RequestState {
        match self.state.read().await.activity {
            Activity::Idle => RequestState::Idle,
            Activity::Generating {
                cancelling: true, ..
            } => RequestState::Cancelling,
            Activity::Generating { .. } | Activity::Persisting | Activity::Switching => {
                RequestState::Pending
            }
        }
    }

    /// The unconsumed recovery record, if any.
    pub async fn stopped_prompt(&self) -> Option<StoppedPrompt> {
        self.state.read().await.stopped.clone()
    }

    /// Send `content` and wait for the turn to settle.
    ///
    /// # Errors
    /// Rejects blank prompts, overlapping requests and signed-out sessions
    /// without touching the transcript.
    pub async fn submit(
        &self,
        content: &str,
        model: &str,
        priority: Priority,
    ) -> Result<TurnOutcome, SessionError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let ticket = self.begin(content, model, priority, None).await?;
        Ok(self.run(ticket).await)
    }

    /// Signal cancellation of the in-flight request.
    ///
    /// Returns `true` if a request was in flight. The session stays pending
    /// until the request settles.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.write().await;
        match &mut state.activity {
            Activity::Generating {
                request,
                token,
                cancelling,
            } => {
                if !*cancelling {
                    debug!(request = %request, "cancelling request");
                    *cancelling = true;
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Re-send the stopped prompt with its original model and priority.
    ///
    /// Returns `Ok(None)` when there is nothing to retry. When the stopped
    /// user message is still the last one in the transcript it is re-sent in
    /// place rather than appended again.
    ///
    /// # Errors
    /// Same rejections as [`Self::submit`]; the slot is kept on rejection.
    pub async fn retry_stopped(&self) -> Result<Option<TurnOutcome>, SessionError> {
        let Some(stopped) = self.state.read().await.stopped.clone() else {
            return Ok(None);
        };
        let ticket = self
            .begin(
                &stopped.content,
                &stopped.model,
                stopped.priority,
                Some(stopped.message_key),
            )
            .await?;
        Ok(Some(self.run(ticket).await))
    }

    /// Take the stopped prompt's text back for editing.
    pub async fn edit_stopped(&self) -> Option<String> {
        self.state
            .write()
            .await
            .stopped
            .take()
            .map(|stopped| stopped.content)
    }

    /// Drop the stopped prompt.
    pub async fn dismiss_stopped(&self) -> bool {
        self.state.write().await.stopped.take().is_some()
    }

    /// Persist whatever is still unsaved. Returns `true` when everything is durable.
    ///
    /// # Errors
    /// Returns [`SessionError::Busy`] while a request is in progress.
    pub async fn reconcile_now(&self) -> Result<bool, SessionError> {
        {
            let mut state = self.state.write().await;
            if !state.is_idle() {
                return Err(SessionError::Busy);
            }
            state.activity = Activity::Persisting;
        }
        let complete = self.persist().await;
        self.state.write().await.activity = Activity::Idle;
        Ok(complete)
    }

    /// Replace the session with a persisted conversation.
    ///
    /// # Errors
    /// Rejected while busy or signed out; store failures leave the session as it was.
    pub async fn load_conversation(&self, id: ConversationId) -> Result<(), SessionError> {
        let owner = self.enter_switch().await?;
        self.save_before_switch().await;

        let loaded = self.store.get_conversation(owner, id).await;
        let mut state = self.state.write().await;
        state.activity = Activity::Idle;
        let record = loaded?;

        info!(conversation = %id, count = record.messages.len(), "conversation loaded");
        state.messages = record.messages;
        state.active = Some(id);
        state.owner = Some(owner);
        state.stopped = None;
        self.clear_draft();
        Ok(())
    }

    /// Start an empty, unsaved conversation.
    ///
    /// # Errors
    /// Returns [`SessionError::Busy`] while a request is in progress.
    pub async fn start_new(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write().await;
            if !state.is_idle() {
                return Err(SessionError::Busy);
            }
            state.activity = Activity::Switching;
        }
        self.save_before_switch().await;

        let mut state = self.state.write().await;
        state.reset();
        state.activity = Activity::Idle;
        self.clear_draft();
        Ok(())
    }

    /// The signed-in identity's conversations, most recent first.
    ///
    /// # Errors
    /// Rejected when signed out, or when the store fails.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationMeta>, SessionError> {
        let owner = self.identity.current().ok_or(SessionError::Unauthenticated)?;
        Ok(self.store.list_conversations(owner).await?)
    }

    /// Delete a conversation; the session resets if it was the active one.
    ///
    /// # Errors
    /// Rejected while busy or signed out, or when the store fails.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<(), SessionError> {
        let owner = self.enter_switch().await?;
        let deleted = self.store.delete_conversation(owner, id).await;

        let mut state = self.state.write().await;
        state.activity = Activity::Idle;
        deleted?;

        info!(conversation = %id, "conversation deleted");
        if state.active == Some(id) {
            state.reset();
            self.clear_draft();
        }
        Ok(())
    }

    async fn enter_switch(&self) -> Result<UserId, SessionError> {
        let mut state = self.state.write().await;
        if !state.is_idle() {
            return Err(SessionError::Busy);
        }
        let owner = self.identity.current().ok_or(SessionError::Unauthenticated)?;
        state.activity = Activity::Switching;
        Ok(owner)
    }

    /// Validate, append the user message (unless re-sending `resend` in place)
    /// and move to pending.
    async fn begin(
        &self,
        content: &str,
        model: &str,
        priority: Priority,
        resend: Option<MessageKey>,
    ) -> Result<Ticket, SessionError> {
        let mut state = self.state.write().await;
        if !state.is_idle() {
            return Err(SessionError::Busy);
        }
        if self.identity.current().is_none() {
            return Err(SessionError::Unauthenticated);
        }

        state.stopped = None;
        let in_place = resend.filter(|key| {
            state
                .messages
                .last()
                .is_some_and(|last| last.key == *key && last.content == content)
        });
        let user_key = if let Some(key) = in_place {
            key
        } else {
            let message = ChatMessage::user(content).with_priority(priority);
            let key = message.key;
            state.messages.push(message);
            self.snapshot(&state);
            key
        };

        let history = state
            .messages
            .iter()
            .take_while(|message| message.key != user_key)
            .filter(|message| !message.is_error)
            .map(|message| HistoryEntry {
                role: message.role,
                content: message.content.clone(),
            })
            .collect();

        let request = RequestId::new();
        let token = CancellationToken::new();
        state.activity = Activity::Generating {
            request,
            token: token.clone(),
            cancelling: false,
        };
        debug!(request = %request, model, in_place = in_place.is_some(), "request pending");

        Ok(Ticket {
            request,
            completion: CompletionRequest {
                history,
                message: content.to_string(),
                model: model.to_string(),
                priority,
            },
            token,
            user_key,
        })
    }

    async fn run(&self, ticket: Ticket) -> TurnOutcome {
        let result = self
            .provider
            .complete(ticket.completion.clone(), ticket.token.clone())
            .await;
        self.settle(ticket, result).await
    }

    async fn settle(
        &self,
        ticket: Ticket,
        result: Result<CompletionResponse, ProviderError>,
    ) -> TurnOutcome {
        let outcome = {
            let mut state = self.state.write().await;
            let Some(cancelled) = state.settling(ticket.request) else {
                debug!(request = %ticket.request, "dropping stale settlement");
                return TurnOutcome::Discarded;
            };
            let outcome = state.record(ticket, result, cancelled);
            if outcome == TurnOutcome::Stopped {
                state.activity = Activity::Idle;
                return outcome;
            }
            self.snapshot(&state);
            state.activity = Activity::Persisting;
            outcome
        };

        self.persist().await;
        self.state.write().await.activity = Activity::Idle;
        outcome
    }

    /// Reconcile the transcript. When its conversation is gone for the
    /// current identity, the transcript is saved into a new one.
    async fn persist(&self) -> bool {
        let first = self.persist_pass().await;
        if first.conversation_missing {
            return self.persist_pass().await.complete;
        }
        first.complete
    }

    /// Run one reconciliation pass and fold its results into the live state.
    async fn persist_pass(&self) -> Reconciliation {
        let (active, messages) = {
            let mut state = self.state.write().await;
            let current = self.identity.current();
            if current.is_some_and(|user| state.bind_owner(user)) {
                info!("identity changed; transcript moves to a new conversation");
                self.snapshot(&state);
            }
            (state.active, state.messages.clone())
        };
        let outcome = self.reconciler.reconcile(active, &messages).await;

        let mut state = self.state.write().await;
        if outcome.conversation_missing && state.active == active {
            warn!(conversation = ?active, "conversation no longer in the store; detaching");
            state.detach();
            self.snapshot(&state);
            return outcome;
        }
        let conversation_was_known = state.active.is_some();
        let applied = state.absorb(&outcome);
        if !outcome.complete && (applied > 0 || conversation_was_known != state.active.is_some()) {
            self.snapshot(&state);
        }
        outcome
    }

    async fn save_before_switch(&self) {
        let has_unsaved = self
            .state
            .read()
            .await
            .messages
            .iter()
            .any(ChatMessage::is_unsaved);
        if has_unsaved && self.identity.current().is_some() {
            debug!("saving unsaved messages before switching");
            self.persist().await;
        }
    }

    fn snapshot(&self, state: &SessionState) {
        let snapshot = DraftSnapshot {
            owner: state.owner,
            conversation_id: state.active,
            messages: state.messages.clone(),
        };
        if let Err(err) = self.draft.save(&snapshot) {
            warn!(error = %err, "failed to save draft");
        }
    }

    fn clear_draft(&self) {
        if let Err(err) = self.draft.clear() {
            warn!(error = %err, "failed to clear draft");
        }
    }
}
