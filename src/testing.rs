//! Scripted fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::core::ids::{ConversationId, RemoteMessageId, UserId};
use crate::core::message::ChatMessage;
use crate::provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, ProviderError, ProviderFuture,
};
use crate::server::upstream::{Upstream, UpstreamError, UpstreamFuture, UpstreamRequest};
use crate::store::{
    ConversationMeta, ConversationRecord, ConversationStore, StoreError, StoreFuture, StoreResult,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the next provider call settles.
pub enum ProviderScript {
    /// Succeed immediately with this text.
    Reply(String),
    /// Fail immediately.
    Fail(ProviderError),
    /// Stay pending until the token fires, then fail with this error.
    UntilCancelled(ProviderError),
}

/// Completion provider that plays back scripted settlements.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<ProviderScript>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<ProviderScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: ProviderScript) {
        lock(&self.scripts).push_back(script);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }
}

impl CompletionProvider for ScriptedProvider {
    fn complete(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>> {
        lock(&self.requests).push(request);
        let script = lock(&self.scripts).pop_front();
        Box::pin(async move {
            match script {
                Some(ProviderScript::Reply(text)) => Ok(CompletionResponse { text }),
                Some(ProviderScript::Fail(err)) => Err(err),
                Some(ProviderScript::UntilCancelled(err)) => {
                    cancel.cancelled().await;
                    Err(err)
                }
                None => Err(ProviderError::Transport("no scripted response".to_string())),
            }
        })
    }
}

struct StoredConversation {
    owner: UserId,
    meta: ConversationMeta,
    messages: Vec<ChatMessage>,
}

/// In-memory conversation store with failure injection.
#[derive(Default)]
pub struct FakeStore {
    conversations: Mutex<Vec<StoredConversation>>,
    append_budget: Mutex<Option<usize>>,
    fail_creates: AtomicBool,
    appends: AtomicUsize,
    creates: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more appends succeed, then fail every later one.
    pub fn fail_appends_after(&self, n: usize) {
        *lock(&self.append_budget) = Some(n);
    }

    pub fn allow_appends(&self) {
        *lock(&self.append_budget) = None;
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Append attempts, failed ones included.
    pub fn append_calls(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    /// Create attempts, failed ones included.
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    fn not_found(id: ConversationId) -> StoreError {
        StoreError::NotFound(id)
    }
}

impl ConversationStore for FakeStore {
    fn list_conversations(
        &self,
        owner: UserId,
    ) -> StoreFuture<'_, StoreResult<Vec<ConversationMeta>>> {
        Box::pin(async move {
            let mut metas: Vec<ConversationMeta> = lock(&self.conversations)
                .iter()
                .filter(|c| c.owner == owner)
                .map(|c| c.meta.clone())
                .collect();
            metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(metas)
        })
    }

    fn get_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<ConversationRecord>> {
        Box::pin(async move {
            lock(&self.conversations)
                .iter()
                .find(|c| c.owner == owner && c.meta.id == id)
                .map(|c| ConversationRecord {
                    meta: c.meta.clone(),
                    messages: c.messages.clone(),
                })
                .ok_or_else(|| Self::not_found(id))
        })
    }

    fn create_conversation(
        &self,
        owner: UserId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<ConversationMeta>> {
        let title = title.to_string();
        Box::pin(async move {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("create rejected".to_string()));
            }
            let now = Utc::now();
            let meta = ConversationMeta {
                id: ConversationId::new(),
                title,
                created_at: now,
                updated_at: now,
                message_count: 0,
            };
            lock(&self.conversations).push(StoredConversation {
                owner,
                meta: meta.clone(),
                messages: Vec::new(),
            });
            Ok(meta)
        })
    }

    fn append_message(
        &self,
        owner: UserId,
        id: ConversationId,
        message: &ChatMessage,
    ) -> StoreFuture<'_, StoreResult<RemoteMessageId>> {
        let message = message.clone();
        Box::pin(async move {
            self.appends.fetch_add(1, Ordering::SeqCst);
            {
                let mut budget = lock(&self.append_budget);
                match budget.as_mut() {
                    Some(0) => return Err(StoreError::Backend("append rejected".to_string())),
                    Some(remaining) => *remaining -= 1,
                    None => {}
                }
            }

            let mut conversations = lock(&self.conversations);
            let conversation = conversations
                .iter_mut()
                .find(|c| c.owner == owner && c.meta.id == id)
                .ok_or_else(|| Self::not_found(id))?;
            let remote_id = RemoteMessageId::new();
            conversation.messages.push(ChatMessage::persisted(
                remote_id,
                message.role,
                message.content,
                message.model,
                message.priority,
                message.timestamp,
                message.is_error,
            ));
            conversation.meta.message_count += 1;
            conversation.meta.updated_at = Utc::now();
            Ok(remote_id)
        })
    }

    fn touch_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut conversations = lock(&self.conversations);
            let conversation = conversations
                .iter_mut()
                .find(|c| c.owner == owner && c.meta.id == id)
                .ok_or_else(|| Self::not_found(id))?;
            conversation.meta.updated_at = Utc::now();
            Ok(())
        })
    }

    fn rename_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, StoreResult<()>> {
        let title = title.to_string();
        Box::pin(async move {
            let mut conversations = lock(&self.conversations);
            let conversation = conversations
                .iter_mut()
                .find(|c| c.owner == owner && c.meta.id == id)
                .ok_or_else(|| Self::not_found(id))?;
            conversation.meta.title = title;
            conversation.meta.updated_at = Utc::now();
            Ok(())
        })
    }

    fn delete_conversation(
        &self,
        owner: UserId,
        id: ConversationId,
    ) -> StoreFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut conversations = lock(&self.conversations);
            let before = conversations.len();
            conversations.retain(|c| !(c.owner == owner && c.meta.id == id));
            if conversations.len() == before {
                return Err(Self::not_found(id));
            }
            Ok(())
        })
    }
}

/// How the next upstream call settles.
pub enum UpstreamScript {
    /// Return this completion.
    Reply(String),
    /// Fail with this error.
    Fail(UpstreamError),
    /// Never settle.
    Hang,
}

/// Upstream aggregator that plays back scripted settlements.
pub struct ScriptedUpstream {
    scripts: Mutex<VecDeque<UpstreamScript>>,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedUpstream {
    pub fn new(scripts: Vec<UpstreamScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        lock(&self.requests).clone()
    }
}

impl Upstream for ScriptedUpstream {
    fn generate(&self, request: UpstreamRequest) -> UpstreamFuture<'_, Result<String, UpstreamError>> {
        lock(&self.requests).push(request);
        let script = lock(&self.scripts).pop_front();
        Box::pin(async move {
            match script {
                Some(UpstreamScript::Reply(text)) => Ok(text),
                Some(UpstreamScript::Fail(err)) => Err(err),
                Some(UpstreamScript::Hang) => std::future::pending().await,
                None => Err(UpstreamError::EmptyCompletion),
            }
        })
    }
}
