// src/messaging/chat.rs
//! Live view of one open conversation: initial load, periodic polling,
//! optimistic sends and stale-response discard.
//!
//! Every selection bumps a generation counter. Responses carry the generation
//! they were requested under and are dropped when it no longer matches, so a
//! slow poll for a previous conversation can never overwrite the current one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::MessagingClient;
use crate::core::error::{ApiResult, ClientError};
use crate::core::observable::{lock, Observable, Subscription};
use crate::types::{ConversationHandle, Message};
use crate::utils::{normalize_content, DEFAULT_PAGE_LIMIT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Refreshing,
    /// The server rejected the token. Polling is stopped until `set_token`.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum PendingState {
    Sending,
    Failed(String),
}

/// Outgoing text shown before the server has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMessage {
    pub local_id: Uuid,
    pub content: String,
    pub queued_at: DateTime<Utc>,
    pub state: PendingState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ChatView {
    pub conversation: Option<ConversationHandle>,
    pub phase: SyncPhase,
    /// Server messages, oldest first.
    pub messages: Vec<Message>,
    pub pending: Vec<PendingMessage>,
    /// Increases with every published change.
    pub revision: u64,
}

impl ChatView {
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PendingMessage> {
        self.pending
            .iter()
            .filter(|p| matches!(p.state, PendingState::Failed(_)))
    }
}

#[derive(Default)]
struct ChatState {
    generation: u64,
    token: Option<String>,
    poller: Option<CancellationToken>,
    view: ChatView,
}

struct ChatInner {
    client: MessagingClient,
    poll_interval: Duration,
    state: Mutex<ChatState>,
    view: Observable<ChatView>,
}

impl Drop for ChatInner {
    fn drop(&mut self) {
        if let Some(poller) = lock(&self.state).poller.take() {
            poller.cancel();
        }
    }
}

/// Where a request captured under `generation` should land.
struct Target {
    generation: u64,
    conversation_id: String,
    token: String,
}

#[derive(Clone)]
pub struct ChatSynchronizer {
    inner: Arc<ChatInner>,
}

impl ChatSynchronizer {
    pub fn new(client: MessagingClient, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(ChatInner {
                client,
                poll_interval,
                state: Mutex::new(ChatState::default()),
                view: Observable::new(ChatView::default()),
            }),
        }
    }

    pub fn snapshot(&self) -> ChatView {
        self.inner.view.get()
    }

    pub fn phase(&self) -> SyncPhase {
        lock(&self.inner.state).view.phase
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChatView) + Send + Sync + 'static,
    {
        self.inner.view.subscribe(callback)
    }

    pub fn watch(&self) -> watch::Receiver<ChatView> {
        self.inner.view.watch()
    }

    /// Select `conversation`, load its latest page and start polling it.
    /// Whatever was open before stops polling first.
    pub async fn open(&self, conversation: ConversationHandle, token: impl Into<String>) -> ChatView {
        let token = token.into();
        let conversation_id = conversation.id.clone();

        let generation = {
            let mut state = lock(&self.inner.state);
            if let Some(poller) = state.poller.take() {
                poller.cancel();
            }
            state.generation += 1;
            state.token = Some(token.clone());
            state.view.conversation = Some(conversation);
            state.view.phase = SyncPhase::Loading;
            state.view.messages.clear();
            state.view.pending.clear();
            let generation = state.generation;
            self.commit(state);
            generation
        };
        info!("Opened conversation {}", conversation_id);

        let fetched = self
            .inner
            .client
            .try_list_messages(&conversation_id, &token, None, DEFAULT_PAGE_LIMIT)
            .await;

        if matches!(fetched, Err(ClientError::SessionExpired)) {
            self.expire(generation);
            return self.snapshot();
        }

        let cancel = CancellationToken::new();
        let started = self.apply(generation, |view| {
            match fetched {
                Ok(messages) => view.messages = merge_messages(&view.messages, messages),
                Err(e) => warn!("Initial load of {} failed: {}", conversation_id, e),
            }
            view.phase = SyncPhase::Ready;
        });

        if started.is_some() {
            let mut state = lock(&self.inner.state);
            if state.generation == generation {
                state.poller = Some(cancel.clone());
                drop(state);
                self.spawn_poller(generation, cancel);
            }
        } else {
            debug!("Conversation {} was replaced while loading", conversation_id);
        }

        self.snapshot()
    }

    /// Stop polling and return to `Idle`. Late responses are discarded.
    pub fn close(&self) {
        let mut state = lock(&self.inner.state);
        if let Some(poller) = state.poller.take() {
            poller.cancel();
        }
        state.generation += 1;
        state.token = None;
        let was_open = state.view.conversation.take();
        state.view.phase = SyncPhase::Idle;
        state.view.messages.clear();
        state.view.pending.clear();
        self.commit(state);

        if let Some(conversation) = was_open {
            info!("Closed conversation {}", conversation.id);
        }
    }

    /// Swap the access token for the open conversation. An expired view goes
    /// back to `Ready` and polling restarts. Returns false when nothing is open.
    pub fn set_token(&self, token: impl Into<String>) -> bool {
        let mut state = lock(&self.inner.state);
        if state.view.conversation.is_none() {
            return false;
        }
        state.token = Some(token.into());
        if state.view.phase != SyncPhase::Expired {
            return true;
        }

        let generation = state.generation;
        let cancel = CancellationToken::new();
        state.poller = Some(cancel.clone());
        state.view.phase = SyncPhase::Ready;
        self.commit(state);
        info!("Token replaced, polling resumed for generation {}", generation);
        self.spawn_poller(generation, cancel);
        true
    }

    /// Fetch the latest page now instead of waiting for the next tick.
    pub async fn refresh(&self) {
        let generation = lock(&self.inner.state).generation;
        self.poll_once(generation).await;
    }

    /// Queue `content` as pending, send it, and reconcile with the server's copy.
    /// Rejected content never leaves the client and is not queued.
    pub async fn send(&self, content: &str) -> ApiResult<Message> {
        let content = normalize_content(content)?;
        let local_id = Uuid::new_v4();

        let target = {
            let mut state = lock(&self.inner.state);
            let target = Self::writable_target(&state)?;
            state.view.pending.push(PendingMessage {
                local_id,
                content: content.clone(),
                queued_at: Utc::now(),
                state: PendingState::Sending,
            });
            self.commit(state);
            target
        };

        self.deliver(target, local_id, content).await
    }

    /// Resend a message whose previous attempt failed.
    pub async fn retry(&self, local_id: Uuid) -> ApiResult<Message> {
        let (target, content) = {
            let mut state = lock(&self.inner.state);
            let target = Self::writable_target(&state)?;
            let pending = state
                .view
                .pending
                .iter_mut()
                .find(|p| p.local_id == local_id && matches!(p.state, PendingState::Failed(_)))
                .ok_or_else(|| ClientError::validation("No failed message with that id"))?;
            pending.state = PendingState::Sending;
            let content = pending.content.clone();
            self.commit(state);
            (target, content)
        };

        self.deliver(target, local_id, content).await
    }

    /// Drop a pending message. Returns whether it existed.
    pub fn discard(&self, local_id: Uuid) -> bool {
        let mut state = lock(&self.inner.state);
        let before = state.view.pending.len();
        state.view.pending.retain(|p| p.local_id != local_id);
        if state.view.pending.len() == before {
            return false;
        }
        self.commit(state);
        true
    }

    /// Fetch the page before the oldest loaded message. Returns how many new
    /// messages were added; failures add none.
    pub async fn load_older(&self) -> usize {
        let (target, oldest) = {
            let state = lock(&self.inner.state);
            match Self::target(&state) {
                Some(target) => (
                    target,
                    state.view.messages.first().map(|m| m.id.clone()),
                ),
                None => return 0,
            }
        };
        let Some(oldest) = oldest else {
            return 0;
        };

        let fetched = match self
            .inner
            .client
            .try_list_messages(
                &target.conversation_id,
                &target.token,
                Some(&oldest),
                DEFAULT_PAGE_LIMIT,
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Loading older messages failed: {}", e);
                return 0;
            }
        };

        self.apply(target.generation, |view| {
            let before = view.messages.len();
            view.messages = merge_messages(&view.messages, fetched);
            view.messages.len() - before
        })
        .unwrap_or(0)
    }

    /// Mark a message `viewer_id` received as read, locally and on the server in
    /// the background. The viewer's own messages are left alone.
    pub fn mark_read(&self, message_id: &str, viewer_id: &str) -> Option<JoinHandle<()>> {
        let token = {
            let mut state = lock(&self.inner.state);
            let token = state.token.clone()?;
            let message = state
                .view
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)?;
            if message.is_from(viewer_id) {
                return None;
            }
            if !message.read {
                message.read = true;
                self.commit(state);
            }
            token
        };
        Some(
            self.inner
                .client
                .spawn_mark_read(message_id.to_string(), token),
        )
    }

    async fn deliver(&self, target: Target, local_id: Uuid, content: String) -> ApiResult<Message> {
        let result = self
            .inner
            .client
            .send_message(&target.conversation_id, &content, &target.token)
            .await;

        match &result {
            Ok(message) => {
                let message = message.clone();
                self.apply(target.generation, move |view| {
                    view.pending.retain(|p| p.local_id != local_id);
                    view.messages = merge_messages(&view.messages, vec![message]);
                });
            }
            Err(e) => {
                warn!("Sending to {} failed: {}", target.conversation_id, e);
                let reason = e.to_string();
                self.apply(target.generation, move |view| {
                    if let Some(pending) = view.pending.iter_mut().find(|p| p.local_id == local_id) {
                        pending.state = PendingState::Failed(reason);
                    }
                });
                if e.is_session_expired() {
                    self.expire(target.generation);
                }
            }
        }
        result
    }

    async fn poll_once(&self, generation: u64) {
        let target = {
            let mut state = lock(&self.inner.state);
            if state.generation != generation {
                return;
            }
            let Some(target) = Self::target(&state) else {
                return;
            };
            if state.view.phase == SyncPhase::Ready {
                state.view.phase = SyncPhase::Refreshing;
                self.commit(state);
            }
            target
        };

        let fetched = self
            .inner
            .client
            .try_list_messages(&target.conversation_id, &target.token, None, DEFAULT_PAGE_LIMIT)
            .await;

        if matches!(fetched, Err(ClientError::SessionExpired)) {
            self.expire(generation);
            return;
        }

        let conversation_id = target.conversation_id;
        let applied = self.apply(generation, |view| {
            if view.conversation_id() != Some(conversation_id.as_str()) {
                return;
            }
            match fetched {
                Ok(messages) => view.messages = merge_messages(&view.messages, messages),
                Err(e) => warn!("Poll of {} failed, keeping current view: {}", conversation_id, e),
            }
            if view.phase == SyncPhase::Refreshing {
                view.phase = SyncPhase::Ready;
            }
        });
        if applied.is_none() {
            debug!("Discarding stale poll for {}", conversation_id);
        }
    }

    fn spawn_poller(&self, generation: u64, cancel: CancellationToken) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.poll_interval;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        ChatSynchronizer { inner }.poll_once(generation).await;
                    }
                }
            }
            debug!("Poller for generation {} stopped", generation);
        });
    }

    /// Stop polling and drop the rejected token. Pending messages stay so they
    /// can be retried after `set_token`.
    fn expire(&self, generation: u64) {
        let mut state = lock(&self.inner.state);
        if state.generation != generation || state.view.phase == SyncPhase::Expired {
            return;
        }
        if let Some(poller) = state.poller.take() {
            poller.cancel();
        }
        state.token = None;
        state.view.phase = SyncPhase::Expired;
        let conversation_id = state.view.conversation_id().map(str::to_string);
        self.commit(state);
        warn!(
            "Session expired while syncing {}; polling stopped",
            conversation_id.as_deref().unwrap_or("-")
        );
    }

    fn writable_target(state: &ChatState) -> ApiResult<Target> {
        if state.view.phase == SyncPhase::Expired {
            return Err(ClientError::SessionExpired);
        }
        Self::target(state).ok_or_else(|| ClientError::validation("No conversation is open"))
    }

    fn target(state: &ChatState) -> Option<Target> {
        Some(Target {
            generation: state.generation,
            conversation_id: state.view.conversation_id()?.to_string(),
            token: state.token.clone()?,
        })
    }

    /// Run `f` against the view if `generation` is still current, then publish.
    fn apply<R>(&self, generation: u64, f: impl FnOnce(&mut ChatView) -> R) -> Option<R> {
        let mut state = lock(&self.inner.state);
        if state.generation != generation {
            return None;
        }
        let result = f(&mut state.view);
        self.commit(state);
        Some(result)
    }

    /// Publish the guarded view. The lock is released before subscribers run;
    /// the revision check keeps a slower publisher from overwriting a newer view.
    fn commit(&self, mut state: MutexGuard<'_, ChatState>) {
        state.view.revision += 1;
        let next = state.view.clone();
        drop(state);
        self.inner
            .view
            .set_when(next, |current, next| next.revision > current.revision);
    }
}

/// Combine a fetched page with what is already shown, keyed by message id.
/// Fetched copies win; messages missing from the page are kept. The result is
/// ordered by `created_at`, untimed messages last, ties in arrival order.
pub fn merge_messages(current: &[Message], fetched: Vec<Message>) -> Vec<Message> {
    let mut seen: HashSet<String> = HashSet::with_capacity(fetched.len());
    let mut merged: Vec<Message> = Vec::with_capacity(current.len() + fetched.len());

    for message in current {
        if let Some(newer) = fetched.iter().find(|f| f.id == message.id) {
            merged.push(newer.clone());
        } else {
            merged.push(message.clone());
        }
        seen.insert(message.id.clone());
    }
    for message in fetched {
        if seen.insert(message.id.clone()) {
            merged.push(message);
        }
    }

    merged.sort_by_key(|m| (m.created_at.is_none(), m.created_at));
    merged
}
