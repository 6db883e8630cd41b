//! Deterministic mock implementation of the shared `backend_api` contract.
//!
//! This crate contains no transport logic and is intended for contract-level
//! integration testing of the nucleus core: scripted chat replies, injectable
//! failures and delays, scripted status snapshots, and a configurable push
//! subscription outcome.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use backend_api::{
    AgentAction, BackendError, CancelSignal, ChatBackend, ChatRequest, ChatResponse, MemoryEntry,
    PushEvent, StatusChannel, StatusSnapshot,
};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One scripted outcome for a chat exchange.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Success {
        text: String,
        memory: Vec<MemoryEntry>,
        actions: Vec<AgentAction>,
    },
    Failure(BackendError),
    /// Resolves successfully after holding the exchange in flight.
    DelayedSuccess { delay: Duration, text: String },
    /// Holds the exchange until the chat timeout or a cancel wins.
    NeverResolves,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Success {
            text: text.into(),
            memory: Vec::new(),
            actions: Vec::new(),
        }
    }
}

/// Scripted outcome for the push subscription.
#[derive(Debug, Clone)]
pub enum PushScript {
    /// Subscription attempt fails outright.
    Refuse(BackendError),
    /// Subscription connects, delivers the events, then closes cleanly.
    Deliver(Vec<PushEvent>),
    /// Subscription connects and stays open until cancelled.
    DeliverThenHold(Vec<PushEvent>),
}

/// Deterministic mock backend used by nucleus tests and local runs.
pub struct MockBackend {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
    snapshots: Mutex<VecDeque<Result<StatusSnapshot, BackendError>>>,
    last_snapshot: Mutex<Option<StatusSnapshot>>,
    push: Mutex<PushScript>,
    heartbeat_ok: Mutex<bool>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            snapshots: Mutex::new(VecDeque::new()),
            last_snapshot: Mutex::new(None),
            push: Mutex::new(PushScript::Refuse(BackendError::StreamFailed(
                "push unavailable".to_string(),
            ))),
            heartbeat_ok: Mutex::new(true),
        }
    }
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        lock_unpoisoned(&self.replies).push_back(reply);
    }

    pub fn push_snapshot(&self, snapshot: Result<StatusSnapshot, BackendError>) {
        lock_unpoisoned(&self.snapshots).push_back(snapshot);
    }

    pub fn set_push_script(&self, script: PushScript) {
        *lock_unpoisoned(&self.push) = script;
    }

    pub fn set_heartbeat_ok(&self, ok: bool) {
        *lock_unpoisoned(&self.heartbeat_ok) = ok;
    }

    /// Chat requests received so far, in arrival order.
    #[must_use]
    pub fn received_requests(&self) -> Vec<ChatRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    fn next_reply(&self) -> ScriptedReply {
        lock_unpoisoned(&self.replies)
            .pop_front()
            .unwrap_or_else(|| ScriptedReply::text("Mock reply."))
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn send_chat(
        &self,
        request: ChatRequest,
        cancel: CancelSignal,
    ) -> Result<ChatResponse, BackendError> {
        lock_unpoisoned(&self.requests).push(request);

        match self.next_reply() {
            ScriptedReply::Success {
                text,
                memory,
                actions,
            } => Ok(success_response(text, memory, actions)),
            ScriptedReply::Failure(error) => Err(error),
            ScriptedReply::DelayedSuccess { delay, text } => {
                sleep_cancellable(delay, &cancel).await?;
                Ok(success_response(text, Vec::new(), Vec::new()))
            }
            ScriptedReply::NeverResolves => loop {
                sleep_cancellable(CANCEL_POLL_INTERVAL, &cancel).await?;
            },
        }
    }
}

#[async_trait]
impl StatusChannel for MockBackend {
    async fn poll_status(&self) -> Result<StatusSnapshot, BackendError> {
        let scripted = lock_unpoisoned(&self.snapshots).pop_front();
        match scripted {
            Some(Ok(snapshot)) => {
                *lock_unpoisoned(&self.last_snapshot) = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(error)) => Err(error),
            None => lock_unpoisoned(&self.last_snapshot)
                .clone()
                .ok_or_else(|| BackendError::Network("no snapshot scripted".to_string())),
        }
    }

    async fn heartbeat(&self) -> Result<(), BackendError> {
        if *lock_unpoisoned(&self.heartbeat_ok) {
            Ok(())
        } else {
            Err(BackendError::Network("heartbeat refused".to_string()))
        }
    }

    async fn subscribe(
        &self,
        cancel: CancelSignal,
        on_connected: &mut (dyn FnMut() + Send),
        on_event: &mut (dyn FnMut(PushEvent) + Send),
    ) -> Result<(), BackendError> {
        let script = lock_unpoisoned(&self.push).clone();
        match script {
            PushScript::Refuse(error) => Err(error),
            PushScript::Deliver(events) => {
                on_connected();
                for event in events {
                    if cancel.load(Ordering::Acquire) {
                        return Err(BackendError::Cancelled);
                    }
                    on_event(event);
                }
                Ok(())
            }
            PushScript::DeliverThenHold(events) => {
                on_connected();
                for event in events {
                    if cancel.load(Ordering::Acquire) {
                        return Err(BackendError::Cancelled);
                    }
                    on_event(event);
                }
                loop {
                    sleep_cancellable(CANCEL_POLL_INTERVAL, &cancel).await?;
                }
            }
        }
    }
}

fn success_response(
    text: String,
    memory: Vec<MemoryEntry>,
    actions: Vec<AgentAction>,
) -> ChatResponse {
    ChatResponse {
        success: true,
        message: Some(text),
        memory_updated: !memory.is_empty(),
        memory_context: if memory.is_empty() {
            None
        } else {
            Some(memory)
        },
        agent_actions: if actions.is_empty() {
            None
        } else {
            Some(actions)
        },
    }
}

async fn sleep_cancellable(delay: Duration, cancel: &CancelSignal) -> Result<(), BackendError> {
    let mut remaining = delay;
    loop {
        if cancel.load(Ordering::Acquire) {
            return Err(BackendError::Cancelled);
        }
        if remaining.is_zero() {
            return Ok(());
        }
        let step = remaining.min(CANCEL_POLL_INTERVAL);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
