//! Async driver tying the pure state machines to a backend and a host.
//!
//! [`Nucleus`] owns the dispatch pipeline and the status synchronizer behind
//! mutexes, performs side effects (HTTP exchanges, push subscription, poll
//! timers) on tokio tasks, and reports every externally visible change
//! through the [`PresentationAdapter`]. All pipeline and synchronizer logic
//! stays in their modules; this file only sequences locks, tasks and timers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use backend_api::{
    AgentAction, CancelSignal, ChatBackend, ChatRequest, PushEvent, StatusChannel, StatusSnapshot,
};
use backend_http::{HttpBackend, HttpBackendConfig};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::PresentationAdapter;
use crate::capability::{resolve_or_lowest, PermissionSet, Tier};
use crate::context::PageSnapshot;
use crate::dispatch::{DispatchHost, ExchangeEvent, ExchangeId, Pipeline};
use crate::error::NucleusError;
use crate::session::Message;
use crate::sync::{StatusBoard, SyncIndicator, SyncState, Synchronizer};

/// Default cadence for the polling fallback.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default cadence for liveness probes while polling.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Timer cadences, overridable so tests run in milliseconds.
#[derive(Debug, Clone)]
pub struct NucleusConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

struct ActiveExchange {
    exchange_id: ExchangeId,
    cancel: CancelSignal,
    join_handle: JoinHandle<()>,
}

struct NucleusInner {
    pipeline: Mutex<Pipeline>,
    sync: Mutex<Synchronizer>,
    adapter: Arc<dyn PresentationAdapter>,
    chat: Arc<dyn ChatBackend>,
    status: Arc<dyn StatusChannel>,
    config: NucleusConfig,
    page_snapshot: Mutex<PageSnapshot>,
    next_exchange_id: AtomicU64,
    active_exchange: Mutex<Option<ActiveExchange>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    sync_cancel: CancelSignal,
    last_indicator: Mutex<Option<SyncIndicator>>,
    terminated: AtomicBool,
}

/// The nucleus runtime. Cheap to clone by design of its inner `Arc`;
/// must be used from within a tokio runtime.
pub struct Nucleus {
    inner: Arc<NucleusInner>,
}

impl Nucleus {
    /// Builds a nucleus for the given tier string. An unknown tier resolves
    /// to the lowest tier rather than failing.
    pub fn new(
        tier: &str,
        page: impl Into<String>,
        adapter: Arc<dyn PresentationAdapter>,
        chat: Arc<dyn ChatBackend>,
        status: Arc<dyn StatusChannel>,
    ) -> Self {
        Self::with_config(tier, page, adapter, chat, status, NucleusConfig::default())
    }

    pub fn with_config(
        tier: &str,
        page: impl Into<String>,
        adapter: Arc<dyn PresentationAdapter>,
        chat: Arc<dyn ChatBackend>,
        status: Arc<dyn StatusChannel>,
        config: NucleusConfig,
    ) -> Self {
        let (tier, permissions) = resolve_or_lowest(tier);
        adapter.on_permissions_resolved(&permissions);

        let page = page.into();
        info!(tier = tier.as_str(), page = %page, "nucleus created");

        Self {
            inner: Arc::new(NucleusInner {
                pipeline: Mutex::new(Pipeline::new(tier, permissions, page)),
                sync: Mutex::new(Synchronizer::new()),
                adapter,
                chat,
                status,
                config,
                page_snapshot: Mutex::new(PageSnapshot::default()),
                next_exchange_id: AtomicU64::new(1),
                active_exchange: Mutex::new(None),
                sync_task: Mutex::new(None),
                sync_cancel: Arc::new(AtomicBool::new(false)),
                last_indicator: Mutex::new(None),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    /// Builds a nucleus backed by a single HTTP client for both the chat
    /// and the status endpoints.
    pub fn connect_http(
        http: HttpBackendConfig,
        tier: &str,
        page: impl Into<String>,
        adapter: Arc<dyn PresentationAdapter>,
    ) -> Result<Self, NucleusError> {
        let backend = Arc::new(HttpBackend::new(http)?);
        let chat: Arc<dyn ChatBackend> = Arc::clone(&backend) as _;
        let status: Arc<dyn StatusChannel> = backend as _;
        Ok(Self::new(tier, page, adapter, chat, status))
    }

    /// Starts status synchronization: one push attempt, then the polling
    /// fallback. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut sync_task = lock_unpoisoned(&self.inner.sync_task);
        if sync_task.is_some() || self.inner.terminated.load(Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *sync_task = Some(tokio::spawn(async move { inner.sync_loop().await }));
    }

    /// Submits one user message against the current page snapshot.
    ///
    /// While an exchange is in flight the message is held as the queued
    /// draft; a later submission supersedes it.
    pub fn submit(&self, input: &str, snapshot: &PageSnapshot) -> Result<(), NucleusError> {
        if self.inner.terminated.load(Ordering::SeqCst) {
            return Err(NucleusError::Terminated);
        }

        {
            let mut current = lock_unpoisoned(&self.inner.page_snapshot);
            *current = snapshot.clone();
        }
        self.inner.submit_internal(input);
        Ok(())
    }

    /// Cancels the in-flight exchange, if any, and drops the queued draft.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let mut host = RuntimeHost::new(Arc::clone(inner));
        {
            let mut pipeline = lock_unpoisoned(&inner.pipeline);
            pipeline.cancel(&mut host);
        }
        host.flush();
    }

    /// Stops all background activity. The nucleus accepts no submissions
    /// afterwards.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        inner.sync_cancel.store(true, Ordering::SeqCst);
        if let Some(task) = lock_unpoisoned(&inner.sync_task).take() {
            task.abort();
        }
        if let Some(active) = lock_unpoisoned(&inner.active_exchange).take() {
            active.cancel.store(true, Ordering::SeqCst);
            active.join_handle.abort();
        }
        debug!("nucleus shut down");
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        lock_unpoisoned(&self.inner.pipeline).tier()
    }

    #[must_use]
    pub fn permissions(&self) -> PermissionSet {
        lock_unpoisoned(&self.inner.pipeline).permissions().clone()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        lock_unpoisoned(&self.inner.pipeline)
            .session()
            .session_id()
            .to_string()
    }

    #[must_use]
    pub fn transcript(&self) -> Vec<Message> {
        lock_unpoisoned(&self.inner.pipeline).transcript().to_vec()
    }

    #[must_use]
    pub fn status_board(&self) -> StatusBoard {
        lock_unpoisoned(&self.inner.sync).board().clone()
    }

    /// True while an exchange is awaiting its backend response.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        lock_unpoisoned(&self.inner.pipeline).is_awaiting_response()
    }
}

impl Clone for Nucleus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl NucleusInner {
    fn submit_internal(self: &Arc<Self>, input: &str) {
        let snapshot = lock_unpoisoned(&self.page_snapshot).clone();
        let mut host = RuntimeHost::new(Arc::clone(self));
        {
            let mut pipeline = lock_unpoisoned(&self.pipeline);
            pipeline.submit(input, &snapshot, &mut host);
        }
        host.flush();
    }

    fn begin_exchange(self: &Arc<Self>, request: ChatRequest) -> Result<ExchangeId, String> {
        let mut active = lock_unpoisoned(&self.active_exchange);
        if active.is_some() {
            return Err("Exchange already in flight".to_string());
        }

        let exchange_id = self.next_exchange_id.fetch_add(1, Ordering::SeqCst);
        let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(self);
        let task_cancel = Arc::clone(&cancel);
        let join_handle = tokio::spawn(async move {
            let outcome = inner.chat.send_chat(request, Arc::clone(&task_cancel)).await;
            let event = match outcome {
                Ok(response) => ExchangeEvent::Completed {
                    exchange_id,
                    response,
                },
                Err(error) if error.is_cancelled() || task_cancel.load(Ordering::SeqCst) => {
                    ExchangeEvent::Cancelled { exchange_id }
                }
                Err(error) => {
                    warn!(%error, exchange_id, "chat exchange failed");
                    ExchangeEvent::Failed { exchange_id }
                }
            };
            inner.apply_exchange_event(event);
        });

        *active = Some(ActiveExchange {
            exchange_id,
            cancel,
            join_handle,
        });
        Ok(exchange_id)
    }

    fn apply_exchange_event(self: &Arc<Self>, event: ExchangeEvent) {
        let exchange_id = event.exchange_id();
        let mut host = RuntimeHost::new(Arc::clone(self));

        // Free the exchange slot first so the pipeline can start a new
        // exchange the moment it re-arms.
        self.clear_active_if_matching(exchange_id);

        let resubmit = {
            let mut pipeline = lock_unpoisoned(&self.pipeline);
            pipeline.on_exchange_event(event, &mut host);
            if pipeline.is_awaiting_response() {
                None
            } else {
                pipeline.take_queued_draft()
            }
        };

        host.flush();

        if let Some(draft) = resubmit {
            debug!(exchange_id, "resubmitting queued draft");
            self.submit_internal(&draft);
        }
    }

    fn clear_active_if_matching(&self, exchange_id: ExchangeId) {
        let mut active = lock_unpoisoned(&self.active_exchange);
        let matches = active
            .as_ref()
            .map(|current| current.exchange_id == exchange_id)
            .unwrap_or(false);
        if matches {
            active.take();
        }
    }

    fn signal_cancel(&self, exchange_id: ExchangeId) {
        let active = lock_unpoisoned(&self.active_exchange);
        if let Some(active) = active.as_ref() {
            if active.exchange_id == exchange_id {
                active.cancel.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn sync_loop(self: Arc<Self>) {
        self.with_sync(|sync| sync.on_connect_started());

        let subscribe_cancel = Arc::clone(&self.sync_cancel);
        let connect_sink = Arc::clone(&self);
        let mut on_connected = move || connect_sink.with_sync(|sync| sync.on_stream_established());
        let event_sink = Arc::clone(&self);
        let mut on_event = move |event: PushEvent| event_sink.apply_push_event(event);
        let outcome = self
            .status
            .subscribe(subscribe_cancel, &mut on_connected, &mut on_event)
            .await;

        if self.sync_cancel.load(Ordering::SeqCst) {
            return;
        }

        let was_streaming =
            lock_unpoisoned(&self.sync).state() == SyncState::Streaming;
        match outcome {
            Ok(()) if was_streaming => {
                self.with_sync(|sync| sync.on_stream_lost("stream ended"));
            }
            Ok(()) => {
                self.with_sync(|sync| sync.on_push_unavailable("stream ended before any event"));
            }
            Err(error) if error.is_cancelled() => return,
            Err(error) if was_streaming => {
                self.with_sync(|sync| sync.on_stream_lost(&error.to_string()));
            }
            Err(error) => {
                self.with_sync(|sync| sync.on_push_unavailable(&error.to_string()));
            }
        }

        self.poll_loop().await;
    }

    async fn poll_loop(&self) {
        let mut poll_tick = tokio::time::interval(self.config.poll_interval);
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval);
        poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.sync_cancel.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                _ = poll_tick.tick() => self.poll_once().await,
                _ = heartbeat_tick.tick() => self.heartbeat_once().await,
            }
        }
    }

    async fn poll_once(&self) {
        // Awaited inline, so a slow cycle delays the next tick and
        // `MissedTickBehavior::Skip` drops the ticks it overran. Cycles
        // never overlap.
        let result = self.status.poll_status().await;

        match result {
            Ok(snapshot) => self.ingest_snapshot(snapshot),
            Err(error) => self.with_sync(|sync| sync.on_poll_failed(&error.to_string())),
        }
    }

    async fn heartbeat_once(&self) {
        let alive = self.status.heartbeat().await.is_ok();
        self.with_sync(|sync| sync.on_heartbeat(alive));
    }

    fn apply_push_event(self: &Arc<Self>, event: PushEvent) {
        match event {
            PushEvent::AgentStatus(snapshot) => self.ingest_snapshot(snapshot),
            PushEvent::Notification(notification) => {
                self.adapter.on_notification(&notification.text);
            }
        }
    }

    fn ingest_snapshot(&self, snapshot: StatusSnapshot) {
        let board = {
            let mut sync = lock_unpoisoned(&self.sync);
            match sync.apply_snapshot(snapshot) {
                Ok(()) => Some(sync.board().clone()),
                Err(error) => {
                    warn!(%error, "rejected malformed status snapshot");
                    None
                }
            }
        };

        if let Some(board) = board {
            self.adapter.on_status_changed(&board);
        }
        self.notify_indicator();
    }

    /// Applies a synchronizer mutation, then reports any indicator change.
    fn with_sync(&self, f: impl FnOnce(&mut Synchronizer)) {
        {
            let mut sync = lock_unpoisoned(&self.sync);
            f(&mut sync);
        }
        self.notify_indicator();
    }

    fn notify_indicator(&self) {
        let indicator = lock_unpoisoned(&self.sync).indicator();
        let changed = {
            let mut last = lock_unpoisoned(&self.last_indicator);
            if *last == Some(indicator) {
                false
            } else {
                *last = Some(indicator);
                true
            }
        };
        if changed {
            self.adapter.on_sync_indicator(indicator);
        }
    }
}

/// Collects side effects requested by a pipeline transition so adapter
/// callbacks run after the pipeline lock is released.
struct RuntimeHost {
    inner: Arc<NucleusInner>,
    transcript_dirty: bool,
    agent_actions: Vec<AgentAction>,
}

impl RuntimeHost {
    fn new(inner: Arc<NucleusInner>) -> Self {
        Self {
            inner,
            transcript_dirty: false,
            agent_actions: Vec::new(),
        }
    }

    fn flush(self) {
        for action in &self.agent_actions {
            info!(agent = %action.agent, action = %action.action, "agent action reported");
            self.inner
                .adapter
                .on_notification(&format!("{}: {}", action.agent, action.action));
        }

        if self.transcript_dirty {
            let transcript = lock_unpoisoned(&self.inner.pipeline).transcript().to_vec();
            self.inner.adapter.on_transcript_changed(&transcript);
        }
    }
}

impl DispatchHost for RuntimeHost {
    fn start_exchange(&mut self, request: ChatRequest) -> Result<ExchangeId, String> {
        self.inner.begin_exchange(request)
    }

    fn abort_exchange(&mut self, exchange_id: ExchangeId) {
        self.inner.signal_cancel(exchange_id);
    }

    fn notify_transcript(&mut self) {
        self.transcript_dirty = true;
    }

    fn notify_agent_actions(&mut self, actions: &[AgentAction]) {
        self.agent_actions.extend_from_slice(actions);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
