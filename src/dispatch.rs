//! One request/response exchange cycle, as a pure state machine.
//!
//! [`Pipeline`] owns the session and walks `Idle → Validating →
//! AssemblingContext → AwaitingResponse → Updating → Idle`, with
//! `ErrorRecovery → Idle` on any failure. Side effects go through the
//! [`DispatchHost`] seam so the machine is testable without a runtime or a
//! network.
//!
//! One exchange may be in flight per session. A submission while one is
//! outstanding is queued as a single superseding draft: a newer draft
//! replaces the queued one, and the driver resubmits it after the in-flight
//! exchange reaches a terminal state. A failed turn always re-arms the
//! pipeline; no state requires a reload.

use backend_api::{AgentAction, ChatRequest, ChatResponse};
use tracing::warn;

use crate::capability::{PermissionSet, Tier};
use crate::context::{assemble, PageSnapshot};
use crate::session::{Message, MemoryItem, Session, MEMORY_CAP};

/// Identifier for one dispatch exchange.
pub type ExchangeId = u64;

/// Generic user-visible text for a failed exchange. Raw backend errors are
/// logged, never displayed.
pub const EXCHANGE_FAILED_TEXT: &str =
    "Something went wrong handling that message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Validating,
    AssemblingContext,
    AwaitingResponse { exchange_id: ExchangeId },
    Updating,
    ErrorRecovery,
}

/// Terminal event for one exchange, delivered by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    Completed {
        exchange_id: ExchangeId,
        response: ChatResponse,
    },
    /// Network failure, timeout, or malformed payload. The raw error is
    /// logged by the driver before this event is applied.
    Failed { exchange_id: ExchangeId },
    Cancelled { exchange_id: ExchangeId },
}

impl ExchangeEvent {
    #[must_use]
    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            Self::Completed { exchange_id, .. }
            | Self::Failed { exchange_id }
            | Self::Cancelled { exchange_id } => *exchange_id,
        }
    }
}

/// Host operations the pipeline needs from its driver.
pub trait DispatchHost {
    /// Issues the outbound call; returns the exchange id on acceptance.
    fn start_exchange(&mut self, request: ChatRequest) -> Result<ExchangeId, String>;

    /// Aborts an in-flight exchange.
    fn abort_exchange(&mut self, exchange_id: ExchangeId);

    /// Transcript or memory changed; the presentation layer should re-read.
    fn notify_transcript(&mut self);

    /// Backend-declared agent actions surfaced inline with a response.
    /// Informational only; the status feed stays authoritative.
    fn notify_agent_actions(&mut self, actions: &[AgentAction]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingUserTurn {
    exchange_id: ExchangeId,
    /// Recorded (and timestamped) at submit time, appended at resolution.
    message: Message,
}

/// Dispatch pipeline state machine. Owns the session for its lifetime.
#[derive(Debug)]
pub struct Pipeline {
    state: PipelineState,
    tier: Tier,
    permissions: PermissionSet,
    session: Session,
    page: String,
    queued_draft: Option<String>,
    pending_user: Option<PendingUserTurn>,
    cancelling: Option<ExchangeId>,
}

impl Pipeline {
    #[must_use]
    pub fn new(tier: Tier, permissions: PermissionSet, page: impl Into<String>) -> Self {
        let session = Session::create(permissions.allow_memory);
        Self {
            state: PipelineState::Idle,
            tier,
            permissions,
            session,
            page: page.into(),
            queued_draft: None,
            pending_user: None,
            cancelling: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        self.session.transcript()
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn queued_draft(&self) -> Option<&str> {
        self.queued_draft.as_deref()
    }

    /// Removes and returns the queued draft. Drivers call this after a
    /// terminal event to resubmit the superseding draft.
    pub fn take_queued_draft(&mut self) -> Option<String> {
        self.queued_draft.take()
    }

    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        matches!(self.state, PipelineState::AwaitingResponse { .. })
    }

    /// Submits user input.
    ///
    /// Empty or whitespace-only input is a silent no-op. While an exchange
    /// is outstanding the text becomes the queued draft, superseding any
    /// previous one.
    pub fn submit(&mut self, input: &str, snapshot: &PageSnapshot, host: &mut dyn DispatchHost) {
        let text = input.trim();
        if text.is_empty() {
            return;
        }

        if self.is_awaiting_response() || self.cancelling.is_some() {
            self.queued_draft = Some(text.to_string());
            return;
        }

        self.state = PipelineState::Validating;
        if !self.permissions.allow_chat {
            // Fail-closed guard; every defined tier allows chat today.
            self.state = PipelineState::Idle;
            return;
        }

        self.state = PipelineState::AssemblingContext;
        let memory = self.session.recent_memory(MEMORY_CAP);
        let context = assemble(&self.permissions, snapshot, &memory, text);

        let request = ChatRequest {
            message: text.to_string(),
            context: context.to_wire(),
            session_id: self.session.session_id().to_string(),
            tier: self.tier.as_str().to_string(),
            permissions: self.permissions.to_wire(),
            page: self.page.clone(),
        };

        match host.start_exchange(request) {
            Ok(exchange_id) => {
                self.pending_user = Some(PendingUserTurn {
                    exchange_id,
                    message: Message::user(text),
                });
                self.state = PipelineState::AwaitingResponse { exchange_id };
            }
            Err(error) => {
                warn!(%error, "exchange could not be started");
                self.record_failed_turn(Message::user(text));
                host.notify_transcript();
            }
        }
    }

    /// User-triggered cancel: aborts the outbound call, drops the queued
    /// draft, and returns directly to `Idle`. The eventual terminal event
    /// for the aborted exchange is ignored as stale.
    pub fn cancel(&mut self, host: &mut dyn DispatchHost) {
        if let PipelineState::AwaitingResponse { exchange_id } = self.state {
            self.cancelling = Some(exchange_id);
            self.pending_user = None;
            self.queued_draft = None;
            self.state = PipelineState::Idle;
            host.abort_exchange(exchange_id);
        }
    }

    /// Applies a terminal event from the driver.
    pub fn on_exchange_event(&mut self, event: ExchangeEvent, host: &mut dyn DispatchHost) {
        let exchange_id = event.exchange_id();

        if !self.is_active_exchange(exchange_id) {
            if self.cancelling == Some(exchange_id) {
                self.cancelling = None;
            }
            return;
        }

        match event {
            ExchangeEvent::Completed { response, .. } => {
                self.apply_completed(exchange_id, response, host);
            }
            ExchangeEvent::Failed { .. } => {
                self.apply_failed(exchange_id, host);
            }
            ExchangeEvent::Cancelled { .. } => {
                // A cancel that raced ahead of `cancel()` bookkeeping; the
                // turn is simply dropped.
                self.pending_user = None;
                self.state = PipelineState::Idle;
            }
        }
    }

    fn apply_completed(
        &mut self,
        exchange_id: ExchangeId,
        response: ChatResponse,
        host: &mut dyn DispatchHost,
    ) {
        self.state = PipelineState::Updating;

        let user = self.take_pending_user(exchange_id);
        match response.reply_text() {
            Some(reply) => {
                if let Some(user) = user {
                    self.session.append_message(user);
                }
                self.session.append_message(Message::assistant(reply));

                if let Some(entries) = response.memory_context {
                    self.session
                        .append_memory(entries.into_iter().map(MemoryItem::from));
                }
                if let Some(actions) = response.agent_actions.as_deref() {
                    host.notify_agent_actions(actions);
                }

                self.state = PipelineState::Idle;
            }
            None => {
                // Declared success=false or missing body: treat as failure.
                warn!("backend declined the exchange without a reply body");
                self.state = PipelineState::ErrorRecovery;
                if let Some(user) = user {
                    self.session.append_message(user);
                }
                self.session
                    .append_message(Message::error_notice(EXCHANGE_FAILED_TEXT));
                self.state = PipelineState::Idle;
            }
        }

        host.notify_transcript();
    }

    fn apply_failed(&mut self, exchange_id: ExchangeId, host: &mut dyn DispatchHost) {
        self.state = PipelineState::ErrorRecovery;
        let user = self.take_pending_user(exchange_id);
        if let Some(user) = user {
            self.session.append_message(user);
        }
        self.session
            .append_message(Message::error_notice(EXCHANGE_FAILED_TEXT));
        self.state = PipelineState::Idle;
        host.notify_transcript();
    }

    fn record_failed_turn(&mut self, user: Message) {
        self.state = PipelineState::ErrorRecovery;
        self.session.append_message(user);
        self.session
            .append_message(Message::error_notice(EXCHANGE_FAILED_TEXT));
        self.state = PipelineState::Idle;
    }

    fn take_pending_user(&mut self, exchange_id: ExchangeId) -> Option<Message> {
        match &self.pending_user {
            Some(pending) if pending.exchange_id == exchange_id => {
                self.pending_user.take().map(|pending| pending.message)
            }
            _ => None,
        }
    }

    fn is_active_exchange(&self, exchange_id: ExchangeId) -> bool {
        matches!(
            self.state,
            PipelineState::AwaitingResponse { exchange_id: current } if current == exchange_id
        )
    }
}
