//! Transport-agnostic backend contract for the nucleus core.
//!
//! This crate intentionally defines only the wire payload shapes and the
//! traits a backend must satisfy: one request/response chat exchange and a
//! worker-status feed (push subscription plus a pull equivalent). It excludes
//! transport details, retry policy, and UI coupling.

use std::fmt;
use std::sync::{atomic::AtomicBool, Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared cancellation flag for an in-flight backend call.
pub type CancelSignal = Arc<AtomicBool>;

/// Outbound chat exchange payload (`POST /chat.message`).
///
/// `permissions` and `tier` are advisory hints for response shaping; the
/// backend re-validates and remains the final authority on enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Scope-keyed context object; contains only scopes the tier permits.
    pub context: Value,
    pub session_id: String,
    pub tier: String,
    pub permissions: Value,
    pub page: String,
}

/// Chat exchange response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    /// Present iff `success` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub memory_updated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_context: Option<Vec<MemoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_actions: Option<Vec<AgentAction>>,
}

impl ChatResponse {
    /// Returns the assistant reply when the exchange succeeded with a body.
    #[must_use]
    pub fn reply_text(&self) -> Option<&str> {
        if self.success {
            self.message.as_deref()
        } else {
            None
        }
    }
}

/// Memory delta returned alongside a chat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub role: String,
    pub content: String,
}

/// Backend-declared agent action surfaced inline with a chat response.
///
/// Informational only: the status feed remains the source of truth for
/// worker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent: String,
    pub action: String,
}

/// Worker activity state reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Active,
    Error,
    Unreachable,
}

impl WorkerState {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "idle" => Self::Idle,
            "active" => Self::Active,
            "error" => Self::Error,
            "unreachable" => Self::Unreachable,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Error => "error",
            Self::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetrics {
    #[serde(default)]
    pub tasks_completed: u32,
    #[serde(default)]
    pub efficiency_pct: u8,
}

/// One worker's status row. Snapshots carry the full row; consumers replace
/// rather than merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub agent_id: String,
    pub status: WorkerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_activity_text: Option<String>,
    #[serde(default)]
    pub metrics: WorkerMetrics,
}

/// Full worker-status table with aggregate roll-up (`GET /agents/status`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub agents: Vec<WorkerStatus>,
    #[serde(default)]
    pub active_agents: u32,
    #[serde(default)]
    pub total_agents: u32,
    #[serde(default)]
    pub system_status: String,
}

/// Message delivered over the push subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    AgentStatus(StatusSnapshot),
    Notification(Notification),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
}

/// Failure taxonomy shared by all backend implementations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    InvalidBaseUrl(String),
    /// Connection-level failure before or during a request.
    Network(String),
    /// Non-success HTTP status with a parsed (never user-facing) message.
    Status(u16, String),
    /// Bounded call deadline elapsed.
    Timeout,
    /// Response body did not match the wire contract.
    Malformed(String),
    RetryExhausted {
        status: Option<u16>,
        last_error: Option<String>,
    },
    /// Push subscription could not be established or broke mid-stream.
    StreamFailed(String),
    Cancelled,
}

impl BackendError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl(url) => write!(f, "invalid base URL: {url}"),
            Self::Network(message) => write!(f, "network failure: {message}"),
            Self::Status(code, message) => write!(f, "backend returned {code}: {message}"),
            Self::Timeout => f.write_str("backend call timed out"),
            Self::Malformed(message) => write!(f, "malformed backend payload: {message}"),
            Self::RetryExhausted { status, last_error } => {
                write!(f, "retries exhausted")?;
                if let Some(status) = status {
                    write!(f, " (last status {status})")?;
                }
                if let Some(last_error) = last_error {
                    write!(f, ": {last_error}")?;
                }
                Ok(())
            }
            Self::StreamFailed(message) => write!(f, "status stream failed: {message}"),
            Self::Cancelled => f.write_str("backend call cancelled"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Backend interface for one chat exchange.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Sends one chat exchange and resolves with the backend reply.
    ///
    /// Implementations observe `cancel` cooperatively and resolve with
    /// [`BackendError::Cancelled`] once it is raised.
    async fn send_chat(
        &self,
        request: ChatRequest,
        cancel: CancelSignal,
    ) -> Result<ChatResponse, BackendError>;
}

/// Backend interface for the worker-status feed.
#[async_trait]
pub trait StatusChannel: Send + Sync + 'static {
    /// Pulls the full status table.
    async fn poll_status(&self) -> Result<StatusSnapshot, BackendError>;

    /// Lightweight liveness probe between full polls.
    async fn heartbeat(&self) -> Result<(), BackendError>;

    /// Establishes the push subscription and delivers events until the
    /// stream ends, errors, or `cancel` is raised.
    ///
    /// `on_connected` fires once, as soon as the channel is established and
    /// before any event, so callers can report a live (possibly quiet)
    /// stream. Returning `Ok(())` means the stream closed cleanly; callers
    /// decide whether to reconnect or fall back to polling.
    async fn subscribe(
        &self,
        cancel: CancelSignal,
        on_connected: &mut (dyn FnMut() + Send),
        on_event: &mut (dyn FnMut(PushEvent) + Send),
    ) -> Result<(), BackendError>;
}
