//! Live view of backend worker state.
//!
//! The synchronizer prefers a push subscription and falls back to
//! fixed-interval polling; neither path surfaces a hard failure to the
//! user. Every accepted snapshot replaces the worker table wholesale so the
//! UI never shows a mix of stale and fresh fields for the same agent. Its
//! life cycle is independent of the dispatch pipeline in both directions.

use std::collections::BTreeMap;

use backend_api::{StatusSnapshot, WorkerStatus};
use thiserror::Error;
use tracing::warn;

/// Consecutive failed cycles before the indicator turns to `Reconnecting`.
pub const REPEATED_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Streaming,
    PollingActive,
}

/// Neutral indicator for the presentation layer. Degradation is shown as
/// "connecting"/"reconnecting", never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncIndicator {
    Connecting,
    Live,
    Polling,
    Reconnecting,
}

/// Snapshot validation failure. The whole snapshot is rejected; the prior
/// table stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("agent entry {index} has an empty id")]
    EmptyAgentId { index: usize },

    #[error("duplicate agent id '{agent_id}'")]
    DuplicateAgentId { agent_id: String },

    #[error("agent '{agent_id}' reports efficiency {pct}% outside 0..=100")]
    EfficiencyOutOfRange { agent_id: String, pct: u8 },
}

/// The worker-status table plus the backend's aggregate roll-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBoard {
    pub workers: BTreeMap<String, WorkerStatus>,
    pub active_agents: u32,
    pub total_agents: u32,
    pub system_status: String,
}

/// Synchronizer state machine. Pure; the runtime drives timers and I/O.
#[derive(Debug, Default)]
pub struct Synchronizer {
    state: SyncState,
    board: StatusBoard,
    consecutive_failures: u32,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Synchronizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    #[must_use]
    pub fn indicator(&self) -> SyncIndicator {
        match self.state {
            SyncState::Disconnected | SyncState::Connecting => SyncIndicator::Connecting,
            SyncState::Streaming => SyncIndicator::Live,
            SyncState::PollingActive => {
                if self.consecutive_failures >= REPEATED_FAILURE_THRESHOLD {
                    SyncIndicator::Reconnecting
                } else {
                    SyncIndicator::Polling
                }
            }
        }
    }

    pub fn on_connect_started(&mut self) {
        self.state = SyncState::Connecting;
    }

    pub fn on_stream_established(&mut self) {
        self.state = SyncState::Streaming;
        self.consecutive_failures = 0;
    }

    /// Push channel could not be established within its bounded attempt.
    /// Silent fallback; polling takes over.
    pub fn on_push_unavailable(&mut self, error: &str) {
        warn!(%error, "push channel unavailable, falling back to polling");
        self.state = SyncState::PollingActive;
    }

    /// Push channel broke mid-stream. Same fallback as a failed connect.
    pub fn on_stream_lost(&mut self, error: &str) {
        warn!(%error, "push stream lost, falling back to polling");
        self.state = SyncState::PollingActive;
    }

    pub fn on_poll_failed(&mut self, error: &str) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        warn!(
            %error,
            consecutive_failures = self.consecutive_failures,
            "status poll failed"
        );
    }

    pub fn on_heartbeat(&mut self, alive: bool) {
        if alive {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }

    /// Validates and applies one snapshot, replacing the table wholesale.
    ///
    /// All-or-nothing: any invalid entry rejects the entire snapshot and
    /// leaves the prior table untouched.
    pub fn apply_snapshot(&mut self, snapshot: StatusSnapshot) -> Result<(), SnapshotError> {
        let workers = validate_snapshot(&snapshot)?;

        self.board = StatusBoard {
            workers,
            active_agents: snapshot.active_agents,
            total_agents: snapshot.total_agents,
            system_status: snapshot.system_status,
        };
        self.consecutive_failures = 0;
        Ok(())
    }
}

fn validate_snapshot(
    snapshot: &StatusSnapshot,
) -> Result<BTreeMap<String, WorkerStatus>, SnapshotError> {
    let mut workers = BTreeMap::new();

    for (index, worker) in snapshot.agents.iter().enumerate() {
        if worker.agent_id.trim().is_empty() {
            return Err(SnapshotError::EmptyAgentId { index });
        }
        if worker.metrics.efficiency_pct > 100 {
            return Err(SnapshotError::EfficiencyOutOfRange {
                agent_id: worker.agent_id.clone(),
                pct: worker.metrics.efficiency_pct,
            });
        }
        if workers
            .insert(worker.agent_id.clone(), worker.clone())
            .is_some()
        {
            return Err(SnapshotError::DuplicateAgentId {
                agent_id: worker.agent_id.clone(),
            });
        }
    }

    Ok(workers)
}
