//! Per-visit conversational state: transcript and bounded memory.
//!
//! The session lives for the life of the owning [`crate::runtime::Nucleus`];
//! there is no persistence. The transcript is append-only and the memory
//! buffer is a fixed-size FIFO ring that exists only for memory-enabled
//! tiers.

use std::collections::VecDeque;

use backend_api::MemoryEntry;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum retained memory items; insertion beyond this evicts oldest-first.
pub const MEMORY_CAP: usize = 8;

/// Transcript message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

/// One transcript entry. Never mutated after creation; transcript order is
/// append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: String,
    pub is_error: bool,
}

impl Message {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            timestamp: now_rfc3339(),
            is_error: false,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
            timestamp: now_rfc3339(),
            is_error: false,
        }
    }

    /// Synthetic assistant entry recording a failed exchange. The text is
    /// generic; raw backend errors go to the log, not the transcript.
    #[must_use]
    pub fn error_notice(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Assistant,
            text: text.into(),
            timestamp: now_rfc3339(),
            is_error: true,
        }
    }
}

/// One retained memory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub role: String,
    pub content: String,
    pub recorded_at: String,
}

impl From<MemoryEntry> for MemoryItem {
    fn from(entry: MemoryEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.content,
            recorded_at: now_rfc3339(),
        }
    }
}

/// Per-visit conversational state container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    session_id: String,
    created_at: String,
    transcript: Vec<Message>,
    memory: VecDeque<MemoryItem>,
    allow_memory: bool,
}

impl Session {
    /// Creates a fresh session. `allow_memory` comes from the resolved
    /// permission set and is fixed for the session's lifetime.
    #[must_use]
    pub fn create(allow_memory: bool) -> Self {
        Self {
            session_id: new_session_id(),
            created_at: now_rfc3339(),
            transcript: Vec::new(),
            memory: VecDeque::with_capacity(MEMORY_CAP),
            allow_memory,
        }
    }

    /// Stable for the life of the session; attached to every outbound
    /// request so the backend can correlate turns.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    #[must_use]
    pub fn allow_memory(&self) -> bool {
        self.allow_memory
    }

    pub fn append_message(&mut self, message: Message) {
        self.transcript.push(message);
    }

    /// Folds memory items into the ring. No-op for memory-disabled tiers;
    /// insertion beyond [`MEMORY_CAP`] evicts oldest-first.
    pub fn append_memory(&mut self, items: impl IntoIterator<Item = MemoryItem>) {
        if !self.allow_memory {
            return;
        }

        for item in items {
            if self.memory.len() == MEMORY_CAP {
                self.memory.pop_front();
            }
            self.memory.push_back(item);
        }
    }

    /// The most recent `k` memory items, oldest first.
    #[must_use]
    pub fn recent_memory(&self, k: usize) -> Vec<MemoryItem> {
        let skip = self.memory.len().saturating_sub(k);
        self.memory.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// Time plus a random component; uniqueness is probabilistic.
fn new_session_id() -> String {
    let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64;
    format!("{millis:x}-{}", Uuid::new_v4().simple())
}
