//! Browser-resident intelligence nucleus.
//!
//! Invariant: at most one chat exchange is in flight per session; later
//! submissions supersede the queued draft instead of stacking.
//!
//! # Public API Overview
//! - Resolve tier capabilities with [`capability::resolve`] and friends.
//! - Assemble permission-scoped request context via [`context::assemble`].
//! - Drive conversations through [`Nucleus`], which owns the dispatch
//!   pipeline, the session, and the worker-status synchronizer.
//! - Render state by implementing [`PresentationAdapter`]; the nucleus
//!   never touches a presentation surface itself.
//!
//! Backend transport lives in the `backend_http` crate; `backend_api`
//! carries the wire contract, and `backend_mock` scripts it for tests.

pub mod adapter;
pub mod capability;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod runtime;
pub mod session;
pub mod sync;

/// Capability model.
pub use crate::capability::{
    agents_for, resolve, resolve_or_lowest, resolve_str, AgentDescriptor, AgentId, ContextScope,
    PermissionSet, Priority, Tier,
};

/// Context assembly.
pub use crate::context::{assemble, ContextObject, IntentSignals, PageSnapshot};

/// Conversation state.
pub use crate::dispatch::{Pipeline, PipelineState};
pub use crate::session::{MemoryItem, Message, Sender, Session};

/// Worker-status view.
pub use crate::sync::{StatusBoard, SyncIndicator, SyncState, Synchronizer};

/// Runtime surface.
pub use crate::adapter::PresentationAdapter;
pub use crate::error::NucleusError;
pub use crate::runtime::{Nucleus, NucleusConfig};
