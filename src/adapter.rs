//! Seam between the nucleus and whatever renders it.
//!
//! The runtime pushes state outward through this trait; no presentation
//! concern leaks inward. A host implements it once and the nucleus never
//! learns what a widget, a DOM node, or a terminal cell is.

use crate::capability::PermissionSet;
use crate::session::Message;
use crate::sync::{StatusBoard, SyncIndicator};

/// Callbacks the nucleus invokes as its state changes.
///
/// Implementations must be cheap; they run on the runtime's event path.
/// The notification and indicator hooks default to no-ops so minimal
/// hosts only render the transcript and the status board.
pub trait PresentationAdapter: Send + Sync {
    /// The conversation transcript changed (new message, error notice).
    fn on_transcript_changed(&self, transcript: &[Message]);

    /// The worker-status board was replaced with a fresh snapshot.
    fn on_status_changed(&self, board: &StatusBoard);

    /// Capabilities were resolved for the active tier.
    fn on_permissions_resolved(&self, permissions: &PermissionSet);

    /// Out-of-band notice pushed by the backend.
    fn on_notification(&self, _text: &str) {}

    /// Connectivity indicator changed (live, polling, reconnecting).
    fn on_sync_indicator(&self, _indicator: SyncIndicator) {}
}
