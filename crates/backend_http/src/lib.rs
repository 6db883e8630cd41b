//! HTTP implementation of the `backend_api` contract.
//!
//! This crate owns request building, retry policy, timeouts, and SSE frame
//! parsing for the three backend endpoints: the chat exchange
//! (`POST {base}/chat.message`), the status pull (`GET {base}/agents/status`),
//! and the push subscription (`GET {base}/agents/stream`). It contains no
//! session, permission, or UI logic.

pub mod client;
pub mod config;
pub mod retry;
pub mod sse;
pub mod url;

pub use client::HttpBackend;
pub use config::HttpBackendConfig;
pub use sse::SseStreamParser;
pub use url::{agents_status_url, agents_stream_url, chat_message_url, normalize_base_url};
