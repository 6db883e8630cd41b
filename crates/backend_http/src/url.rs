/// Default base URL when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8787/api";

const CHAT_SUFFIX: &str = "/chat.message";
const STATUS_SUFFIX: &str = "/agents/status";
const STREAM_SUFFIX: &str = "/agents/stream";

/// Normalize a configured base URL.
///
/// Normalization rules:
/// 1) empty input falls back to [`DEFAULT_BASE_URL`]
/// 2) trailing slashes are stripped
/// 3) a base that already names one of the known endpoints is reduced back
///    to its root, so callers may paste a full endpoint URL
pub fn normalize_base_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        input.trim()
    };

    let trimmed = base.trim_end_matches('/');
    for suffix in [CHAT_SUFFIX, STATUS_SUFFIX, STREAM_SUFFIX] {
        if let Some(root) = trimmed.strip_suffix(suffix) {
            return root.to_string();
        }
    }
    trimmed.to_string()
}

/// Endpoint for one chat exchange.
pub fn chat_message_url(base: &str) -> String {
    format!("{}{CHAT_SUFFIX}", normalize_base_url(base))
}

/// Endpoint for the full status pull.
pub fn agents_status_url(base: &str) -> String {
    format!("{}{STATUS_SUFFIX}", normalize_base_url(base))
}

/// Endpoint for the push subscription stream.
pub fn agents_stream_url(base: &str) -> String {
    format!("{}{STREAM_SUFFIX}", normalize_base_url(base))
}
