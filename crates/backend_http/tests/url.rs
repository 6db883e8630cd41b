use backend_http::url::DEFAULT_BASE_URL;
use backend_http::{agents_status_url, agents_stream_url, chat_message_url, normalize_base_url};

#[test]
fn empty_base_falls_back_to_default() {
    assert_eq!(normalize_base_url(""), DEFAULT_BASE_URL);
    assert_eq!(normalize_base_url("   "), DEFAULT_BASE_URL);
}

#[test]
fn trailing_slashes_are_stripped() {
    assert_eq!(
        normalize_base_url("https://backend.example/api///"),
        "https://backend.example/api"
    );
}

#[test]
fn full_endpoint_urls_reduce_to_their_root() {
    for pasted in [
        "https://backend.example/api/chat.message",
        "https://backend.example/api/agents/status",
        "https://backend.example/api/agents/stream",
    ] {
        assert_eq!(normalize_base_url(pasted), "https://backend.example/api");
    }
}

#[test]
fn endpoints_share_a_normalized_root() {
    let base = "https://backend.example/api/";
    assert_eq!(
        chat_message_url(base),
        "https://backend.example/api/chat.message"
    );
    assert_eq!(
        agents_status_url(base),
        "https://backend.example/api/agents/status"
    );
    assert_eq!(
        agents_stream_url(base),
        "https://backend.example/api/agents/stream"
    );
}
