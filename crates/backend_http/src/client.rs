use std::future::Future;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use backend_api::{
    BackendError, CancelSignal, ChatBackend, ChatRequest, ChatResponse, PushEvent, StatusChannel,
    StatusSnapshot,
};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use crate::config::HttpBackendConfig;
use crate::retry::{is_retryable_http_error, retry_delay_ms, MAX_RETRIES};
use crate::sse::SseStreamParser;
use crate::url::{agents_status_url, agents_stream_url, chat_message_url};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
const HEADER_SESSION_ID: &str = "session_id";
const ERROR_BODY_PREVIEW_LEN: usize = 200;

/// reqwest-backed implementation of [`ChatBackend`] and [`StatusChannel`].
#[derive(Debug)]
pub struct HttpBackend {
    http: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let http = Client::builder()
            .build()
            .map_err(|error| BackendError::Network(error.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn build_headers(&self, event_stream: bool) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(if event_stream {
                "text/event-stream"
            } else {
                "application/json"
            }),
        );

        if let Some(session_id) = self.config.session_id.as_deref() {
            headers.insert(
                HeaderName::from_static(HEADER_SESSION_ID),
                header_value(HEADER_SESSION_ID, session_id)?,
            );
        }
        if let Some(user_agent) = self.config.user_agent.as_deref() {
            headers.insert(USER_AGENT, header_value("user-agent", user_agent)?);
        }
        for (key, value) in &self.config.extra_headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| BackendError::InvalidBaseUrl(format!("invalid header key: {key}")))?,
                header_value(key, value)?,
            );
        }

        Ok(headers)
    }

    /// Builds the chat POST without sending it. Exposed for request-shape tests.
    pub fn build_chat_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, BackendError> {
        let headers = self.build_headers(false)?;
        Ok(self
            .http
            .post(chat_message_url(&self.config.base_url))
            .headers(headers)
            .json(request))
    }

    async fn send_with_retry(
        &self,
        request: &ChatRequest,
        cancel: &CancelSignal,
    ) -> Result<Response, BackendError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if is_cancelled(cancel) {
                return Err(BackendError::Cancelled);
            }

            let response = self.build_chat_request(request)?.send();
            let response = await_or_cancel(response, cancel)
                .await?
                .map_err(request_error);

            match response {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancel)
                        .await?
                        .unwrap_or_else(|_| {
                            status
                                .canonical_reason()
                                .unwrap_or("request failed")
                                .to_string()
                        });
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < MAX_RETRIES && is_retryable_http_error(status.as_u16(), &body) {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancel)
                            .await?;
                        continue;
                    }

                    return Err(BackendError::Status(status.as_u16(), message));
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < MAX_RETRIES {
                        await_or_cancel(tokio::time::sleep(retry_delay_ms(attempt)), cancel)
                            .await?;
                        continue;
                    }
                }
            }
        }

        Err(BackendError::RetryExhausted {
            status: last_status.map(|status| status.as_u16()),
            last_error,
        })
    }

    async fn consume_stream(
        &self,
        response: Response,
        cancel: &CancelSignal,
        on_event: &mut (dyn FnMut(PushEvent) + Send),
    ) -> Result<(), BackendError> {
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();

        loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancel).await? else {
                break;
            };
            if is_cancelled(cancel) {
                return Err(BackendError::Cancelled);
            }
            let chunk = chunk.map_err(|error| BackendError::StreamFailed(error.to_string()))?;
            for event in parser.feed(&chunk) {
                on_event(event);
            }
        }

        if is_cancelled(cancel) {
            return Err(BackendError::Cancelled);
        }

        Ok(())
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_chat(
        &self,
        request: ChatRequest,
        cancel: CancelSignal,
    ) -> Result<ChatResponse, BackendError> {
        let exchange = async {
            let response = self.send_with_retry(&request, &cancel).await?;
            let body = await_or_cancel(response.text(), &cancel)
                .await?
                .map_err(request_error)?;
            serde_json::from_str::<ChatResponse>(&body)
                .map_err(|error| BackendError::Malformed(error.to_string()))
        };

        match tokio::time::timeout(self.config.chat_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }
}

#[async_trait]
impl StatusChannel for HttpBackend {
    async fn poll_status(&self) -> Result<StatusSnapshot, BackendError> {
        let pull = async {
            let response = self
                .http
                .get(agents_status_url(&self.config.base_url))
                .headers(self.build_headers(false)?)
                .send()
                .await
                .map_err(request_error)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status(
                    status.as_u16(),
                    parse_error_message(status, &body),
                ));
            }

            response
                .json::<StatusSnapshot>()
                .await
                .map_err(|error| BackendError::Malformed(error.to_string()))
        };

        match tokio::time::timeout(self.config.status_timeout, pull).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    async fn heartbeat(&self) -> Result<(), BackendError> {
        let probe = async {
            let response = self
                .http
                .head(agents_status_url(&self.config.base_url))
                .send()
                .await
                .map_err(request_error)?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(BackendError::Status(
                    response.status().as_u16(),
                    "heartbeat probe failed".to_string(),
                ))
            }
        };

        match tokio::time::timeout(self.config.status_timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        }
    }

    async fn subscribe(
        &self,
        cancel: CancelSignal,
        on_connected: &mut (dyn FnMut() + Send),
        on_event: &mut (dyn FnMut(PushEvent) + Send),
    ) -> Result<(), BackendError> {
        // Connect attempt is bounded; consuming the stream is not.
        let connect = async {
            let response = self
                .http
                .get(agents_stream_url(&self.config.base_url))
                .headers(self.build_headers(true)?)
                .send()
                .await
                .map_err(|error| BackendError::StreamFailed(error.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(BackendError::StreamFailed(format!(
                    "subscription rejected with status {status}"
                )));
            }
            Ok(response)
        };

        let response = match tokio::time::timeout(self.config.status_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => return Err(BackendError::Timeout),
        };

        debug!("push subscription established");
        on_connected();
        self.consume_stream(response, &cancel, on_event).await
    }
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue, BackendError> {
    HeaderValue::from_str(value)
        .map_err(|_| BackendError::InvalidBaseUrl(format!("invalid header value for {key}")))
}

fn request_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(error.to_string())
    }
}

/// Extracts a short diagnostic message from an error body.
///
/// The result is for logs only; it is never shown to the user verbatim.
pub(crate) fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(|message| message.as_str())
        {
            return message.to_string();
        }
        if let Some(message) = value.get("message").and_then(|message| message.as_str()) {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }

    let mut preview = trimmed.to_string();
    if preview.len() > ERROR_BODY_PREVIEW_LEN {
        let cut = preview
            .char_indices()
            .map(|(index, _)| index)
            .take_while(|index| *index <= ERROR_BODY_PREVIEW_LEN)
            .last()
            .unwrap_or(0);
        preview.truncate(cut);
    }
    preview
}

fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

async fn await_or_cancel<F>(future: F, cancel: &CancelSignal) -> Result<F::Output, BackendError>
where
    F: Future,
{
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancel) {
            return Err(BackendError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancel) {
                return Err(BackendError::Cancelled);
            }
            return Ok(output);
        }
    }
}
