use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::core::{ClientOptions, EventBatch, FlagEventStream, FlagService, FlagStore, StreamMessage};
use crate::error::{ErrorCode, Result, SyncError};
use crate::types::{FlagRecord, UserContext};

const USER_AGENT: &str = concat!("FlagKit-Sync-Rust/", env!("CARGO_PKG_VERSION"));
const PAYLOAD_ID_HEADER: &str = "X-FlagKit-Payload-Id";

#[derive(Debug, Deserialize)]
struct PatchPayload {
    key: String,
    #[serde(flatten)]
    record: FlagRecord,
}

#[derive(Debug, Deserialize)]
struct DeletePayload {
    key: String,
    #[serde(default)]
    version: Option<u64>,
}

/// Decodes one server-sent event. Unknown event types yield `None`.
pub fn parse_stream_event(event_type: &str, data: &str) -> Result<Option<StreamMessage>> {
    let invalid = |e: serde_json::Error| {
        SyncError::with_source(
            ErrorCode::StreamInvalidEvent,
            format!("Invalid '{}' event: {}", event_type, e),
            e,
        )
    };

    match event_type {
        "put" => {
            let flags: FlagStore = serde_json::from_str(data).map_err(invalid)?;
            Ok(Some(StreamMessage::Put(flags)))
        }
        "patch" => {
            let payload: PatchPayload = serde_json::from_str(data).map_err(invalid)?;
            Ok(Some(StreamMessage::Patch {
                key: payload.key,
                record: payload.record,
            }))
        }
        "delete" => {
            let payload: DeletePayload = serde_json::from_str(data).map_err(invalid)?;
            Ok(Some(StreamMessage::Delete {
                key: payload.key,
                version: payload.version,
            }))
        }
        "ping" => Ok(Some(StreamMessage::Ping)),
        other => {
            tracing::debug!("Ignoring unknown stream event '{}'", other);
            Ok(None)
        }
    }
}

/// Path segment carrying the user: base64url of its JSON form.
pub fn encode_user(user: &UserContext) -> Result<String> {
    let json = serde_json::to_vec(user).map_err(|e| {
        SyncError::with_source(ErrorCode::PayloadInvalid, "Failed to serialize user", e)
    })?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// `FlagService` over HTTP: polling and ping fetches, the SSE push stream, event publishing.
pub struct HttpFlagService {
    client: Client,
    api_key: String,
    base_url: String,
    stream_url: String,
    events_url: String,
    request_timeout: Duration,
}

impl HttpFlagService {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        // No overall timeout on the client: the stream response stays open indefinitely.
        let client = Client::builder()
            .connect_timeout(options.connection_timeout)
            .build()
            .map_err(|e| SyncError::with_source(ErrorCode::NetworkError, "Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            api_key: options.api_key.clone(),
            base_url: options.base_url.trim_end_matches('/').to_string(),
            stream_url: options.stream_url.trim_end_matches('/').to_string(),
            events_url: options.events_url.trim_end_matches('/').to_string(),
            request_timeout: options.connection_timeout,
        })
    }

    pub fn flags_url(&self, user: &UserContext) -> Result<String> {
        Ok(format!("{}/sdk/mobile/flags/{}", self.base_url, encode_user(user)?))
    }

    pub fn stream_url(&self, user: &UserContext) -> Result<String> {
        Ok(format!("{}/sdk/mobile/stream/{}", self.stream_url, encode_user(user)?))
    }

    pub fn events_url(&self) -> String {
        format!("{}/sdk/mobile/events/bulk", self.events_url)
    }

    fn status_to_error(&self, status: StatusCode, body: &str) -> SyncError {
        let (code, category) = match status {
            StatusCode::BAD_REQUEST => (ErrorCode::HttpBadRequest, "Client Error"),
            StatusCode::UNAUTHORIZED => (ErrorCode::HttpUnauthorized, "Authentication Error"),
            StatusCode::FORBIDDEN => (ErrorCode::HttpForbidden, "Authorization Error"),
            StatusCode::NOT_FOUND => (ErrorCode::HttpNotFound, "Not Found"),
            StatusCode::TOO_MANY_REQUESTS => (ErrorCode::HttpRateLimited, "Rate Limited"),
            s if s.is_server_error() => (ErrorCode::HttpServerError, "Server Error"),
            s if s.is_client_error() => (ErrorCode::HttpBadRequest, "Client Error"),
            _ => (ErrorCode::HttpInvalidResponse, "Unexpected Status"),
        };

        SyncError::network_error(code, format!("{}: {} - {}", category, status.as_u16(), body))
    }

    fn convert_error(&self, error: reqwest::Error) -> SyncError {
        if error.is_timeout() {
            SyncError::with_source(ErrorCode::NetworkTimeout, "Request timed out", error)
        } else if error.is_connect() {
            SyncError::with_source(ErrorCode::NetworkError, "Connection failed", error)
        } else {
            SyncError::with_source(ErrorCode::NetworkError, error.to_string(), error)
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(self.status_to_error(status, &body))
        }
    }
}

#[async_trait]
impl FlagService for HttpFlagService {
    async fn fetch_flags(&self, user: &UserContext) -> Result<FlagStore> {
        let url = self.flags_url(user)?;
        tracing::debug!("Fetching flags for {}", user.key);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .header("X-API-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| self.convert_error(e))?;
        let response = self.check_status(response).await?;

        let body = response.text().await.map_err(|e| {
            SyncError::with_source(ErrorCode::HttpInvalidResponse, "Failed to read response", e)
        })?;

        serde_json::from_str(&body).map_err(|e| {
            SyncError::with_source(
                ErrorCode::HttpInvalidResponse,
                format!("Failed to parse flags: {}", e),
                e,
            )
        })
    }

    async fn open_event_stream(&self, user: &UserContext) -> Result<FlagEventStream> {
        let url = self.stream_url(user)?;

        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| self.convert_error(e))?;
        let response = self.check_status(response).await?;

        let messages = response.bytes_stream().eventsource().filter_map(|item| async move {
            match item {
                Ok(event) => parse_stream_event(&event.event, &event.data).transpose(),
                Err(e) => Some(Err(SyncError::new(
                    ErrorCode::StreamClosed,
                    format!("Stream read failed: {}", e),
                ))),
            }
        });

        Ok(Box::pin(messages))
    }

    async fn publish_events(&self, batch: &EventBatch) -> Result<()> {
        let body = serde_json::to_vec(batch).map_err(|e| {
            SyncError::with_source(ErrorCode::EventSerializationFailed, "Failed to serialize events", e)
        })?;

        let response = self
            .client
            .post(self.events_url())
            .timeout(self.request_timeout)
            .header("X-API-Key", &self.api_key)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .header(PAYLOAD_ID_HEADER, batch.payload_id.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| self.convert_error(e))?;
        self.check_status(response).await?;

        tracing::debug!("Published {} events", batch.len());
        Ok(())
    }
}
