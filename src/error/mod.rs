use thiserror::Error;

/// Broad failure category, used to decide how a failure is recovered and where it is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network or HTTP-level failure talking to the flag service.
    Transport,
    /// The service answered but the payload could not be understood.
    Protocol,
    /// A legacy cache slot could not be decoded or converted.
    CacheMigration,
    /// An event batch could not be delivered.
    Publish,
    Configuration,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Network errors
    NetworkError,
    NetworkTimeout,

    // HTTP errors
    HttpBadRequest,
    HttpUnauthorized,
    HttpForbidden,
    HttpNotFound,
    HttpRateLimited,
    HttpServerError,
    HttpInvalidResponse,

    // Streaming errors
    StreamClosed,
    StreamReadTimeout,
    StreamInvalidEvent,

    // Payload errors
    PayloadInvalid,

    // Cache errors
    CacheReadError,
    CacheWriteError,
    CacheInvalidData,
    CacheMigrationFailed,

    // Event errors
    EventSendFailed,
    EventSerializationFailed,

    // Configuration errors
    ConfigInvalidApiKey,
    ConfigInvalidUrl,
    ConfigInvalidInterval,
    ConfigInvalidBackoff,
    ConfigInvalidCapacity,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::HttpBadRequest => "HTTP_BAD_REQUEST",
            ErrorCode::HttpUnauthorized => "HTTP_UNAUTHORIZED",
            ErrorCode::HttpForbidden => "HTTP_FORBIDDEN",
            ErrorCode::HttpNotFound => "HTTP_NOT_FOUND",
            ErrorCode::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorCode::HttpServerError => "HTTP_SERVER_ERROR",
            ErrorCode::HttpInvalidResponse => "HTTP_INVALID_RESPONSE",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::StreamReadTimeout => "STREAM_READ_TIMEOUT",
            ErrorCode::StreamInvalidEvent => "STREAM_INVALID_EVENT",
            ErrorCode::PayloadInvalid => "PAYLOAD_INVALID",
            ErrorCode::CacheReadError => "CACHE_READ_ERROR",
            ErrorCode::CacheWriteError => "CACHE_WRITE_ERROR",
            ErrorCode::CacheInvalidData => "CACHE_INVALID_DATA",
            ErrorCode::CacheMigrationFailed => "CACHE_MIGRATION_FAILED",
            ErrorCode::EventSendFailed => "EVENT_SEND_FAILED",
            ErrorCode::EventSerializationFailed => "EVENT_SERIALIZATION_FAILED",
            ErrorCode::ConfigInvalidApiKey => "CONFIG_INVALID_API_KEY",
            ErrorCode::ConfigInvalidUrl => "CONFIG_INVALID_URL",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::ConfigInvalidBackoff => "CONFIG_INVALID_BACKOFF",
            ErrorCode::ConfigInvalidCapacity => "CONFIG_INVALID_CAPACITY",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::HttpBadRequest
            | ErrorCode::HttpUnauthorized
            | ErrorCode::HttpForbidden
            | ErrorCode::HttpNotFound
            | ErrorCode::HttpRateLimited
            | ErrorCode::HttpServerError
            | ErrorCode::StreamClosed
            | ErrorCode::StreamReadTimeout => ErrorKind::Transport,
            ErrorCode::HttpInvalidResponse
            | ErrorCode::StreamInvalidEvent
            | ErrorCode::PayloadInvalid => ErrorKind::Protocol,
            ErrorCode::CacheMigrationFailed => ErrorKind::CacheMigration,
            ErrorCode::CacheReadError | ErrorCode::CacheWriteError | ErrorCode::CacheInvalidData => {
                ErrorKind::Storage
            }
            ErrorCode::EventSendFailed | ErrorCode::EventSerializationFailed => ErrorKind::Publish,
            ErrorCode::ConfigInvalidApiKey
            | ErrorCode::ConfigInvalidUrl
            | ErrorCode::ConfigInvalidInterval
            | ErrorCode::ConfigInvalidBackoff
            | ErrorCode::ConfigInvalidCapacity => ErrorKind::Configuration,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::HttpServerError
                | ErrorCode::HttpRateLimited
                | ErrorCode::StreamClosed
                | ErrorCode::StreamReadTimeout
                | ErrorCode::EventSendFailed
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct SyncError {
    pub code: ErrorCode,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SyncError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn network_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    pub fn is_config_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub fn is_transport_error(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl Clone for SyncError {
    /// The source chain is not cloneable; clones keep code and message only.
    fn clone(&self) -> Self {
        Self::new(self.code, self.message.clone())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
