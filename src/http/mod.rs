mod client;
pub mod retry;

pub use client::{encode_user, parse_stream_event, HttpFlagService};
pub use retry::{
    is_retryable, retry_limit_error, with_retry_detailed, RetryConfig, RetryConfigBuilder,
    RetryResult,
};
