use std::time::Duration;

use flagkit_sync::core::{
    DEFAULT_BACKOFF_BASE_DELAY, DEFAULT_BACKOFF_MAX_DELAY, DEFAULT_EVENT_FLUSH_INTERVAL, DEFAULT_EVENT_PUBLISH_ATTEMPTS,
    DEFAULT_MAX_CACHED_USERS, DEFAULT_MAX_EVENT_QUEUE_SIZE, DEFAULT_POLLING_INTERVAL_BACKGROUND,
    DEFAULT_POLLING_INTERVAL_FOREGROUND, DEFAULT_STREAM_READ_TIMEOUT,
};
use flagkit_sync::{ClientOptions, ErrorCode, StreamingMode};

mod defaults_tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let options = ClientOptions::new("mob-key");

        assert_eq!(options.api_key, "mob-key");
        assert_eq!(options.streaming_mode, StreamingMode::Streaming);
        assert_eq!(options.polling_interval_foreground, DEFAULT_POLLING_INTERVAL_FOREGROUND);
        assert_eq!(options.polling_interval_background, DEFAULT_POLLING_INTERVAL_BACKGROUND);
        assert_eq!(options.event_flush_interval, DEFAULT_EVENT_FLUSH_INTERVAL);
        assert_eq!(options.max_cached_users, DEFAULT_MAX_CACHED_USERS);
        assert_eq!(options.max_event_queue_size, DEFAULT_MAX_EVENT_QUEUE_SIZE);
        assert_eq!(options.event_publish_attempts, DEFAULT_EVENT_PUBLISH_ATTEMPTS);
        assert_eq!(options.backoff_base_delay, DEFAULT_BACKOFF_BASE_DELAY);
        assert_eq!(options.backoff_max_delay, DEFAULT_BACKOFF_MAX_DELAY);
        assert_eq!(options.stream_read_timeout, Some(DEFAULT_STREAM_READ_TIMEOUT));
        assert!(options.start_online);
        assert!(options.cache_directory.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let options = ClientOptions::builder("mob-key")
            .streaming_mode(StreamingMode::Polling)
            .polling_interval_foreground(Duration::from_secs(60))
            .max_cached_users(0)
            .stream_read_timeout(None)
            .all_attributes_private(true)
            .private_attribute_name("email")
            .all_urls("http://localhost:8200")
            .build();

        assert_eq!(options.streaming_mode, StreamingMode::Polling);
        assert_eq!(options.polling_interval_foreground, Duration::from_secs(60));
        assert_eq!(options.max_cached_users, 0);
        assert_eq!(options.stream_read_timeout, None);
        assert!(options.all_attributes_private);
        assert_eq!(options.private_attribute_names, vec!["email".to_string()]);
        assert_eq!(options.base_url, "http://localhost:8200");
        assert_eq!(options.stream_url, "http://localhost:8200");
        assert_eq!(options.events_url, "http://localhost:8200");
        assert!(options.validate().is_ok());
    }
}

mod validation_tests {
    use super::*;

    fn code_of(options: ClientOptions) -> ErrorCode {
        options.validate().unwrap_err().code
    }

    #[test]
    fn test_empty_api_key() {
        assert_eq!(code_of(ClientOptions::new("  ")), ErrorCode::ConfigInvalidApiKey);
    }

    #[test]
    fn test_non_http_url() {
        let options = ClientOptions::builder("mob-key").stream_url("ftp://stream").build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidUrl);
    }

    #[test]
    fn test_zero_intervals() {
        let options = ClientOptions::builder("mob-key")
            .polling_interval_background(Duration::ZERO)
            .build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidInterval);

        let options = ClientOptions::builder("mob-key")
            .stream_read_timeout(Some(Duration::ZERO))
            .build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidInterval);
    }

    #[test]
    fn test_backoff_bounds() {
        let options = ClientOptions::builder("mob-key")
            .backoff_base_delay(Duration::from_secs(10))
            .backoff_max_delay(Duration::from_secs(5))
            .build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidBackoff);
    }

    #[test]
    fn test_capacities() {
        let options = ClientOptions::builder("mob-key").max_event_queue_size(0).build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidCapacity);

        let options = ClientOptions::builder("mob-key").event_publish_attempts(0).build();
        assert_eq!(code_of(options), ErrorCode::ConfigInvalidCapacity);
    }

    #[test]
    fn test_validation_errors_are_config_errors() {
        let err = ClientOptions::new("").validate().unwrap_err();
        assert!(err.is_config_error());
        assert!(!err.is_recoverable());
    }
}
