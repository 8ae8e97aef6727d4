use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure, carrying the provider's message.
    #[error("{0}")]
    Api(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// No endpoint is known for the requested provider.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Chat transport errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Broker connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Publishing a message failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Inbound payload could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Transport has been closed.
    #[error("Channel closed")]
    Closed,
}

/// Persisted storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem read/write error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Invite token decoding errors.
///
/// These never reach the user: the invite decoder collapses them into
/// "no invite".
#[derive(Debug, Error)]
pub enum InviteError {
    /// The URL carried no invite parameter.
    #[error("Missing invite parameter")]
    MissingParameter,

    /// The token is not valid base64.
    #[error("Invalid base64: {0}")]
    Base64(String),

    /// The decoded payload is not the expected JSON object.
    #[error("Invalid JSON: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_config_error_variant() {
        let err = ConfigError::MissingField("gate.passphrase".to_string());
        assert!(err.to_string().contains("Missing required field"));
    }

    #[test]
    fn llm_api_error_displays_message_verbatim() {
        let err = LlmError::Api("API Error 401".to_string());
        assert_eq!(err.to_string(), "API Error 401");
    }

    #[test]
    fn channel_errors_describe_the_failure() {
        let err = ChannelError::ConnectionFailed("connection refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: connection refused");
        assert_eq!(ChannelError::Closed.to_string(), "Channel closed");
    }

    #[test]
    fn storage_error_wraps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StorageError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }

    #[test]
    fn invite_error_carries_detail() {
        let err = InviteError::Base64("invalid byte".to_string());
        assert!(err.to_string().contains("invalid byte"));
    }
}
