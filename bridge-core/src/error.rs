use thiserror::Error;

/// Top-level error for the bridge core.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("source-cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the transport abstractions (C1): HTTPS client, MQTT session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("topic validation failed: {0}")]
    TopicValidation(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors from calls to the source cloud (C4).
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("unexpected status {status} calling {path}")]
    UnexpectedStatus { status: u16, path: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("response body could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("pagination cursor missing while has_more=true")]
    MissingCursor,
}

/// Mis-configuration that keeps the bridge alive but refuses to start a
/// dependent subsystem (§7 "Auth mis-config").
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required key {0} is not set")]
    MissingKey(&'static str),

    #[error("connection string is missing required field {0}")]
    ConnectionStringField(&'static str),

    #[error("connection string contains placeholder value for {0}")]
    PlaceholderValue(&'static str),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Protocol-level rejections that are reported back to the caller as
/// structured JSON rather than escaping as an error (§7 "Protocol").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid coap verb")]
    InvalidCoapVerb,

    #[error("unparsable json")]
    UnparsableJson,

    #[error("missing required field {0}")]
    MissingField(&'static str),
}

impl ProtocolError {
    /// The `api_execute_status` string this error maps to on the wire.
    pub fn api_execute_status(&self) -> &'static str {
        match self {
            ProtocolError::InvalidCoapVerb => "invalid coap verb",
            ProtocolError::UnparsableJson => "unparsable json",
            ProtocolError::MissingField(_) => "missing field",
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
pub type TransportResult<T> = Result<T, TransportError>;
pub type CloudResult<T> = Result<T, CloudError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
