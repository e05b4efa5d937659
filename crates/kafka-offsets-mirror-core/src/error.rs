//! Error types for the Kafka offsets mirror core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the offsets mirror library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka protocol error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Offsets record could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Record submitted after the dispatcher was closed
    #[error("Dispatcher is closed")]
    DispatcherClosed,

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Kafka-specific errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KafkaError {
    /// Connection failed
    #[error("Failed to connect to broker {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker error response
    #[error("Broker returned error code {code}: {message}")]
    BrokerError { code: i16, message: String },

    /// No available brokers
    #[error("No available brokers")]
    NoBrokersAvailable,

    /// Topic does not exist
    #[error("Topic does not exist: {0}")]
    TopicNotExists(String),

    /// Partition not available
    #[error("Partition {partition} not available for topic {topic}")]
    PartitionNotAvailable { topic: String, partition: i32 },

    /// Group coordinator lookup failed
    #[error("Coordinator not available for group {group}: error code {code}")]
    CoordinatorNotAvailable { group: String, code: i16 },

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Certificate loading error
    #[error("Failed to load certificate from {path}: {message}")]
    CertificateLoad { path: String, message: String },

    /// Private key loading error
    #[error("Failed to load private key from {path}: {message}")]
    PrivateKeyLoad { path: String, message: String },
}

impl KafkaError {
    /// Broker error code carried by this error, if any.
    pub fn code(&self) -> Option<i16> {
        match self {
            KafkaError::BrokerError { code, .. } => Some(*code),
            KafkaError::CoordinatorNotAvailable { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised while decoding internal offsets topic records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Record has no key, so its schema cannot be determined
    #[error("record has no key")]
    MissingKey,

    /// Key schema version is not known
    #[error("unsupported key version {0}")]
    UnsupportedKeyVersion(i16),

    /// Value schema version is not known
    #[error("unsupported value version {0}")]
    UnsupportedValueVersion(i16),

    /// Buffer ended before the field was complete
    #[error("truncated record while reading {0}")]
    Truncated(&'static str),

    /// String field is not valid UTF-8
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::Config(format!("invalid pattern: {}", err))
    }
}
