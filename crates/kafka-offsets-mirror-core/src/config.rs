//! Configuration structures for offset mirroring and restore.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default internal topic holding consumer group commits
pub const DEFAULT_SOURCE_TOPIC: &str = "__consumer_offsets";

/// Default topic receiving mirrored commits
pub const DEFAULT_TARGET_TOPIC: &str = "replica_consumer_offsets";

/// Default consumer group used to track the mirrorer's own position
pub const DEFAULT_MIRROR_GROUP: &str = "consumer-offsets-mirrorer";

/// Kafka cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Client identifier sent with every request
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Session timeout applied to group connections (milliseconds)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: i32,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// TCP connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

fn default_client_id() -> String {
    "kafka-offsets-mirror".to_string()
}

fn default_session_timeout_ms() -> i32 {
    30_000
}

/// TCP connection settings for broker sockets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Enable TCP keepalive (default: true)
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,

    /// Idle time before keepalive probes start, in seconds (default: 60)
    #[serde(default = "default_keepalive_time_secs")]
    pub keepalive_time_secs: u64,

    /// Interval between keepalive probes, in seconds (default: 20)
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Disable Nagle's algorithm (default: true)
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            tcp_keepalive: true,
            keepalive_time_secs: default_keepalive_time_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            tcp_nodelay: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keepalive_time_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    20
}

/// Security configuration for Kafka connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Security protocol
    #[serde(default)]
    pub security_protocol: SecurityProtocol,

    /// SASL mechanism (if using SASL)
    #[serde(default)]
    pub sasl_mechanism: Option<SaslMechanism>,

    /// SASL username
    #[serde(default)]
    pub sasl_username: Option<String>,

    /// SASL password
    #[serde(default)]
    pub sasl_password: Option<String>,

    /// Path to CA certificate file (for TLS)
    #[serde(default)]
    pub ssl_ca_location: Option<PathBuf>,

    /// Path to client certificate file (for mTLS)
    #[serde(default)]
    pub ssl_certificate_location: Option<PathBuf>,

    /// Path to client key file (for mTLS)
    #[serde(default)]
    pub ssl_key_location: Option<PathBuf>,
}

/// Security protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    /// Whether the protocol wraps the socket in TLS
    pub fn uses_tls(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    /// Whether the protocol requires a SASL exchange after connecting
    pub fn uses_sasl(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

/// SASL mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SaslMechanism {
    Plain,
}

impl KafkaConfig {
    /// Load a cluster configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: KafkaConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(Error::Config(
                "bootstrap_servers must not be empty".to_string(),
            ));
        }

        if self.session_timeout_ms <= 0 {
            return Err(Error::Config(format!(
                "session_timeout_ms must be > 0, got {}",
                self.session_timeout_ms
            )));
        }

        if self.security.security_protocol.uses_sasl() && self.security.sasl_mechanism.is_none()
        {
            return Err(Error::Config(
                "sasl_mechanism is required for SASL security protocols".to_string(),
            ));
        }

        Ok(())
    }
}

/// Options for the tailing pipeline shared by mirror and restore modes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailOptions {
    /// Topic to tail
    #[serde(default = "default_source_topic")]
    pub source_topic: String,

    /// Consumer group tracking the tailing position
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Number of dispatcher lanes (default: 10)
    #[serde(default = "default_num_lanes")]
    pub num_lanes: usize,

    /// Bounded queue capacity per lane (default: 1024)
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,

    /// Maximum wait per poll in milliseconds (default: 5000)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Start from the earliest retained record instead of the committed position
    #[serde(default)]
    pub from_beginning: bool,

    /// Interval between commits of the tailing position (default: 5000)
    #[serde(default = "default_auto_commit_interval_ms")]
    pub auto_commit_interval_ms: u64,

    /// Maximum bytes fetched per partition per poll (default: 1MB)
    #[serde(default = "default_max_partition_fetch_bytes")]
    pub max_partition_fetch_bytes: i32,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            source_topic: default_source_topic(),
            group_id: default_group_id(),
            num_lanes: default_num_lanes(),
            lane_capacity: default_lane_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            from_beginning: false,
            auto_commit_interval_ms: default_auto_commit_interval_ms(),
            max_partition_fetch_bytes: default_max_partition_fetch_bytes(),
        }
    }
}

fn default_source_topic() -> String {
    DEFAULT_SOURCE_TOPIC.to_string()
}

fn default_group_id() -> String {
    DEFAULT_MIRROR_GROUP.to_string()
}

fn default_num_lanes() -> usize {
    10
}

fn default_lane_capacity() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    5_000
}

fn default_auto_commit_interval_ms() -> u64 {
    5_000
}

fn default_max_partition_fetch_bytes() -> i32 {
    1024 * 1024
}

impl TailOptions {
    /// Validate tailing options
    pub fn validate(&self) -> Result<()> {
        if self.source_topic.is_empty() {
            return Err(Error::Config("source_topic must not be empty".to_string()));
        }
        if self.group_id.is_empty() {
            return Err(Error::Config("group_id must not be empty".to_string()));
        }
        if self.num_lanes == 0 {
            return Err(Error::Config("num_lanes must be > 0".to_string()));
        }
        if self.lane_capacity == 0 {
            return Err(Error::Config("lane_capacity must be > 0".to_string()));
        }
        if self.poll_timeout_ms == 0 {
            return Err(Error::Config("poll_timeout_ms must be > 0".to_string()));
        }
        if self.max_partition_fetch_bytes <= 0 {
            return Err(Error::Config(
                "max_partition_fetch_bytes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Mirror-mode options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorOptions {
    /// Tailing options for the source offsets topic
    #[serde(default)]
    pub tail: TailOptions,

    /// Topic receiving mirrored commits on the destination cluster
    #[serde(default = "default_target_topic")]
    pub target_topic: String,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            tail: TailOptions::default(),
            target_topic: default_target_topic(),
        }
    }
}

fn default_target_topic() -> String {
    DEFAULT_TARGET_TOPIC.to_string()
}

impl MirrorOptions {
    /// Validate mirror options
    pub fn validate(&self) -> Result<()> {
        self.tail.validate()?;
        if self.target_topic.is_empty() {
            return Err(Error::Config("target_topic must not be empty".to_string()));
        }
        if self.target_topic == self.tail.source_topic {
            return Err(Error::Config(format!(
                "target_topic must differ from source_topic ({})",
                self.target_topic
            )));
        }
        Ok(())
    }
}

/// Filter rule configuration: regular expressions matched against the full
/// group or topic name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Group name patterns to ignore
    #[serde(default)]
    pub groups: Vec<String>,

    /// Topic name patterns to ignore
    #[serde(default)]
    pub topics: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            groups: vec![
                "kafka-consumers-offsets.*".to_string(),
                "kafka-consumer-offsets.*".to_string(),
            ],
            topics: vec!["console-consumer.*".to_string(), "_.*".to_string()],
        }
    }
}

impl FilterConfig {
    /// Load filter rules from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}
