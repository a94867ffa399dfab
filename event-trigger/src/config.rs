use std::str::FromStr;

use envconfig::Envconfig;

use crate::error::TriggerError;

/// Minimum broker protocol version required to carry message headers
/// (needed for the no-ack marker and explicit-ack attributes).
const MIN_KAFKA_VERSION: (u32, u32, u32) = (0, 11, 0);

#[derive(Envconfig, Clone, Debug)]
pub struct TlsConfig {
    #[envconfig(from = "TLS_ENABLE", default = "false")]
    pub enable: bool,

    #[envconfig(from = "TLS_MINIMUM_VERSION", default = "1.2")]
    pub minimum_version: String,

    #[envconfig(from = "TLS_INSECURE_SKIP_VERIFY", default = "false")]
    pub insecure_skip_verify: bool,

    #[envconfig(from = "TLS_CA_CERT", default = "")]
    pub ca_cert: String,

    #[envconfig(from = "TLS_ACCESS_KEY", default = "")]
    pub access_key: String,

    #[envconfig(from = "TLS_ACCESS_CERTIFICATE", default = "")]
    pub access_certificate: String,
}

impl TlsConfig {
    fn validate(&self) -> Result<(), TriggerError> {
        if !self.enable {
            return Ok(());
        }
        match self.minimum_version.as_str() {
            "1.0" | "1.1" | "1.2" | "1.3" => Ok(()),
            other => Err(TriggerError::Configuration(format!(
                "unsupported tls.minimumVersion: {other}"
            ))),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct OAuthConfig {
    #[envconfig(from = "SASL_OAUTH_CLIENT_ID", default = "")]
    pub client_id: String,

    #[envconfig(from = "SASL_OAUTH_CLIENT_SECRET", default = "")]
    pub client_secret: String,

    #[envconfig(from = "SASL_OAUTH_TOKEN_URL", default = "")]
    pub token_url: String,

    #[envconfig(from = "SASL_OAUTH_SCOPES", default = "")]
    pub scopes: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct SaslConfig {
    #[envconfig(from = "SASL_ENABLE", default = "false")]
    pub enable: bool,

    #[envconfig(from = "SASL_USER", default = "")]
    pub user: String,

    #[envconfig(from = "SASL_PASSWORD", default = "")]
    pub password: String,

    #[envconfig(from = "SASL_MECHANISM", default = "PLAIN")]
    pub mechanism: String,

    #[envconfig(from = "SASL_HANDSHAKE", default = "true")]
    pub handshake: bool,

    #[envconfig(nested = true)]
    pub oauth: OAuthConfig,
}

/// Partition-to-worker allocation strategy (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerAllocationMode {
    Pool,
    Static,
}

impl FromStr for WorkerAllocationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pool" => Ok(WorkerAllocationMode::Pool),
            "static" => Ok(WorkerAllocationMode::Static),
            other => Err(format!("unknown worker allocation mode: {other}")),
        }
    }
}

/// Offset acknowledgement policy (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    Disable,
    Enable,
    ExplicitOnly,
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], "").as_str() {
            "disable" => Ok(AckMode::Disable),
            "enable" => Ok(AckMode::Enable),
            "explicitonly" => Ok(AckMode::ExplicitOnly),
            other => Err(format!("unknown explicit ack mode: {other}")),
        }
    }
}

impl AckMode {
    /// Only `ExplicitOnly` drives commits solely from the control bus; that
    /// is the one mode that needs the explicit-ack subscription (§4.4/§4.5).
    pub fn needs_control_bus(&self) -> bool {
        matches!(self, AckMode::ExplicitOnly)
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct TriggerConfig {
    #[envconfig(from = "KAFKA_BROKERS", default = "localhost:9092")]
    pub brokers: String,

    #[envconfig(from = "KAFKA_TOPICS", default = "events")]
    pub topics: String,

    #[envconfig(from = "KAFKA_CONSUMER_GROUP", default = "event-trigger")]
    pub consumer_group: String,

    #[envconfig(from = "SESSION_TIMEOUT_MS", default = "10000")]
    pub session_timeout_ms: u32,

    #[envconfig(from = "HEARTBEAT_INTERVAL_MS", default = "3000")]
    pub heartbeat_interval_ms: u32,

    #[envconfig(from = "REBALANCE_TIMEOUT_MS", default = "60000")]
    pub rebalance_timeout_ms: u32,

    #[envconfig(from = "REBALANCE_RETRY_MAX", default = "4")]
    pub rebalance_retry_max: u32,

    #[envconfig(from = "RETRY_BACKOFF_MS", default = "100")]
    pub retry_backoff_ms: u32,

    #[envconfig(from = "MAX_WAIT_TIME_MS", default = "250")]
    pub max_wait_time_ms: u32,

    #[envconfig(from = "FETCH_MIN_BYTES", default = "1")]
    pub fetch_min: u32,

    #[envconfig(from = "FETCH_DEFAULT_BYTES", default = "1048576")]
    pub fetch_default: u32,

    #[envconfig(from = "FETCH_MAX_BYTES", default = "52428800")]
    pub fetch_max: u32,

    #[envconfig(from = "CHANNEL_BUFFER_SIZE", default = "256")]
    pub channel_buffer_size: usize,

    #[envconfig(from = "INITIAL_OFFSET", default = "earliest")]
    pub initial_offset: String,

    #[envconfig(from = "WORKER_ALLOCATION_MODE", default = "pool")]
    pub worker_allocation_mode: WorkerAllocationMode,

    #[envconfig(from = "ACK_WINDOW_SIZE", default = "0")]
    pub ack_window_size: u64,

    #[envconfig(from = "EXPLICIT_ACK_MODE", default = "disable")]
    pub explicit_ack_mode: AckMode,

    #[envconfig(from = "MAX_WAIT_HANDLER_DURING_REBALANCE_MS", default = "5000")]
    pub max_wait_handler_during_rebalance_ms: u64,

    #[envconfig(from = "KAFKA_VERSION", default = "")]
    pub version: String,

    #[envconfig(from = "WORKER_POOL_SIZE", default = "8")]
    pub worker_pool_size: usize,

    #[envconfig(nested = true)]
    pub tls: TlsConfig,

    #[envconfig(nested = true)]
    pub sasl: SaslConfig,

    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "8090")]
    pub bind_port: u16,
}

impl TriggerConfig {
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Eagerly validates the configuration at construction time; an invalid
    /// trigger never starts (§7, Configuration errors).
    pub fn validate(&self) -> Result<(), TriggerError> {
        if self.topic_list().is_empty() {
            return Err(TriggerError::Configuration(
                "at least one topic is required".to_string(),
            ));
        }

        self.tls.validate()?;

        if !self.version.is_empty() {
            let parsed = parse_kafka_version(&self.version).ok_or_else(|| {
                TriggerError::Configuration(format!(
                    "failed to parse kafka version: {}",
                    self.version
                ))
            })?;
            if parsed < MIN_KAFKA_VERSION {
                return Err(TriggerError::Configuration(format!(
                    "minimum kafka version {}.{}.{} is required, got {}",
                    MIN_KAFKA_VERSION.0, MIN_KAFKA_VERSION.1, MIN_KAFKA_VERSION.2, self.version
                )));
            }
        }

        match self.initial_offset.as_str() {
            "earliest" | "latest" => {}
            other => {
                return Err(TriggerError::Configuration(format!(
                    "unknown initialOffset: {other}"
                )))
            }
        }

        Ok(())
    }
}

fn parse_kafka_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor, patch))
}

#[derive(Envconfig, Clone, Debug)]
pub struct CronConfig {
    #[envconfig(from = "CRON_SCHEDULE", default = "1m")]
    pub schedule: String,

    #[envconfig(from = "CRON_FIRE_MISSED_TICKS", default = "true")]
    pub fire_missed_ticks: bool,
}
