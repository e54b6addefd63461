use serde::{Deserialize, Serialize};

/// Main configuration structure for a lattice container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Container clock configuration
    #[serde(default)]
    pub time: TimeConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// RPC configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Actors hosted by this container
    #[serde(default)]
    pub actors: Vec<ActorConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time: TimeConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            rpc: RpcConfig::default(),
            actors: vec![],
        }
    }
}

/// Container clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeConfig {
    /// Epoch of cycle 0 in milliseconds since the Unix epoch; 0 means "now"
    #[serde(default)]
    pub beginning_of_time: i64,

    /// Length of one cycle in milliseconds
    #[serde(default = "default_cycle_millis")]
    pub cycle_millis: u64,

    /// External ticking instead of wall-clock ticking
    #[serde(default)]
    pub manual: bool,
}

const fn default_cycle_millis() -> u64 {
    1000
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            beginning_of_time: 0,
            cycle_millis: default_cycle_millis(),
            manual: false,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".lattice/lattice.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RpcConfig {
    /// Seconds a request may remain unanswered before a synthetic
    /// transport-timeout failure is delivered
    #[serde(default = "default_rpc_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Attempts for a transport produce before reporting transport failure
    #[serde(default = "default_produce_attempts")]
    pub produce_attempts: u32,
}

const fn default_rpc_timeout_seconds() -> u64 {
    120
}

const fn default_produce_attempts() -> u32 {
    3
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_rpc_timeout_seconds(),
            produce_attempts: default_produce_attempts(),
        }
    }
}

/// Role an actor plays in the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Orchestrator,
    Broker,
    Authority,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Broker => "broker",
            Self::Authority => "authority",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "orchestrator" => Some(Self::Orchestrator),
            "broker" => Some(Self::Broker),
            "authority" => Some(Self::Authority),
            _ => None,
        }
    }
}

/// One actor hosted by the container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ActorConfig {
    /// Globally unique actor name; also names the actor's transport topic
    pub name: String,

    pub role: ActorRole,

    /// Registered policy token resolved through the policy registry
    #[serde(default = "default_policy")]
    pub policy: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_policy() -> String {
    "default".to_string()
}
