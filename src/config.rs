//! Simulation configuration
//!
//! Loaded from TOML. Every table is optional; missing fields fall back to
//! the defaults below.
//!
//! ```toml
//! partitions = 4
//! lookahead = 10
//! stop_time = 100000
//! seed = 42
//!
//! [workload]
//! total_nodes = 64
//! init_work = 640
//!
//! [exchange]
//! transport = "mailbox"
//! retry_backoff_us = 20
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PARTITIONS: &str = "PARTISIM_PARTITIONS";
const ENV_SEED: &str = "PARTISIM_SEED";
const ENV_STOP_TIME: &str = "PARTISIM_STOP_TIME";

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config io error: {}", e),
            ConfigError::Parse(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Top-level configuration for a partitioned PHOLD run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of partitions, one OS thread each
    pub partitions: usize,
    /// Minimum delay of any cross-partition event (ticks, >= 1)
    pub lookahead: u64,
    /// Exclusive end of simulated time
    pub stop_time: u64,
    /// Root seed; node RNGs are derived from it
    pub seed: u64,
    pub workload: WorkloadConfig,
    pub exchange: ExchangeConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            partitions: 4,
            lookahead: 10,
            stop_time: 100_000,
            seed: 42,
            workload: WorkloadConfig::default(),
            exchange: ExchangeConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Small, fast configuration for tests
    pub fn test() -> Self {
        SimulationConfig {
            partitions: 2,
            lookahead: 5,
            stop_time: 500,
            seed: 7,
            workload: WorkloadConfig {
                total_nodes: 8,
                init_work: 16,
            },
            exchange: ExchangeConfig::test(),
        }
    }

    /// Larger run for throughput measurements
    pub fn benchmark() -> Self {
        SimulationConfig {
            partitions: 8,
            lookahead: 10,
            stop_time: 1_000_000,
            seed: 42,
            workload: WorkloadConfig {
                total_nodes: 256,
                init_work: 4096,
            },
            exchange: ExchangeConfig::default(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply `PARTISIM_*` environment overrides, then re-validate.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_PARTITIONS) {
            self.partitions = parse_env(ENV_PARTITIONS, &v)?;
        }
        if let Some(v) = lookup(ENV_SEED) {
            self.seed = parse_env(ENV_SEED, &v)?;
        }
        if let Some(v) = lookup(ENV_STOP_TIME) {
            self.stop_time = parse_env(ENV_STOP_TIME, &v)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::Invalid("partitions must be >= 1".into()));
        }
        if self.lookahead == 0 {
            return Err(ConfigError::Invalid("lookahead must be >= 1".into()));
        }
        if self.workload.total_nodes == 0 {
            return Err(ConfigError::Invalid("total_nodes must be >= 1".into()));
        }
        if self.workload.total_nodes < self.partitions {
            return Err(ConfigError::Invalid(format!(
                "total_nodes ({}) is smaller than partitions ({})",
                self.workload.total_nodes, self.partitions
            )));
        }
        if !(0.0..1.0).contains(&self.exchange.fault_rate) {
            return Err(ConfigError::Invalid(format!(
                "fault_rate {} outside [0, 1)",
                self.exchange.fault_rate
            )));
        }
        Ok(())
    }

    /// Nodes per partition block; the last block may be short.
    pub fn block_size(&self) -> usize {
        (self.workload.total_nodes + self.partitions - 1) / self.partitions
    }

    /// Owning partition of node `index`.
    pub fn partition_of(&self, index: usize) -> usize {
        index / self.block_size()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}={:?} is not a number", key, value)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub total_nodes: usize,
    /// Initial events, split evenly across all nodes
    pub init_work: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        WorkloadConfig {
            total_nodes: 64,
            init_work: 640,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Blocking crossbeam mesh
    Memory,
    /// Polling shared mailbox
    Mailbox,
    /// Mailbox with injected "not ready" faults
    Flaky,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub transport: TransportKind,
    /// `None` retries forever
    pub max_retries: Option<u64>,
    pub retry_backoff_us: u64,
    /// How often a blocking receive wakes to check for cancellation
    pub poll_interval_ms: u64,
    /// Probability of an injected fault per receive (flaky only)
    pub fault_rate: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            transport: TransportKind::Memory,
            max_retries: None,
            retry_backoff_us: 50,
            poll_interval_ms: 10,
            fault_rate: 0.1,
        }
    }
}

impl ExchangeConfig {
    pub fn test() -> Self {
        ExchangeConfig {
            transport: TransportKind::Memory,
            max_retries: None,
            retry_backoff_us: 0,
            poll_interval_ms: 1,
            fault_rate: 0.2,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_micros(self.retry_backoff_us)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
