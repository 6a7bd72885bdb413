use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default number of probe cycles per measurement round
pub const DEFAULT_CYCLES: u32 = 30;
/// Default maximum path length
pub const DEFAULT_MAX_HOPS: u8 = 30;
/// Upper bound on `max_hops` to keep per-round probe volume sane
pub const MAX_SAFE_HOPS: u8 = 64;
/// Pace of `mtr` between cycles when no `--interval` is given
pub const MTR_CYCLE_INTERVAL: Duration = Duration::from_secs(1);

/// Probe protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

impl ProbeProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
        }
    }
}

impl fmt::Display for ProbeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path-probe engine runs the measurement rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Wrap the system `mtr` binary
    #[default]
    Mtr,
    /// Built-in raw socket ICMP prober
    Native,
}

/// A probed destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    /// Address or hostname handed to the probe engine
    pub name: String,
    /// Label used in metric output (falls back to `name` when empty)
    #[serde(default)]
    pub alias: String,
}

impl Host {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }

    /// Identity key for scheduling and metrics
    pub fn metric_alias(&self) -> &str {
        if self.alias.trim().is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }
}

/// Exporter configuration, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Probe protocol shared by all hosts
    #[serde(default)]
    pub protocol: ProbeProtocol,
    /// Probe packets sent per hop in one measurement round
    #[serde(rename = "cycles", default = "default_cycles")]
    pub report_cycles: u32,
    /// Idle time between two rounds of the same host
    #[serde(with = "duration_serde", default)]
    pub interval: Duration,
    /// Reply wait per probe cycle
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Maximum TTL probed
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
    /// Path-probe engine
    #[serde(default)]
    pub engine: EngineKind,
    /// Binary used by the mtr engine
    #[serde(default = "default_mtr_path")]
    pub mtr_path: String,
    /// Destinations, in configuration order
    #[serde(default)]
    pub hosts: Vec<Host>,
}

fn default_cycles() -> u32 {
    DEFAULT_CYCLES
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_hops() -> u8 {
    DEFAULT_MAX_HOPS
}

fn default_mtr_path() -> String {
    "mtr".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProbeProtocol::default(),
            report_cycles: DEFAULT_CYCLES,
            interval: Duration::ZERO,
            timeout: default_timeout(),
            max_hops: DEFAULT_MAX_HOPS,
            engine: EngineKind::default(),
            mtr_path: default_mtr_path(),
            hosts: Vec::new(),
        }
    }
}

/// Configuration problems; all of them are fatal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no hosts configured")]
    NoHosts,
    #[error("host #{0} has an empty name")]
    EmptyHostName(usize),
    #[error("duplicate host alias: {0}")]
    DuplicateAlias(String),
    #[error("cycles must be at least 1")]
    InvalidCycles,
    #[error("max_hops must be between 1 and {MAX_SAFE_HOPS}, got {0}")]
    InvalidMaxHops(u8),
    #[error("timeout must be positive")]
    InvalidTimeout,
}

impl Config {
    /// Read, parse and validate a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that would make the scheduler misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::NoHosts);
        }

        let mut seen = HashSet::with_capacity(self.hosts.len());
        for (i, host) in self.hosts.iter().enumerate() {
            if host.name.trim().is_empty() {
                return Err(ConfigError::EmptyHostName(i + 1));
            }
            if !seen.insert(host.metric_alias()) {
                return Err(ConfigError::DuplicateAlias(host.metric_alias().to_string()));
            }
        }

        if self.report_cycles == 0 {
            return Err(ConfigError::InvalidCycles);
        }

        if self.max_hops == 0 || self.max_hops > MAX_SAFE_HOPS {
            return Err(ConfigError::InvalidMaxHops(self.max_hops));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(())
    }

    /// Upper bound on one engine call before the round is abandoned
    ///
    /// mtr never spends less than [`MTR_CYCLE_INTERVAL`] per cycle, whatever
    /// `timeout` says.
    pub fn round_timeout(&self) -> Duration {
        const SLACK: Duration = Duration::from_secs(10);
        let per_cycle = match self.engine {
            EngineKind::Mtr => self.timeout.max(MTR_CYCLE_INTERVAL),
            EngineKind::Native => self.timeout,
        };
        per_cycle
            .saturating_mul(self.report_cycles)
            .saturating_add(SLACK)
    }
}

/// Serde helper for Duration as fractional seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
