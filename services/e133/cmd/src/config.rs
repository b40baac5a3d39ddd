//! Configuration handling for the monitor.
//!
//! Values start from defaults, are overlaid by an optional YAML file and then
//! by environment variables. Command line flags are applied last by `main`.

use std::net::SocketAddrV4;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use e133_discovery::{SlpConfig, E133_SERVICE_TYPE, SLP_DEFAULT_SCOPE, SLP_MULTICAST_ADDR};
use e133_session::{
    MonitorSettings, SessionLossPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_INITIAL_RETRY_DELAY, DEFAULT_MAX_RETRY_DELAY, DEFAULT_SOURCE_NAME,
};
use e133_wire::E133_PORT;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Port devices are contacted on
    pub port: u16,
    /// Bound on a single connect attempt
    #[serde(with = "humantime_duration")]
    pub connect_timeout: Duration,
    /// First retry delay after a failed connect
    #[serde(with = "humantime_duration")]
    pub initial_retry_delay: Duration,
    /// Upper bound of the retry delay
    #[serde(with = "humantime_duration")]
    pub max_retry_delay: Duration,
    /// Heartbeat interval of each health check
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
    /// Stop the monitor when any session is lost
    pub exit_on_session_loss: bool,
    /// Name placed in outgoing E1.33 headers
    pub source_name: String,
    /// Discovery settings
    pub slp: SlpSection,
}

/// SLP discovery section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlpSection {
    /// Scope list
    pub scope: String,
    /// Service type requested
    pub service_type: String,
    /// Listening time of one discovery round
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
    /// Multicast group and port requests go to
    pub multicast_addr: SocketAddrV4,
}

impl Default for SlpSection {
    fn default() -> Self {
        Self {
            scope: SLP_DEFAULT_SCOPE.to_string(),
            service_type: E133_SERVICE_TYPE.to_string(),
            timeout: Duration::from_secs(3),
            multicast_addr: SLP_MULTICAST_ADDR,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: E133_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            initial_retry_delay: DEFAULT_INITIAL_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            exit_on_session_loss: false,
            source_name: DEFAULT_SOURCE_NAME.to_string(),
            slp: SlpSection::default(),
        }
    }
}

impl MonitorConfig {
    /// Build the configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        info!(
            "Monitor configuration: port={}, heartbeat_interval={}, exit_on_session_loss={}",
            config.port,
            humantime::format_duration(config.heartbeat_interval),
            config.exit_on_session_loss
        );
        Ok(config)
    }

    /// Read a YAML file; a missing or unparsable file is an error
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("connect_timeout", self.connect_timeout),
            ("initial_retry_delay", self.initial_retry_delay),
            ("slp.timeout", self.slp.timeout),
        ];
        for (name, value) in required {
            if value.is_zero() {
                bail!("{} must be non-zero", name);
            }
        }
        if self.max_retry_delay < self.initial_retry_delay {
            bail!("max_retry_delay must not be shorter than initial_retry_delay");
        }
        Ok(())
    }

    /// Apply `E133_MONITOR_*` overrides; unparsable values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("E133_MONITOR_PORT") {
            match value.parse::<u16>() {
                Ok(port) => {
                    self.port = port;
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid E133_MONITOR_PORT {:?}", value),
            }
        }

        if let Some(value) = lookup("E133_MONITOR_HEARTBEAT_INTERVAL") {
            match humantime::parse_duration(&value) {
                Ok(interval) if !interval.is_zero() => {
                    self.heartbeat_interval = interval;
                    info!("Heartbeat interval overridden by environment: {}", value);
                }
                _ => warn!("Ignoring invalid E133_MONITOR_HEARTBEAT_INTERVAL {:?}", value),
            }
        }

        if let Some(value) = lookup("E133_MONITOR_EXIT_ON_SESSION_LOSS") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.exit_on_session_loss = true,
                "0" | "false" | "no" => self.exit_on_session_loss = false,
                _ => warn!("Ignoring invalid E133_MONITOR_EXIT_ON_SESSION_LOSS {:?}", value),
            }
        }
    }

    /// Settings for the session manager
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            port: self.port,
            heartbeat_interval: self.heartbeat_interval,
            session_loss: if self.exit_on_session_loss {
                SessionLossPolicy::Shutdown
            } else {
                SessionLossPolicy::Reconnect
            },
            source_name: self.source_name.clone(),
        }
    }

    /// Settings for the SLP agent
    pub fn slp_config(&self) -> SlpConfig {
        SlpConfig {
            service_type: self.slp.service_type.clone(),
            scope: self.slp.scope.clone(),
            timeout: self.slp.timeout,
            multicast_addr: self.slp.multicast_addr,
        }
    }
}

/// Serde adapter for humantime strings such as `"2s"` or `"1m 30s"`
mod humantime_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(de::Error::custom)
    }
}
