//! Configuration management
//!
//! Handles:
//! - Discovery window and broadcast ports
//! - Poll cadence and transport timeouts per device session
//! - MQTT broker settings for the state/command bridge
//! - The static device directory (device id, local key, home)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RobovacError};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "ROBOVAC_AGENT_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub discovery: DiscoveryConfig,
    pub session: SessionConfig,
    pub mqtt: MqttConfig,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub timeout_secs: u64,
    pub plaintext_port: u16,
    pub encrypted_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_secs: u64,
    /// Consecutive failed polls before the device is reported unavailable.
    pub unavailable_after: u32,
    pub transport_timeout_secs: u64,
    pub device_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub base_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub device_id: String,
    pub local_key: String,
    #[serde(default = "default_home_id")]
    pub home_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_home_id() -> String {
    "local".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            plaintext_port: 6666,
            encrypted_port: 6667,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            unavailable_after: 1,
            transport_timeout_secs: 5,
            device_port: 6668,
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 30,
            base_topic: "robovac".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
            mqtt: MqttConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }
}

impl MqttConfig {
    /// Client id from config, or `robovac-agent-<hostname>`.
    pub fn resolved_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            format!("robovac-agent-{host}")
        })
    }
}

impl AgentConfig {
    /// Load from `ROBOVAC_AGENT_CONFIG`, else the OS config dir; defaults when absent.
    pub async fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: AgentConfig = toml::from_str(&content)
            .map_err(|e| RobovacError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to the location [`AgentConfig::load`] reads from.
    pub async fn save(&self) -> Result<PathBuf> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };
        self.save_to(&path).await?;
        Ok(path)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| RobovacError::Config(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| RobovacError::Config("could not find config directory".into()))?;

        path.push("robovac-agent");
        path.push("config.toml");
        Ok(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery.timeout_secs == 0 {
            return Err(RobovacError::Config("discovery.timeout_secs must be > 0".into()));
        }
        if self.session.poll_interval_secs == 0 || self.session.transport_timeout_secs == 0 {
            return Err(RobovacError::Config(
                "session intervals and timeouts must be > 0".into(),
            ));
        }
        for device in &self.devices {
            if device.local_key.len() != 16 {
                return Err(RobovacError::Config(format!(
                    "local key for {} must be 16 bytes, got {}",
                    device.device_id,
                    device.local_key.len()
                )));
            }
        }
        Ok(())
    }
}
