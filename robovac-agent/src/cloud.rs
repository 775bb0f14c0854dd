//! Account directory used once at setup to map device ids to local keys
//!
//! Only the shape of the account API matters here: user info, homes, and the
//! devices in each home. [`StaticDirectory`] answers from the config file so
//! the agent runs without any cloud access.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::config::DeviceEntry;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub phone_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Home {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudDevice {
    #[serde(rename = "devId")]
    pub dev_id: String,
    #[serde(rename = "localKey")]
    pub local_key: String,
}

/// Local key for one device. Held in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCredential {
    pub device_id: String,
    pub local_key: String,
    pub home_id: String,
}

impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("device_id", &self.device_id)
            .field("local_key", &"<redacted>")
            .field("home_id", &self.home_id)
            .finish()
    }
}

pub trait CloudDirectory {
    fn user_info(&self) -> impl Future<Output = Result<UserInfo>> + Send;

    fn list_homes(&self) -> impl Future<Output = Result<Vec<Home>>> + Send;

    fn list_devices(&self, group_id: &str) -> impl Future<Output = Result<Vec<CloudDevice>>> + Send;
}

/// Walk every home of the account and collect device keys. The first home
/// listing a device wins.
pub async fn resolve_credentials<D: CloudDirectory>(
    directory: &D,
) -> Result<HashMap<String, DeviceCredential>> {
    let user = directory
        .user_info()
        .await
        .context("Failed to fetch account info")?;
    debug!("Resolving devices for account {}", user.id);

    let homes = directory
        .list_homes()
        .await
        .context("Failed to list homes")?;

    let mut credentials = HashMap::new();
    for home in homes {
        let devices = directory
            .list_devices(&home.group_id)
            .await
            .with_context(|| format!("Failed to list devices of home {}", home.group_id))?;

        for device in devices {
            if device.local_key.is_empty() {
                warn!("Device {} has no local key, skipping", device.dev_id);
                continue;
            }
            credentials
                .entry(device.dev_id.clone())
                .or_insert_with(|| DeviceCredential {
                    device_id: device.dev_id,
                    local_key: device.local_key,
                    home_id: home.group_id.clone(),
                });
        }
    }

    info!("Resolved local keys for {} device(s)", credentials.len());
    Ok(credentials)
}

/// Directory backed by the `[[devices]]` entries of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: Vec<DeviceEntry>,
}

impl StaticDirectory {
    pub fn new(entries: Vec<DeviceEntry>) -> Self {
        Self { entries }
    }
}

impl CloudDirectory for StaticDirectory {
    async fn user_info(&self) -> Result<UserInfo> {
        Ok(UserInfo {
            id: "local".to_string(),
            phone_code: String::new(),
        })
    }

    async fn list_homes(&self) -> Result<Vec<Home>> {
        let mut homes: Vec<Home> = Vec::new();
        for entry in &self.entries {
            if !homes.iter().any(|home| home.group_id == entry.home_id) {
                homes.push(Home {
                    group_id: entry.home_id.clone(),
                });
            }
        }
        Ok(homes)
    }

    async fn list_devices(&self, group_id: &str) -> Result<Vec<CloudDevice>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.home_id == group_id)
            .map(|entry| CloudDevice {
                dev_id: entry.device_id.clone(),
                local_key: entry.local_key.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(device_id: &str, local_key: &str, home_id: &str) -> DeviceEntry {
        DeviceEntry {
            device_id: device_id.into(),
            local_key: local_key.into(),
            home_id: home_id.into(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_from_static_directory() {
        let directory = StaticDirectory::new(vec![
            entry("dev-a", "0123456789abcdef", "home-1"),
            entry("dev-b", "fedcba9876543210", "home-2"),
            entry("dev-c", "", "home-2"),
        ]);

        let credentials = resolve_credentials(&directory).await.unwrap();

        assert_eq!(credentials.len(), 2);
        assert_eq!(credentials["dev-b"].home_id, "home-2");
        assert_eq!(credentials["dev-a"].local_key, "0123456789abcdef");
    }

    #[tokio::test]
    async fn test_first_home_wins() {
        let directory = StaticDirectory::new(vec![
            entry("dev-a", "0123456789abcdef", "home-1"),
            entry("dev-a", "aaaaaaaaaaaaaaaa", "home-2"),
        ]);

        let credentials = resolve_credentials(&directory).await.unwrap();
        assert_eq!(credentials["dev-a"].home_id, "home-1");
    }

    #[test]
    fn test_debug_hides_local_key() {
        let credential = DeviceCredential {
            device_id: "dev".into(),
            local_key: "0123456789abcdef".into(),
            home_id: "home".into(),
        };
        assert!(!format!("{credential:?}").contains("0123456789abcdef"));
    }

    #[test]
    fn test_cloud_payload_shapes() {
        let homes: Vec<Home> = serde_json::from_str(r#"[{"groupId": "1234"}]"#).unwrap();
        assert_eq!(homes[0].group_id, "1234");
        let devices: Vec<CloudDevice> =
            serde_json::from_str(r#"[{"devId": "eb01", "localKey": "k"}]"#).unwrap();
        assert_eq!(devices[0].local_key, "k");
    }
}
