//! Setup: discovered devices × credentials → running sessions
//!
//! The registry is populated in full before any session task is released,
//! and never changes afterwards.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::cloud::DeviceCredential;
use crate::config::SessionConfig;
use crate::discovery::DiscoveryRecord;
use crate::session::{DeviceSession, SessionHandle};
use crate::transport::{DeviceEndpoint, TransportConnector};

#[derive(Default)]
pub struct DeviceRegistry {
    sessions: BTreeMap<String, SessionHandle>,
}

impl DeviceRegistry {
    /// Build a session for every discovered device with a known key.
    ///
    /// Each session gets a best-effort first refresh; a device that does not
    /// answer is still registered and picked up by its poller.
    pub async fn setup<C: TransportConnector>(
        connector: &C,
        credentials: &HashMap<String, DeviceCredential>,
        discovered: &HashMap<String, DiscoveryRecord>,
        config: &SessionConfig,
    ) -> Self {
        let mut pending = Vec::new();

        for (device_id, record) in discovered {
            let Some(credential) = credentials.get(device_id) else {
                debug!("{} is not in the account, ignoring", device_id);
                continue;
            };

            let endpoint = DeviceEndpoint {
                device_id: device_id.clone(),
                local_key: credential.local_key.clone(),
                ip_address: record.ip_address.clone(),
            };
            let transport = match connector.connect(&endpoint) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("Cannot set up {}: {}", device_id, e);
                    continue;
                }
            };

            let mut session = DeviceSession::new(device_id.clone(), transport, config.clone());
            session.first_refresh().await;
            pending.push(session);
        }

        for device_id in credentials.keys() {
            if !discovered.contains_key(device_id) {
                warn!("{} was not found on the local network", device_id);
            }
        }

        // Population is complete; release the pollers.
        let sessions: BTreeMap<_, _> = pending
            .into_iter()
            .map(|session| (session.device_id().to_string(), session.spawn()))
            .collect();

        info!("{} device session(s) running", sessions.len());
        Self { sessions }
    }

    pub fn get(&self, device_id: &str) -> Option<&SessionHandle> {
        self.sessions.get(device_id)
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn handles(&self) -> impl Iterator<Item = &SessionHandle> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
