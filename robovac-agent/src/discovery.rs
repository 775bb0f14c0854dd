//! LAN discovery of vacuums from their UDP announcements
//!
//! This module handles:
//! - Binding the plaintext and encrypted broadcast ports with port reuse, so
//!   other integrations listening on the same ports keep working
//! - Decoding each datagram (see [`crate::broadcast`]) and keeping the first
//!   record seen per device identifier
//! - Bounding the listen window; discovery is best-effort and never fails

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::broadcast;
use crate::config::DiscoveryConfig;
use crate::error::{Result, RobovacError};

/// Field carrying the device identifier in an announcement.
pub const DEVICE_ID_FIELD: &str = "gwId";
/// Field carrying the device's own view of its address.
pub const IP_FIELD: &str = "ip";

const MAX_DATAGRAM: usize = 2048;

/// One decoded announcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryRecord {
    pub device_identifier: String,
    pub ip_address: String,
    pub raw_fields: Map<String, Value>,
}

impl DiscoveryRecord {
    /// Build a record from announcement fields. The address falls back to the
    /// datagram source when the device does not report one.
    pub fn from_fields(fields: Map<String, Value>, source: Option<IpAddr>) -> Option<Self> {
        let device_identifier = fields
            .get(DEVICE_ID_FIELD)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())?
            .to_string();

        let ip_address = fields
            .get(IP_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| source.map(|ip| ip.to_string()))?;

        Some(Self {
            device_identifier,
            ip_address,
            raw_fields: fields,
        })
    }
}

/// Records accumulated during one discovery window, first-seen wins.
#[derive(Debug, Default)]
pub struct DiscoveredDevices {
    devices: HashMap<String, DiscoveryRecord>,
}

impl DiscoveredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a raw datagram and record it. Returns true for a new device.
    pub fn ingest(&mut self, datagram: &[u8], source: SocketAddr) -> bool {
        match broadcast::decode_datagram(datagram) {
            Some(fields) => self.record(fields, Some(source.ip())),
            None => {
                debug!("Could not decode datagram from {}", source);
                false
            }
        }
    }

    /// Record decoded announcement fields. Returns true for a new device.
    pub fn record(&mut self, fields: Map<String, Value>, source: Option<IpAddr>) -> bool {
        let Some(record) = DiscoveryRecord::from_fields(fields, source) else {
            debug!("Announcement without a device identifier, ignoring");
            return false;
        };

        if self.devices.contains_key(&record.device_identifier) {
            return false;
        }

        debug!(
            "Discovered device {} at {}",
            record.device_identifier, record.ip_address
        );
        self.devices
            .insert(record.device_identifier.clone(), record);
        true
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&DiscoveryRecord> {
        self.devices.get(device_id)
    }

    pub fn into_map(self) -> HashMap<String, DiscoveryRecord> {
        self.devices
    }
}

/// Listens on both broadcast ports for one bounded window.
pub struct DiscoveryListener {
    config: DiscoveryConfig,
}

impl DiscoveryListener {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Run one discovery window.
    ///
    /// A port that cannot be claimed yields an empty result rather than an
    /// error; callers may simply try again on their own schedule.
    pub async fn discover(&self) -> HashMap<String, DiscoveryRecord> {
        let sockets = self.bind().await;
        let (plaintext, encrypted) = match sockets {
            Ok(sockets) => sockets,
            Err(e) => {
                warn!(
                    "Discovery unavailable, another integration may hold the ports: {}",
                    e
                );
                return HashMap::new();
            }
        };

        debug!(
            "Listening to broadcasts on UDP ports {} and {}",
            self.config.plaintext_port, self.config.encrypted_port
        );

        let found = listen(&plaintext, &encrypted, self.config.window()).await;
        info!("Discovery finished with {} device(s)", found.len());
        found.into_map()
    }

    async fn bind(&self) -> Result<(UdpSocket, UdpSocket)> {
        let plaintext = bind_reusable(self.config.plaintext_port)?;
        let encrypted = bind_reusable(self.config.encrypted_port)?;
        Ok((plaintext, encrypted))
    }
}

/// Collect announcements from two already-bound sockets until `window` elapses.
pub async fn listen(
    plaintext: &UdpSocket,
    encrypted: &UdpSocket,
    window: Duration,
) -> DiscoveredDevices {
    let mut found = DiscoveredDevices::new();
    let mut plain_buf = [0u8; MAX_DATAGRAM];
    let mut enc_buf = [0u8; MAX_DATAGRAM];

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,

            received = plaintext.recv_from(&mut plain_buf) => match received {
                Ok((len, source)) => {
                    found.ingest(&plain_buf[..len], source);
                }
                Err(e) => debug!("Receive error on plaintext port: {}", e),
            },

            received = encrypted.recv_from(&mut enc_buf) => match received {
                Ok((len, source)) => {
                    found.ingest(&enc_buf[..len], source);
                }
                Err(e) => debug!("Receive error on encrypted port: {}", e),
            },
        }
    }

    found
}

/// Bind `0.0.0.0:port` with address and port reuse enabled.
pub fn bind_reusable(port: u16) -> Result<UdpSocket> {
    let socket = bind_std(port).map_err(|source| RobovacError::Bind { port, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| RobovacError::Bind { port, source })?;
    UdpSocket::from_std(socket).map_err(|source| RobovacError::Bind { port, source })
}

#[cfg(unix)]
fn bind_std(port: u16) -> std::io::Result<std::net::UdpSocket> {
    use nix::sys::socket::{
        bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
    };
    use std::os::fd::AsRawFd;

    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        None,
    )?;
    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    setsockopt(&fd, sockopt::ReusePort, &true)?;
    setsockopt(&fd, sockopt::Broadcast, &true)?;
    bind(fd.as_raw_fd(), &SockaddrIn::new(0, 0, 0, 0, port))?;
    Ok(std::net::UdpSocket::from(fd))
}

#[cfg(not(unix))]
fn bind_std(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_same_record_twice_is_one_device() {
        let mut found = DiscoveredDevices::new();
        let announcement = fields(json!({"gwId": "dev-a", "ip": "192.168.1.20"}));

        assert!(found.record(announcement.clone(), None));
        assert!(!found.record(announcement, None));
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_distinct_identifiers_are_two_devices() {
        let mut found = DiscoveredDevices::new();
        found.record(fields(json!({"gwId": "dev-a", "ip": "192.168.1.20"})), None);
        found.record(fields(json!({"gwId": "dev-b", "ip": "192.168.1.21"})), None);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_first_seen_wins() {
        let mut found = DiscoveredDevices::new();
        found.record(fields(json!({"gwId": "dev-a", "ip": "192.168.1.20"})), None);
        found.record(fields(json!({"gwId": "dev-a", "ip": "192.168.1.99"})), None);
        assert_eq!(found.get("dev-a").unwrap().ip_address, "192.168.1.20");
    }

    #[test]
    fn test_missing_identifier_is_ignored() {
        let mut found = DiscoveredDevices::new();
        assert!(!found.record(fields(json!({"ip": "192.168.1.20"})), None));
        assert!(!found.record(fields(json!({"gwId": "", "ip": "192.168.1.20"})), None));
        assert!(found.is_empty());
    }

    #[test]
    fn test_address_falls_back_to_source() {
        let source: IpAddr = "10.1.2.3".parse().unwrap();
        let record =
            DiscoveryRecord::from_fields(fields(json!({"gwId": "dev-a"})), Some(source)).unwrap();
        assert_eq!(record.ip_address, "10.1.2.3");
        assert!(DiscoveryRecord::from_fields(fields(json!({"gwId": "dev-a"})), None).is_none());
    }

    #[test]
    fn test_ingest_skips_noise() {
        let mut found = DiscoveredDevices::new();
        let source: SocketAddr = "10.0.0.5:6667".parse().unwrap();
        assert!(!found.ingest(b"not a tuya packet", source));
        assert!(found.is_empty());
    }

    #[test]
    fn test_ingest_encrypted_announcement() {
        let mut datagram = vec![0u8; broadcast::HEADER_LEN];
        datagram.extend(broadcast::encrypt_body(
            br#"{"gwId":"dev-enc","ip":"192.168.1.30","version":"3.3"}"#,
        ));
        datagram.extend([0u8; broadcast::TRAILER_LEN]);

        let mut found = DiscoveredDevices::new();
        assert!(found.ingest(&datagram, "192.168.1.30:6667".parse().unwrap()));
        let record = found.get("dev-enc").unwrap();
        assert_eq!(record.raw_fields["version"], "3.3");
    }
}
