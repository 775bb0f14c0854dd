//! Local transport to a single device
//!
//! The session only needs two operations: read the full data-point state and
//! write a batch of data points. [`tuya::TuyaTransport`] speaks the vendor's
//! v3.3 LAN protocol; tests use the simulated vacuum from the devkit.

pub mod tuya;

pub use tuya::{TuyaConnector, TuyaTransport};

use serde::Serialize;
use std::future::Future;

use crate::dps::{DataPointSnapshot, DpsBatch};
use crate::error::Result;

/// Everything needed to reach one device on the LAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEndpoint {
    pub device_id: String,
    #[serde(skip)]
    pub local_key: String,
    pub ip_address: String,
}

pub trait LocalTransport: Send + 'static {
    fn read(&mut self) -> impl Future<Output = Result<DataPointSnapshot>> + Send;

    fn write(&mut self, batch: DpsBatch) -> impl Future<Output = Result<()>> + Send;
}

/// Builds transports for endpoints found during setup.
pub trait TransportConnector {
    type Transport: LocalTransport;

    fn connect(&self, endpoint: &DeviceEndpoint) -> Result<Self::Transport>;
}
