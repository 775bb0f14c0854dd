//! Robovac Agent - local control for the S1 Pro robot vacuum
//!
//! Finds vacuums on the LAN from their UDP announcements, polls each one over
//! the vendor's local protocol, derives a canonical activity and telemetry
//! from the raw data points, and turns user intents into ordered device
//! writes. Cloud access is only needed once, to learn each device's local key.

pub mod activity;
pub mod bridge;
pub mod broadcast;
pub mod cloud;
pub mod config;
pub mod discovery;
pub mod dps;
pub mod error;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod view;

pub use activity::{classify, ActivityState};
pub use config::AgentConfig;
pub use discovery::{DiscoveryListener, DiscoveryRecord};
pub use dps::{DataPointSnapshot, DpsBatch, DpsValue};
pub use error::{Result, RobovacError};
pub use registry::DeviceRegistry;
pub use sequencer::{CommandOutcome, Intent, SequencerMemory};
pub use session::{DeviceSession, SessionHandle};
pub use telemetry::TelemetryStats;
pub use transport::{DeviceEndpoint, LocalTransport, TransportConnector};
pub use view::DeviceView;
