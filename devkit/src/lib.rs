/*!
# Robovac DevKit - stubs and helpers for developing without a vacuum

- Simulated S1 Pro that reacts to command writes like the real device
- Forged discovery announcements (plaintext and encrypted)
- Snapshot fixtures for the documented device states
- MQTT publisher mock for bridge tests without a broker
*/

pub mod fixtures;
pub mod mqtt_stub;
pub mod packets;
pub mod sim;

pub use mqtt_stub::{MockMessage, MockMqttClient};
pub use sim::{SimConnector, SimulatedVacuum};
