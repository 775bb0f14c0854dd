/*!
Simulated S1 Pro

Holds a data-point map and reacts to command-code writes the way the real
device does: the primary status follows cleaning, pause and return codes, and
every written key is echoed back on the next read. Failures can be injected
per device to exercise unavailability and partial command sequences.

Clones share the same device, so a test keeps one clone for assertions while
the session owns another as its transport.
*/

use parking_lot::Mutex;
use robovac_agent::dps::{keys, CommandCode, DataPointSnapshot, DpsBatch, DpsValue, StatusCode};
use robovac_agent::error::{Result, RobovacError};
use robovac_agent::transport::{DeviceEndpoint, LocalTransport, TransportConnector};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct SimState {
    dps: BTreeMap<String, DpsValue>,
    writes: Vec<DpsBatch>,
    attempted_writes: usize,
    reads: usize,
    fail_reads: bool,
    fail_write_at: Option<usize>,
    ignore_start: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedVacuum {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedVacuum {
    pub fn new(initial: DataPointSnapshot) -> Self {
        let sim = Self::default();
        sim.set_state(initial);
        sim
    }

    /// Replace the whole data-point map.
    pub fn set_state(&self, snapshot: DataPointSnapshot) {
        self.state.lock().dps = snapshot
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
    }

    pub fn set(&self, key: &str, value: impl Into<DpsValue>) {
        self.state.lock().dps.insert(key.to_string(), value.into());
    }

    pub fn snapshot(&self) -> DataPointSnapshot {
        DataPointSnapshot::from(self.state.lock().dps.clone())
    }

    /// Make reads fail until switched back, like a device that left the network.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Fail the `n`th write attempt from now on (1-based).
    pub fn fail_write_at(&self, n: usize) {
        let mut state = self.state.lock();
        state.fail_write_at = Some(state.attempted_writes + n);
    }

    /// Accept cleaning codes without ever leaving the dock.
    pub fn set_ignore_start(&self, ignore: bool) {
        self.state.lock().ignore_start = ignore;
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<DpsBatch> {
        self.state.lock().writes.clone()
    }

    /// Values written to the command key, oldest first.
    pub fn command_writes(&self) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter_map(|batch| batch.get(keys::COMMAND))
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    fn apply(state: &mut SimState, batch: &DpsBatch) {
        for (key, value) in batch {
            state.dps.insert(key.clone(), value.clone());
        }

        let Some(code) = batch
            .get(keys::COMMAND)
            .and_then(DpsValue::as_str)
            .and_then(CommandCode::from_encoded)
        else {
            return;
        };

        let status = match code {
            CommandCode::Cleaning if state.ignore_start => None,
            CommandCode::Cleaning => Some(StatusCode::Cleaning),
            CommandCode::Pause => Some(StatusCode::Paused),
            CommandCode::Return => Some(StatusCode::Returning),
            CommandCode::Start => None,
        };
        if let Some(status) = status {
            state
                .dps
                .insert(keys::STATUS.to_string(), status.encoded().into());
        }
    }
}

impl LocalTransport for SimulatedVacuum {
    async fn read(&mut self) -> Result<DataPointSnapshot> {
        let mut state = self.state.lock();
        if state.fail_reads {
            return Err(RobovacError::transport("simulated device unreachable"));
        }
        state.reads += 1;
        Ok(DataPointSnapshot::from(state.dps.clone()))
    }

    async fn write(&mut self, batch: DpsBatch) -> Result<()> {
        let mut state = self.state.lock();
        state.attempted_writes += 1;
        if state.fail_write_at == Some(state.attempted_writes) {
            state.fail_write_at = None;
            return Err(RobovacError::transport("simulated write timeout"));
        }

        debug!("[sim] write {:?}", batch);
        Self::apply(&mut state, &batch);
        state.writes.push(batch);
        Ok(())
    }
}

/// Hands out simulated devices by id. Unknown ids fail to connect.
#[derive(Debug, Clone, Default)]
pub struct SimConnector {
    devices: HashMap<String, SimulatedVacuum>,
    connected: Arc<Mutex<Vec<DeviceEndpoint>>>,
}

impl SimConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_id: &str, vacuum: SimulatedVacuum) -> Self {
        self.devices.insert(device_id.to_string(), vacuum);
        self
    }

    /// Endpoints passed to `connect`, in call order.
    pub fn connected(&self) -> Vec<DeviceEndpoint> {
        self.connected.lock().clone()
    }
}

impl TransportConnector for SimConnector {
    type Transport = SimulatedVacuum;

    fn connect(&self, endpoint: &DeviceEndpoint) -> Result<SimulatedVacuum> {
        self.connected.lock().push(endpoint.clone());
        self.devices
            .get(&endpoint.device_id)
            .cloned()
            .ok_or_else(|| {
                RobovacError::transport(format!("no simulated device {}", endpoint.device_id))
            })
    }
}
