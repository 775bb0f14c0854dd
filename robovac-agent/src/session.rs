//! Device session: the single owner of one device's connection and state
//!
//! A session is built un-spawned so setup can do a best-effort first refresh
//! before any poller runs. [`DeviceSession::spawn`] then moves it onto its own
//! task, which serializes scheduled polls and user commands for that device.
//! Consumers get a [`SessionHandle`]; snapshots are published through a
//! `watch` channel as whole immutable `Arc`s.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::activity;
use crate::config::SessionConfig;
use crate::dps::{DataPointSnapshot, DpsBatch};
use crate::error::{Result, RobovacError};
use crate::sequencer::{self, CommandOutcome, CommandSink, Intent, SequencerMemory};
use crate::transport::LocalTransport;
use crate::view::DeviceView;

pub type SharedSnapshot = Option<Arc<DataPointSnapshot>>;

const REQUEST_QUEUE: usize = 16;

enum SessionRequest {
    Command {
        intent: Intent,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Transport plus published state. Kept apart from the sequencer memory so
/// both can be borrowed while a plan runs.
struct SessionLink<T> {
    device_id: String,
    transport: T,
    current: SharedSnapshot,
    publisher: watch::Sender<SharedSnapshot>,
    missed_polls: u32,
    unavailable_after: u32,
}

impl<T: LocalTransport> SessionLink<T> {
    async fn poll(&mut self) -> Result<()> {
        match self.transport.read().await {
            Ok(snapshot) => {
                debug!(
                    "Polled {}: {} data points",
                    self.device_id,
                    snapshot.len()
                );
                let snapshot = Arc::new(snapshot);
                self.current = Some(snapshot.clone());
                self.missed_polls = 0;
                self.publisher.send_replace(Some(snapshot));
                Ok(())
            }
            Err(e) => {
                self.missed_polls = self.missed_polls.saturating_add(1);
                if self.missed_polls >= self.unavailable_after && self.current.is_some() {
                    info!(
                        "{} unavailable after {} failed poll(s)",
                        self.device_id, self.missed_polls
                    );
                    self.current = None;
                    self.publisher.send_replace(None);
                }
                Err(e)
            }
        }
    }
}

impl<T: LocalTransport> CommandSink for SessionLink<T> {
    async fn write(&mut self, batch: DpsBatch) -> Result<()> {
        self.transport.write(batch).await
    }

    async fn refresh(&mut self) -> Result<()> {
        self.poll().await
    }

    fn current(&self) -> Option<&DataPointSnapshot> {
        self.current.as_deref()
    }
}

pub struct DeviceSession<T> {
    link: SessionLink<T>,
    memory: SequencerMemory,
    config: SessionConfig,
}

impl<T: LocalTransport> DeviceSession<T> {
    pub fn new(device_id: impl Into<String>, transport: T, config: SessionConfig) -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            link: SessionLink {
                device_id: device_id.into(),
                transport,
                current: None,
                publisher,
                missed_polls: 0,
                unavailable_after: config.unavailable_after.max(1),
            },
            memory: SequencerMemory::new(),
            config,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.link.device_id
    }

    pub fn snapshot(&self) -> SharedSnapshot {
        self.link.current.clone()
    }

    pub fn memory(&self) -> SequencerMemory {
        self.memory
    }

    pub fn subscribe(&self) -> watch::Receiver<SharedSnapshot> {
        self.link.publisher.subscribe()
    }

    /// Read the device once and publish the result.
    pub async fn poll(&mut self) -> Result<()> {
        self.link.poll().await?;
        if let Some(snapshot) = self.link.current.as_deref() {
            let (rule, state) = activity::explain(snapshot);
            self.memory.observe(rule, state);
        }
        Ok(())
    }

    /// Initial refresh during setup. Failure only delays data until the next poll.
    pub async fn first_refresh(&mut self) -> bool {
        match self.poll().await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Initial refresh of {} failed, will retry on next poll: {}",
                    self.link.device_id, e
                );
                false
            }
        }
    }

    /// Run a user intent through the sequencer.
    pub async fn command(&mut self, intent: &Intent) -> Result<CommandOutcome> {
        info!("{} on {}", intent, self.link.device_id);
        let result = sequencer::execute(&mut self.link, intent, &mut self.memory).await;
        match &result {
            Ok(outcome) => info!(
                "{} on {} done: {} write(s), activity {:?}",
                outcome.intent, self.link.device_id, outcome.writes, outcome.activity
            ),
            Err(e) => error!("{} on {} failed: {}", intent, self.link.device_id, e),
        }
        result
    }

    /// Move the session onto its own task and start polling.
    pub fn spawn(self) -> SessionHandle {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE);
        let handle = SessionHandle {
            device_id: self.link.device_id.clone(),
            requests,
            snapshots: self.subscribe(),
        };
        tokio::spawn(self.run(receiver));
        handle
    }

    async fn run(mut self, mut requests: mpsc::Receiver<SessionRequest>) {
        let period = self.config.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!("Poll of {} failed: {}", self.link.device_id, e);
                    }
                }

                request = requests.recv() => match request {
                    Some(SessionRequest::Command { intent, reply }) => {
                        let result = self.command(&intent).await;
                        let _ = reply.send(result);
                    }
                    Some(SessionRequest::Refresh { reply }) => {
                        let _ = reply.send(self.poll().await);
                    }
                    None => break,
                },
            }
        }

        debug!("Session for {} stopped", self.link.device_id);
    }
}

/// Cheap, cloneable access to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    device_id: String,
    requests: mpsc::Sender<SessionRequest>,
    snapshots: watch::Receiver<SharedSnapshot>,
}

impl SessionHandle {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Latest published snapshot; `None` while unavailable.
    pub fn latest(&self) -> SharedSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SharedSnapshot> {
        self.snapshots.clone()
    }

    pub fn view(&self) -> DeviceView {
        DeviceView::new(self.device_id.clone(), self.latest().as_deref())
    }

    pub async fn command(&self, intent: Intent) -> Result<CommandOutcome> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest::Command { intent, reply })
            .await
            .map_err(|_| RobovacError::SessionClosed)?;
        response.await.map_err(|_| RobovacError::SessionClosed)?
    }

    pub async fn refresh(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(SessionRequest::Refresh { reply })
            .await
            .map_err(|_| RobovacError::SessionClosed)?;
        response.await.map_err(|_| RobovacError::SessionClosed)?
    }
}
