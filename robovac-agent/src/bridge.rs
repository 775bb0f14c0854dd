//! MQTT bridge: device state out, user commands in
//!
//! Topics, per device:
//! - `<base>/<device_id>/state@v1` (retained): [`DeviceView`] JSON, republished
//!   whenever the session publishes a new snapshot or goes unavailable
//! - `<base>/<device_id>/command@v1`: [`CommandRequest`]
//! - `<base>/<device_id>/response@v1`: [`CommandResponse`]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MqttConfig;
use crate::error::RobovacError;
use crate::registry::DeviceRegistry;
use crate::sequencer::{CommandOutcome, Intent};
use crate::view::DeviceView;

const STATE_TOPIC: &str = "state@v1";
const COMMAND_TOPIC: &str = "command@v1";
const RESPONSE_TOPIC: &str = "response@v1";

/// Anything that can put a message on the broker.
pub trait Publisher: Clone + Send + Sync + 'static {
    fn publish_message(
        &self,
        topic: String,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl Publisher for AsyncClient {
    async fn publish_message(
        &self,
        topic: String,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<()> {
        AsyncClient::publish(self, topic.clone(), QoS::AtLeastOnce, retain, payload)
            .await
            .with_context(|| format!("Failed to publish to {topic}"))
    }
}

#[derive(Debug, Clone)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn state(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.base, device_id, STATE_TOPIC)
    }

    pub fn command(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.base, device_id, COMMAND_TOPIC)
    }

    pub fn response(&self, device_id: &str) -> String {
        format!("{}/{}/{}", self.base, device_id, RESPONSE_TOPIC)
    }

    /// Device id from a command topic.
    pub fn command_device<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let device_id = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?
            .strip_suffix(COMMAND_TOPIC)?
            .strip_suffix('/')?;
        (!device_id.is_empty() && !device_id.contains('/')).then_some(device_id)
    }
}

/// Incoming command (command@v1 contract)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub command_id: Option<String>,
    pub intent: String,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Command response (response@v1 contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub device_id: String,
    pub status: String,
    pub outcome: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub execution_time_ms: u128,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl From<&RobovacError> for ErrorInfo {
    fn from(error: &RobovacError) -> Self {
        Self {
            code: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Map a command@v1 intent name and value to an [`Intent`].
pub fn parse_intent(name: &str, value: Option<&Value>) -> crate::error::Result<Intent> {
    let text_value = |kind: &'static str| {
        value
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RobovacError::unrecognized(kind, describe(value)))
    };

    let intent = match name {
        "start" => Intent::Start,
        "pause" => Intent::Pause,
        "resume" => Intent::Resume,
        "stop" => Intent::Stop,
        "return_home" => Intent::ReturnHome,
        "clean_spot" => Intent::CleanSpot,
        "locate" => Intent::Locate,
        "set_fan_speed" => Intent::SetFanSpeed(text_value("fan speed")?),
        "set_cleaning_mode" => Intent::SetCleaningMode(text_value("cleaning mode")?),
        "set_auto_return" => Intent::SetAutoReturn(
            value
                .and_then(Value::as_bool)
                .ok_or_else(|| RobovacError::unrecognized("auto return value", describe(value)))?,
        ),
        other => return Err(RobovacError::unrecognized("intent", other)),
    };
    Ok(intent)
}

fn describe(value: Option<&Value>) -> String {
    value.map_or_else(|| "<missing>".to_string(), Value::to_string)
}

pub struct Bridge<P> {
    publisher: P,
    topics: Topics,
    registry: Arc<DeviceRegistry>,
}

impl<P: Publisher> Bridge<P> {
    pub fn new(publisher: P, topics: Topics, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            publisher,
            topics,
            registry,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub async fn publish_state(&self, view: &DeviceView) -> Result<()> {
        let payload = serde_json::to_vec(view).context("Failed to serialize device state")?;
        self.publisher
            .publish_message(self.topics.state(&view.device_id), true, payload)
            .await
    }

    /// One task per device, republishing state on every snapshot change.
    pub fn spawn_state_publishers(self: &Arc<Self>) {
        for handle in self.registry.handles() {
            let bridge = Arc::clone(self);
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut updates = handle.subscribe();
                loop {
                    let view = {
                        let snapshot = updates.borrow_and_update();
                        DeviceView::new(handle.device_id(), snapshot.as_deref())
                    };
                    if let Err(e) = bridge.publish_state(&view).await {
                        warn!("State publish for {} failed: {}", handle.device_id(), e);
                    }
                    if updates.changed().await.is_err() {
                        debug!("State updates for {} ended", handle.device_id());
                        break;
                    }
                }
            });
        }
    }

    /// Run a command payload against a device and build the response.
    pub async fn handle_command(&self, device_id: &str, payload: &[u8]) -> CommandResponse {
        let started = Instant::now();

        let (command_id, result) = match serde_json::from_slice::<CommandRequest>(payload) {
            Ok(request) => {
                let command_id = request
                    .command_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                (command_id, self.execute(device_id, &request).await)
            }
            Err(e) => (
                Uuid::new_v4().to_string(),
                Err(ErrorInfo {
                    code: "invalid_request".to_string(),
                    message: e.to_string(),
                }),
            ),
        };

        let (status, outcome, error) = match result {
            Ok(outcome) => ("success", serde_json::to_value(outcome).ok(), None),
            Err(error) => ("error", None, Some(error)),
        };

        CommandResponse {
            command_id,
            device_id: device_id.to_string(),
            status: status.to_string(),
            outcome,
            error,
            execution_time_ms: started.elapsed().as_millis(),
            timestamp: Utc::now(),
        }
    }

    async fn execute(
        &self,
        device_id: &str,
        request: &CommandRequest,
    ) -> std::result::Result<CommandOutcome, ErrorInfo> {
        let intent = parse_intent(&request.intent, request.value.as_ref())
            .map_err(|e| ErrorInfo::from(&e))?;

        let handle = self.registry.get(device_id).ok_or_else(|| ErrorInfo {
            code: "unknown_device".to_string(),
            message: format!("No session for device {device_id}"),
        })?;

        handle.command(intent).await.map_err(|e| ErrorInfo::from(&e))
    }

    /// Handle one incoming publish. Topics that are not command topics are ignored.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let Some(device_id) = self.topics.command_device(topic) else {
            debug!("Ignoring message on {}", topic);
            return Ok(());
        };

        let response = self.handle_command(device_id, payload).await;
        if let Some(error) = &response.error {
            error!(
                "Command {} for {} failed: {}",
                response.command_id, device_id, error.message
            );
        }

        let payload =
            serde_json::to_vec(&response).context("Failed to serialize command response")?;
        self.publisher
            .publish_message(self.topics.response(device_id), false, payload)
            .await
    }
}

/// Connect to the broker and serve every registered device until the process ends.
pub async fn run(config: &MqttConfig, registry: Arc<DeviceRegistry>) -> Result<()> {
    let client_id = config.resolved_client_id();
    let mut options = MqttOptions::new(&client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    let topics = Topics::new(config.base_topic.clone());
    let bridge = Arc::new(Bridge::new(client.clone(), topics, registry.clone()));
    bridge.spawn_state_publishers();

    info!(
        "MQTT bridge {} connecting to {}:{}",
        client_id, config.broker_host, config.broker_port
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                // Clean sessions drop subscriptions; renew them on every connect.
                for device_id in registry.device_ids() {
                    let topic = bridge.topics().command(device_id);
                    match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Subscribed to commands on: {}", topic),
                        Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
                    }
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("Received MQTT message on topic: {}", publish.topic);
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    if let Err(e) = bridge.dispatch(&publish.topic, &publish.payload).await {
                        error!("Failed to answer command: {:#}", e);
                    }
                });
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(String, bool, Vec<u8>)>>>,
    }

    impl Publisher for Recorder {
        async fn publish_message(
            &self,
            topic: String,
            retain: bool,
            payload: Vec<u8>,
        ) -> Result<()> {
            self.sent.lock().unwrap().push((topic, retain, payload));
            Ok(())
        }
    }

    fn bridge() -> (Bridge<Recorder>, Recorder) {
        let recorder = Recorder::default();
        let bridge = Bridge::new(
            recorder.clone(),
            Topics::new("robovac"),
            Arc::new(DeviceRegistry::default()),
        );
        (bridge, recorder)
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("home/robovac/");
        assert_eq!(topics.state("dev"), "home/robovac/dev/state@v1");
        assert_eq!(
            topics.command_device("home/robovac/dev/command@v1"),
            Some("dev")
        );
        assert_eq!(topics.command_device("home/robovac/dev/state@v1"), None);
        assert_eq!(topics.command_device("home/robovac//command@v1"), None);
        assert_eq!(topics.command_device("other/dev/command@v1"), None);
    }

    #[test]
    fn test_parse_intents() {
        assert_eq!(parse_intent("stop", None).unwrap(), Intent::Stop);
        assert_eq!(
            parse_intent("set_fan_speed", Some(&json!("Turbo"))).unwrap(),
            Intent::SetFanSpeed("Turbo".into())
        );
        assert_eq!(
            parse_intent("set_auto_return", Some(&json!(false))).unwrap(),
            Intent::SetAutoReturn(false)
        );
        assert!(matches!(
            parse_intent("set_fan_speed", None),
            Err(RobovacError::UnrecognizedInput { .. })
        ));
        assert!(matches!(
            parse_intent("self_destruct", None),
            Err(RobovacError::UnrecognizedInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_gets_error_response() {
        let (bridge, _) = bridge();
        let response = bridge.handle_command("dev", b"{not json").await;
        assert_eq!(response.status, "error");
        assert_eq!(response.error.unwrap().code, "invalid_request");
        assert!(!response.command_id.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_keeps_command_id() {
        let (bridge, _) = bridge();
        let payload = json!({"command_id": "cmd-1", "intent": "start"}).to_string();
        let response = bridge.handle_command("ghost", payload.as_bytes()).await;
        assert_eq!(response.command_id, "cmd-1");
        assert_eq!(response.error.unwrap().code, "unknown_device");
    }

    #[tokio::test]
    async fn test_intent_validation_order() {
        let (bridge, _) = bridge();
        let payload = json!({"intent": "set_fan_speed", "value": "Hurricane"}).to_string();
        let response = bridge.handle_command("ghost", payload.as_bytes()).await;
        // Fan speed labels are validated when the plan is built, inside the session.
        assert_eq!(response.error.unwrap().code, "unknown_device");

        let payload = json!({"intent": "dance"}).to_string();
        let response = bridge.handle_command("ghost", payload.as_bytes()).await;
        assert_eq!(response.error.unwrap().code, "unrecognized_input");
    }

    #[tokio::test]
    async fn test_dispatch_publishes_response() {
        let (bridge, recorder) = bridge();
        bridge
            .dispatch("robovac/dev/command@v1", br#"{"intent": "locate"}"#)
            .await
            .unwrap();
        bridge.dispatch("robovac/dev/state@v1", b"{}").await.unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "robovac/dev/response@v1");
        assert!(!sent[0].1);
    }

    #[tokio::test]
    async fn test_state_is_retained() {
        let (bridge, recorder) = bridge();
        bridge
            .publish_state(&DeviceView::unavailable("dev"))
            .await
            .unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0].0, "robovac/dev/state@v1");
        assert!(sent[0].1);
        let state: Value = serde_json::from_slice(&sent[0].2).unwrap();
        assert_eq!(state["activity"], "unknown");
    }
}
