/*!
Mock MQTT client for bridge development without a broker

Records every published message and implements the bridge's `Publisher`,
so a `Bridge<MockMqttClient>` runs entirely in memory.
*/

use anyhow::Result;
use parking_lot::Mutex;
use robovac_agent::bridge::Publisher;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    fail_publish: Arc<Mutex<bool>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail, as a dropped broker connection would.
    pub fn set_fail_publish(&self, fail: bool) {
        *self.fail_publish.lock() = fail;
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last message of a topic as JSON.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(last) => Ok(Some(serde_json::from_slice(&last.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
    }
}

impl Publisher for MockMqttClient {
    async fn publish_message(&self, topic: String, retain: bool, payload: Vec<u8>) -> Result<()> {
        if *self.fail_publish.lock() {
            anyhow::bail!("mock broker unavailable");
        }
        debug!("[mock] published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().push(MockMessage {
            topic,
            payload,
            retain,
        });
        Ok(())
    }
}
