use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Inbound from the mobile app.
pub const FROM_CLIENT: &str = "FromAndroid";
/// Inbound from the relay microcontroller.
pub const FROM_ACTUATOR: &str = "FromArduino";
/// Outbound to the mobile app.
pub const TO_CLIENT: &str = "ToAndroid";
/// Outbound to the relay microcontroller.
pub const TO_ACTUATOR: &str = "ToArduino";

/// Sent to the actuator every time the hub (re)connects to the broker.
pub const GREETING: &str = "Hello from Server";

/// The two peers that talk to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    /// Relay microcontroller switching the outlets.
    Actuator,
    /// Mobile app.
    Client,
}

impl Peer {
    /// Which peer published on `topic`, if it is one of ours.
    pub fn from_inbound_topic(topic: &str) -> Option<Self> {
        match topic {
            FROM_ACTUATOR => Some(Self::Actuator),
            FROM_CLIENT => Some(Self::Client),
            _ => None,
        }
    }

    /// Topic the peer listens on.
    pub fn reply_topic(self) -> &'static str {
        match self {
            Self::Actuator => TO_ACTUATOR,
            Self::Client => TO_CLIENT,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("publish to {topic} failed: {reason}")]
pub struct TransportError {
    pub topic: String,
    pub reason: String,
}

/// Outbound half of the channel transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError>;
}

/// Never waits for room in the client's request queue. The event loop runs
/// in its own task and drains the queue, so a full queue means the link is
/// down and the command fails instead of stalling the control loop.
#[async_trait]
impl Publisher for AsyncClient {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), TransportError> {
        self.try_publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .map_err(|e| TransportError {
                topic: topic.to_string(),
                reason: match e {
                    ClientError::TryRequest(_) => "request queue full or closed".to_string(),
                    other => other.to_string(),
                },
            })
    }
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
}

#[async_trait]
impl Subscriber for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Subscribe to both inbound topics. Called on every ConnAck because the
/// broker session is not persistent.
pub async fn subscribe_inbound<C: Subscriber + ?Sized>(client: &C) -> Result<(), TransportError> {
    client.subscribe(FROM_CLIENT).await?;
    client.subscribe(FROM_ACTUATOR).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inbound side
// ---------------------------------------------------------------------------

/// What the event loop reports to the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
    Failed(String),
}

/// Drive the rumqttc event loop and forward what matters. Runs until the
/// receiving side goes away.
///
/// The channel is unbounded so this task never waits on the control loop;
/// it has to keep polling for queued publishes and keep-alives to go out.
pub async fn pump(mut eventloop: EventLoop, events: mpsc::UnboundedSender<LinkEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => LinkEvent::Message {
                topic: p.topic.clone(),
                payload: p.payload.to_vec(),
            },
            Ok(Event::Incoming(Packet::ConnAck(_))) => LinkEvent::Connected,
            Ok(Event::Incoming(Packet::Disconnect)) => LinkEvent::Disconnected,
            Ok(_) => continue,
            Err(e) => {
                if events.send(LinkEvent::Failed(e.to_string())).is_err() {
                    return;
                }
                sleep(Duration::from_secs(2)).await;
                continue;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
