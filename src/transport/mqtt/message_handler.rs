//! Sidecar wire handling
//!
//! Pure routing of broker events and the JSON shapes exchanged with the
//! sidecar, plus the forwarder that hands parsed events to the dispatcher.

use crate::protocol::{DeviceRecord, InboundEvent, Jid, SidecarTopics};
use rumqttc::v5::Event;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound text command published on the `outbound` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundText {
    /// Receipt id assigned by the bridge
    pub id: String,
    /// Canonical identifier of the recipient
    pub to: Jid,
    pub text: String,
}

/// Session command published on the `control` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Connect,
    Disconnect,
    Logout,
    DeleteDevice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<Jid>,
    },
}

/// Broker-level routing decision
#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed { packet_id: u16 },
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Meaning of a publish received from the sidecar
#[derive(Debug, Clone, PartialEq)]
pub enum PublishRoute {
    Event(InboundEvent),
    Device(DeviceRecord),
    Ignored(&'static str),
    Malformed(String),
}

pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        use rumqttc::v5::mqttbytes::v5::Packet;

        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify a publish by topic
    ///
    /// Retained event messages are replays from an earlier session and are
    /// ignored. The device topic is read whether retained or not; an empty
    /// payload there means the device record was cleared.
    pub fn classify_publish(
        topics: &SidecarTopics,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> PublishRoute {
        if topic == topics.events {
            if retain {
                return PublishRoute::Ignored("retained event");
            }
            return match serde_json::from_slice::<InboundEvent>(payload) {
                Ok(event) => PublishRoute::Event(event),
                Err(e) => PublishRoute::Malformed(format!("Failed to parse event: {e}")),
            };
        }

        if topic == topics.device {
            if payload.is_empty() {
                return PublishRoute::Device(DeviceRecord::default());
            }
            return match serde_json::from_slice::<DeviceRecord>(payload) {
                Ok(device) => PublishRoute::Device(device),
                Err(e) => PublishRoute::Malformed(format!("Failed to parse device record: {e}")),
            };
        }

        PublishRoute::Ignored("unexpected topic")
    }

    pub fn subscription_topics(topics: &SidecarTopics) -> [&str; 2] {
        [topics.events.as_str(), topics.device.as_str()]
    }
}

/// Hands parsed events to the dispatcher channel
#[derive(Default)]
pub struct EventForwarder {
    sender: Mutex<Option<mpsc::Sender<InboundEvent>>>,
}

impl EventForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        let mut slot = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(sender);
    }

    /// Forward an event; false when it was dropped
    pub async fn forward(&self, event: InboundEvent) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match sender {
            Some(sender) => {
                debug!(event = event.kind(), "Forwarding sidecar event");
                if sender.send(event).await.is_err() {
                    warn!("Event channel closed, sidecar event dropped");
                    return false;
                }
                true
            }
            None => {
                warn!(
                    event = event.kind(),
                    "No event sender configured, sidecar event dropped"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet, Publish};
    use rumqttc::v5::mqttbytes::QoS;
    use serde_json::json;

    fn topics() -> SidecarTopics {
        SidecarTopics::new("wabridge", "main").unwrap()
    }

    #[test]
    fn test_route_connack_and_publish() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: Bytes::from("/wabridge/main/device"),
            pkid: 1,
            payload: Bytes::from("{}"),
            properties: None,
        }));
        match MessageHandler::route_mqtt_event(&publish) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "/wabridge/main/device");
                assert_eq!(payload, b"{}");
                assert!(retain);
            }
            other => panic!("expected publish route, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_event() {
        let topics = topics();
        let payload = json!({
            "type": "message_received",
            "sender": "628123@s.whatsapp.net",
            "payload": {"kind": "plain_text", "conversation": "halo"}
        })
        .to_string();

        match MessageHandler::classify_publish(&topics, &topics.events, payload.as_bytes(), false)
        {
            PublishRoute::Event(InboundEvent::MessageReceived(message)) => {
                assert_eq!(message.sender, Jid::user("628123"));
                assert!(!message.is_from_me);
            }
            other => panic!("expected message event, got {other:?}"),
        }

        assert_eq!(
            MessageHandler::classify_publish(
                &topics,
                &topics.events,
                br#"{"type":"connected"}"#,
                false
            ),
            PublishRoute::Event(InboundEvent::Connected)
        );
    }

    #[test]
    fn test_retained_events_are_ignored() {
        let topics = topics();
        assert_eq!(
            MessageHandler::classify_publish(
                &topics,
                &topics.events,
                br#"{"type":"connected"}"#,
                true
            ),
            PublishRoute::Ignored("retained event")
        );
    }

    #[test]
    fn test_classify_device_record() {
        let topics = topics();
        assert_eq!(
            MessageHandler::classify_publish(
                &topics,
                &topics.device,
                br#"{"id":"628999:3@s.whatsapp.net"}"#,
                true
            ),
            PublishRoute::Device(DeviceRecord::paired(
                "628999:3@s.whatsapp.net".parse().unwrap()
            ))
        );
        assert_eq!(
            MessageHandler::classify_publish(&topics, &topics.device, b"", true),
            PublishRoute::Device(DeviceRecord::default())
        );
    }

    #[test]
    fn test_malformed_and_foreign_topics() {
        let topics = topics();
        assert!(matches!(
            MessageHandler::classify_publish(&topics, &topics.events, b"not json", false),
            PublishRoute::Malformed(_)
        ));
        assert_eq!(
            MessageHandler::classify_publish(&topics, "/elsewhere", b"{}", false),
            PublishRoute::Ignored("unexpected topic")
        );
    }

    #[test]
    fn test_command_wire_shapes() {
        assert_eq!(
            serde_json::to_value(ControlCommand::Connect).unwrap(),
            json!({"command": "connect"})
        );
        assert_eq!(
            serde_json::to_value(ControlCommand::DeleteDevice { device: None }).unwrap(),
            json!({"command": "delete_device"})
        );

        let outbound = OutboundText {
            id: "3EB0".into(),
            to: Jid::user("628123"),
            text: "halo".into(),
        };
        assert_eq!(
            serde_json::to_value(&outbound).unwrap(),
            json!({"id": "3EB0", "to": "628123@s.whatsapp.net", "text": "halo"})
        );
    }

    #[tokio::test]
    async fn test_forwarder_without_sender_drops() {
        let forwarder = EventForwarder::new();
        assert!(!forwarder.forward(InboundEvent::Connected).await);

        let (tx, mut rx) = mpsc::channel(1);
        forwarder.set_sender(tx);
        assert!(forwarder.forward(InboundEvent::Connected).await);
        assert_eq!(rx.recv().await, Some(InboundEvent::Connected));
    }
}
