//! Sidecar transport client
//!
//! All network I/O for the MQTT sidecar lives here. A supervisor task owns the
//! rumqttc event loop: it (re)subscribes on every ConnAck, tracks the retained
//! device record, forwards events to the dispatcher and backs off between
//! reconnection attempts.

use super::connection::{
    configure_mqtt_options, parse_broker_url, LinkState, MqttError, ReconnectConfig, SidecarOptions,
};
use super::health_monitor::{LinkEvent, LinkMonitor, ReconnectionDecision};
use super::message_handler::{
    ControlCommand, EventForwarder, EventRoute, MessageHandler, OutboundText, PublishRoute,
};
use crate::observability::metrics;
use crate::protocol::{DeviceRecord, InboundEvent, Jid, SendReceipt, SidecarTopics};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;

struct Supervisor {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// State shared between the client handle and its supervisor task
struct LinkShared {
    topics: SidecarTopics,
    link_tx: watch::Sender<LinkState>,
    device_tx: watch::Sender<Option<DeviceRecord>>,
    forwarder: EventForwarder,
}

/// MQTT sidecar transport for one chat session
pub struct MqttClient {
    options: SidecarOptions,
    shared: Arc<LinkShared>,
    client: Mutex<Option<AsyncClient>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl MqttClient {
    pub fn new(options: SidecarOptions) -> Result<Self, MqttError> {
        parse_broker_url(&options.broker_url)?;
        let topics = SidecarTopics::new(&options.topic_prefix, &options.session_id)?;

        let (link_tx, _) = watch::channel(LinkState::Connecting);
        let (device_tx, _) = watch::channel(None);

        Ok(Self {
            options,
            shared: Arc::new(LinkShared {
                topics,
                link_tx,
                device_tx,
                forwarder: EventForwarder::new(),
            }),
            client: Mutex::new(None),
            supervisor: Mutex::new(None),
        })
    }

    pub fn topics(&self) -> &SidecarTopics {
        &self.shared.topics
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.link_tx.borrow().clone()
    }

    /// Start the supervisor unless it is already running
    async fn ensure_started(&self) -> Result<(), MqttError> {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(running) = supervisor.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }

        let mqtt_options = configure_mqtt_options(&self.options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        *self.client.lock().await = Some(client.clone());

        self.shared.link_tx.send_replace(LinkState::Connecting);
        metrics().mqtt_connection_attempt();

        let shutdown = CancellationToken::new();
        let span = crate::mqtt_span!(
            operation = "supervisor",
            session_id = %self.options.session_id
        );
        let handle = tokio::spawn(
            run_supervisor(
                Arc::clone(&self.shared),
                client,
                event_loop,
                self.options.reconnect.clone(),
                shutdown.clone(),
            )
            .instrument(span),
        );
        *supervisor = Some(Supervisor { handle, shutdown });

        info!(broker = %self.options.broker_url, "Started sidecar broker link");
        Ok(())
    }

    /// Stop the supervisor and close the broker link
    pub async fn shutdown(&self) {
        let supervisor = self.supervisor.lock().await.take();
        if let Some(Supervisor { handle, shutdown }) = supervisor {
            shutdown.cancel();
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Sidecar supervisor stopped"),
                Ok(Err(e)) => warn!(error = %e, "Sidecar supervisor ended with error"),
                Err(_) => warn!("Sidecar supervisor did not stop in time"),
            }
        }
        *self.client.lock().await = None;
        info!("Sidecar broker link closed");
    }

    async fn publish_json<P: Serialize>(&self, topic: &str, payload: &P) -> Result<(), MqttError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(MqttError::NotStarted)?;

        let state = self.link_state();
        if !LinkMonitor::can_publish(&state) {
            return Err(MqttError::NotConnected { state });
        }

        let payload = serde_json::to_vec(payload)?;
        match client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            Ok(()) => {
                metrics().mqtt_message_published();
                debug!(topic = %topic, "Published to sidecar");
                Ok(())
            }
            Err(source) => {
                metrics().mqtt_publish_failed();
                Err(MqttError::PublishFailed {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    async fn send_command(&self, command: ControlCommand) -> Result<(), MqttError> {
        let topic = self.shared.topics.control.clone();
        self.publish_json(&topic, &command).await
    }
}

/// Wait for the first ConnAck
async fn wait_for_link(
    mut link_rx: watch::Receiver<LinkState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let waited = tokio::time::timeout(timeout, async {
        loop {
            let state = link_rx.borrow_and_update().clone();
            match state {
                LinkState::Connected => return Ok(()),
                LinkState::Closed => {
                    return Err(MqttError::ConnectionFailed(
                        "Supervisor stopped before ConnAck".to_string(),
                    ))
                }
                _ => {}
            }
            if link_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailed(
                    "Link state channel closed".to_string(),
                ));
            }
        }
    })
    .await;

    match waited {
        Ok(result) => result,
        Err(_) => {
            let state = link_rx.borrow().clone();
            Err(MqttError::ConnectionFailed(format!(
                "ConnAck timeout - last link state: {state:?}"
            )))
        }
    }
}

/// Wait a bounded time for the retained device record
async fn wait_for_device(
    mut device_rx: watch::Receiver<Option<DeviceRecord>>,
    wait: Duration,
) -> Option<DeviceRecord> {
    tokio::time::timeout(wait, async {
        loop {
            let current = device_rx.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if device_rx.changed().await.is_err() {
                return None;
            }
        }
    })
    .await
    .ok()
    .flatten()
}

async fn run_supervisor(
    shared: Arc<LinkShared>,
    client: AsyncClient,
    mut event_loop: EventLoop,
    reconnect: ReconnectConfig,
    shutdown: CancellationToken,
) {
    let mut attempts = 0u32;
    let mut established = false;

    'supervisor: loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                flush_disconnect(&client, &mut event_loop).await;
                break 'supervisor;
            }
            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    if matches!(route, EventRoute::ConnectionAcknowledged) {
                        attempts = 0;
                        established = true;
                    }
                    handle_route(&shared, &client, route).await;
                }
                Err(e) => {
                    if established {
                        metrics().mqtt_connection_lost();
                    } else {
                        metrics().mqtt_connection_failed();
                    }
                    established = false;
                    shared.link_tx.send_replace(LinkMonitor::next_state(
                        LinkEvent::NetworkError(e.to_string()),
                    ));

                    let decision = LinkMonitor::reconnection_decision(
                        attempts,
                        &reconnect,
                        shutdown.is_cancelled(),
                    );
                    match decision {
                        ReconnectionDecision::Proceed { attempt, delay } => {
                            attempts = attempt;
                            shared.link_tx.send_replace(LinkMonitor::next_state(
                                LinkEvent::ReconnectionStarted(attempt),
                            ));
                            debug!(
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Reconnecting to broker"
                            );
                            tokio::select! {
                                _ = shutdown.cancelled() => break 'supervisor,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            metrics().mqtt_connection_attempt();
                        }
                        ReconnectionDecision::AbortShutdownRequested => break 'supervisor,
                    }
                }
            }
        }
    }

    shared
        .link_tx
        .send_replace(LinkMonitor::next_state(LinkEvent::ShutdownRequested));
    info!("Sidecar supervisor stopped");
}

async fn handle_route(shared: &LinkShared, client: &AsyncClient, route: EventRoute) {
    match route {
        EventRoute::ConnectionAcknowledged => {
            metrics().mqtt_connection_established();
            // try_subscribe: this task is the one draining the request channel
            for topic in MessageHandler::subscription_topics(&shared.topics) {
                if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                    warn!(topic = %topic, error = %e, "Failed to subscribe to sidecar topic");
                }
            }
            shared
                .link_tx
                .send_replace(LinkMonitor::next_state(LinkEvent::ConnAckReceived));
        }
        EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } => {
            metrics().mqtt_message_received();
            match MessageHandler::classify_publish(&shared.topics, &topic, &payload, retain) {
                PublishRoute::Event(event) => {
                    shared.forwarder.forward(event).await;
                }
                PublishRoute::Device(device) => {
                    debug!(paired = device.is_paired(), "Device record updated");
                    shared.device_tx.send_replace(Some(device));
                }
                PublishRoute::Ignored(reason) => {
                    debug!(topic = %topic, reason, "Ignoring sidecar publish");
                }
                PublishRoute::Malformed(error) => {
                    warn!(topic = %topic, error = %error, "Malformed sidecar publish");
                }
            }
        }
        EventRoute::Disconnected => {
            shared
                .link_tx
                .send_replace(LinkMonitor::next_state(LinkEvent::DisconnectedByBroker));
        }
        EventRoute::SubscriptionConfirmed { packet_id } => {
            debug!(packet_id, "Sidecar subscription confirmed");
        }
        EventRoute::InfrastructureEvent(_) | EventRoute::OutgoingEvent => {}
    }
}

/// Send DISCONNECT and let the event loop flush it, bounded
async fn flush_disconnect(client: &AsyncClient, event_loop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while event_loop.poll().await.is_ok() {}
    })
    .await;
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn bootstrap(&self) -> Result<DeviceRecord, MqttError> {
        self.ensure_started().await?;

        if let Err(e) =
            wait_for_link(self.shared.link_tx.subscribe(), self.options.connect_timeout).await
        {
            self.shutdown().await;
            return Err(e);
        }

        let device = wait_for_device(self.shared.device_tx.subscribe(), self.options.device_wait)
            .await
            .unwrap_or_default();
        info!(paired = device.is_paired(), "Sidecar session bootstrapped");
        Ok(device)
    }

    async fn connect(&self) -> Result<(), MqttError> {
        self.send_command(ControlCommand::Connect).await
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        self.send_command(ControlCommand::Disconnect).await
    }

    async fn send_text(&self, to: &Jid, text: &str) -> Result<SendReceipt, MqttError> {
        let outbound = OutboundText {
            id: Uuid::new_v4().simple().to_string().to_uppercase(),
            to: to.clone(),
            text: text.to_string(),
        };
        let topic = self.shared.topics.outbound.clone();
        self.publish_json(&topic, &outbound).await?;

        Ok(SendReceipt {
            id: outbound.id,
            timestamp: Utc::now(),
        })
    }

    fn registered_id(&self) -> Option<Jid> {
        self.shared
            .device_tx
            .borrow()
            .as_ref()
            .and_then(|device| device.id.clone())
    }

    async fn logout(&self) -> Result<(), MqttError> {
        self.send_command(ControlCommand::Logout).await
    }

    async fn delete_device(&self, device: &DeviceRecord) -> Result<(), MqttError> {
        self.send_command(ControlCommand::DeleteDevice {
            device: device.id.clone(),
        })
        .await?;
        self.shared
            .device_tx
            .send_replace(Some(DeviceRecord::default()));
        Ok(())
    }

    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        self.shared.forwarder.set_sender(sender);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async here; the supervisor flushes its own DISCONNECT once cancelled
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.shutdown.cancel();
        }
    }
}
