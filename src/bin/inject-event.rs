//! wabridge Event Injection Utility
//!
//! Publishes synthetic sidecar events onto a session's events topic so a
//! running bridge can be exercised without a real chat connection.
//!
//! ## Usage
//!
//! ```bash
//! # Inbound text message
//! inject-event message --from "+62 812-3456" --text "halo"
//!
//! # Echo of our own message (the bridge drops it)
//! inject-event message --from 628123456 --text "ping" --from-me
//!
//! # Lifecycle events
//! inject-event qr --code "2@abc,def"
//! inject-event connected
//! inject-event disconnected --session-id support
//! inject-event logged-out
//! ```

use clap::{Parser, Subcommand};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, MqttOptions};
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;
use wabridge::protocol::{IdentifierNormalizer, InboundEvent, IncomingMessage, SidecarTopics};
use wabridge::transport::mqtt::connection::parse_broker_url;

#[derive(Parser)]
#[command(
    name = "inject-event",
    about = "Inject synthetic sidecar events into a running wabridge",
    long_about = "Publishes one InboundEvent as JSON to /{prefix}/{session}/events.\n\
                  Useful for driving the bridge without a WhatsApp connection."
)]
struct Args {
    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883", env = "WABRIDGE_BROKER_URL")]
    broker_url: String,

    /// Topic prefix shared with the bridge
    #[arg(long, default_value = "wabridge")]
    topic_prefix: String,

    /// Sidecar session id
    #[arg(long, default_value = "main")]
    session_id: String,

    #[command(subcommand)]
    event: EventArgs,
}

#[derive(Subcommand)]
enum EventArgs {
    /// Inbound text message
    Message {
        /// Sender phone number, any formatting
        #[arg(long)]
        from: String,
        #[arg(long)]
        text: String,
        /// Mark as sent by the bridge's own account
        #[arg(long)]
        from_me: bool,
    },
    /// New pairing code
    Qr {
        #[arg(long)]
        code: String,
    },
    Connected,
    Disconnected,
    LoggedOut,
}

impl EventArgs {
    fn into_event(self) -> Result<InboundEvent, Box<dyn std::error::Error>> {
        Ok(match self {
            EventArgs::Message {
                from,
                text,
                from_me,
            } => {
                let sender = IdentifierNormalizer::to_canonical_identifier(&from)?;
                let mut message = IncomingMessage::text(sender, text);
                message.is_from_me = from_me;
                message.message_id = Some(Uuid::new_v4().simple().to_string().to_uppercase());
                message.timestamp = Some(chrono::Utc::now());
                InboundEvent::MessageReceived(message)
            }
            EventArgs::Qr { code } => InboundEvent::QrIssued { code },
            EventArgs::Connected => InboundEvent::Connected,
            EventArgs::Disconnected => InboundEvent::Disconnected,
            EventArgs::LoggedOut => InboundEvent::LoggedOut,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let topics = SidecarTopics::new(&args.topic_prefix, &args.session_id)?;
    let event = args.event.into_event()?;
    let payload = serde_json::to_vec(&event)?;

    let (host, port, tls) = parse_broker_url(&args.broker_url)?;
    let client_id = format!("inject-event-{}", chrono::Utc::now().timestamp_millis());
    let mut options = MqttOptions::new(client_id, host.clone(), port);
    options.set_keep_alive(Duration::from_secs(30));
    if tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    println!("Connecting to MQTT broker {host}:{port}...");
    let connected = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;
    match connected {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("✗ Broker connection failed: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("✗ Timed out waiting for broker");
            std::process::exit(1);
        }
    }

    println!("\n📤 Injecting {} to {}", event.kind(), topics.events);
    client
        .publish(topics.events.clone(), QoS::AtLeastOnce, false, payload)
        .await?;

    // Drive the event loop until the PubAck arrives
    let acked = timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if !acked {
        eprintln!("✗ Broker did not acknowledge the event");
        std::process::exit(1);
    }
    println!("✓ Event injected successfully");

    client.disconnect().await?;
    sleep(Duration::from_millis(100)).await;
    Ok(())
}
