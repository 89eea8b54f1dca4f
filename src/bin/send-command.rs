//! Command injection utility
//!
//! Publishes a single command to a running presence client.
//!
//! ## Usage
//!
//! ```bash
//! # Named command
//! send-command --command stop
//!
//! # Structured command with arguments
//! send-command --command locate --args '{"accuracy": "high"}'
//!
//! # Custom broker and topic
//! send-command --broker-url broker.local --broker-port 1883 \
//!   --topic devices/commands --command refresh
//! ```

use clap::Parser;
use mqtt_presence::protocol::{validate_topic, Command};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, MqttOptions};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "send-command",
    about = "Publish a command to mqtt-presence clients"
)]
struct Args {
    /// Command name
    #[arg(long, required = true)]
    command: String,

    /// Extra command fields as a JSON object
    #[arg(long)]
    args: Option<String>,

    /// Command topic
    #[arg(long, default_value = "clients/commands")]
    topic: String,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_url: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// Client ID (auto-generated if not provided)
    #[arg(long)]
    client_id: Option<String>,
}

fn build_payload(command: &str, args: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    let mut payload = json!({ "command": command });

    if let Some(args) = args {
        match serde_json::from_str::<Value>(args)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if key != "command" {
                        payload[key] = value;
                    }
                }
            }
            _ => return Err("--args must be a JSON object".into()),
        }
    }

    Ok(payload)
}

async fn send(args: &Args, payload: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
    let client_id = args
        .client_id
        .clone()
        .unwrap_or_else(|| format!("send-command-{}", Uuid::new_v4().simple()));

    let mut mqtt_options = MqttOptions::new(client_id, &args.broker_url, args.broker_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

    println!(
        "Connecting to MQTT broker {}:{}...",
        args.broker_url, args.broker_port
    );

    // Publish is queued until the event loop drives the connection
    client
        .publish(args.topic.clone(), QoS::AtLeastOnce, false, payload)
        .await?;

    let delivered = timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match delivered {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("MQTT eventloop error: {e}").into()),
        Err(_) => return Err("Timed out waiting for broker acknowledgement".into()),
    }

    client.disconnect().await?;
    // Let the DISCONNECT packet flush
    let _ = timeout(Duration::from_millis(500), eventloop.poll()).await;
    sleep(Duration::from_millis(100)).await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Err(e) = validate_topic(&args.topic) {
        eprintln!("✗ Invalid topic: {e}");
        std::process::exit(1);
    }

    let payload = match build_payload(&args.command, args.args.as_deref()) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("✗ Invalid command arguments: {e}");
            std::process::exit(1);
        }
    };
    let bytes = serde_json::to_vec(&payload)?;

    println!("\n📤 Sending command to {}", args.topic);
    match Command::decode(&bytes) {
        Command::Named(name) => println!("   Command: {name}"),
        other => println!("   Command: {other:?}"),
    }

    if let Err(e) = send(&args, bytes).await {
        eprintln!("✗ Failed to send command: {e}");
        std::process::exit(1);
    }

    println!("✓ Command delivered");
    Ok(())
}
