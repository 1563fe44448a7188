//! Message publishing utility
//!
//! Publishes test messages to a topic through the pooled topic client, handy
//! for triggering functions run by `mqtt-bindings-host`.
//!
//! ## Usage
//!
//! ```bash
//! # Simple text message
//! publish-message --topic sensors/temperature --message "21.5"
//!
//! # Several copies, retained, QoS 1
//! publish-message --topic commands/reset --message '{"all":true}' \
//!   --count 3 --qos 1 --retain
//!
//! # TLS broker with credentials from the environment
//! MQTT_USER=me MQTT_PASS=secret publish-message --broker-url broker.example.com \
//!   --broker-port 8883 --tls --topic a/b --message hi
//! ```

use clap::Parser;
use mqtt_bindings::observability::init_default_logging;
use mqtt_bindings::{ClientOptions, ClientPool, MessageCollector, MqttMessage, QoS};
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "publish-message",
    about = "Publish test messages to an MQTT topic"
)]
struct Args {
    /// Destination topic
    #[arg(long, required = true)]
    topic: String,

    /// Payload text
    #[arg(long, required = true)]
    message: String,

    /// Number of copies to publish in one batch
    #[arg(long, default_value = "1")]
    count: usize,

    /// Quality of service level (0, 1 or 2)
    #[arg(long, default_value = "0")]
    qos: u8,

    /// Set the retain flag
    #[arg(long)]
    retain: bool,

    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_url: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// Username
    #[arg(long, env = "MQTT_USER")]
    username: Option<String>,

    /// Password
    #[arg(long, env = "MQTT_PASS", hide_env_values = true)]
    password: Option<String>,
}

#[tokio::main]
async fn main() {
    init_default_logging();
    let args = Args::parse();

    if let Err(e) = publish(args).await {
        error!("Publish failed: {}", e);
        process::exit(1);
    }
}

async fn publish(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(args.qos)?;

    let mut options = ClientOptions::new(&args.broker_url, args.broker_port).with_tls(args.tls);
    if let Some(username) = args.username {
        options = options.with_credentials(username, args.password.unwrap_or_default());
    }

    let pool = ClientPool::new(options);
    let client = pool.get_or_create_client(&args.topic)?;
    let mut collector = MessageCollector::new(client, &args.topic)?;

    for _ in 0..args.count {
        collector.add(
            MqttMessage::from(args.message.as_str())
                .with_qos(qos)
                .with_retain(args.retain),
        )?;
    }

    let sent = collector.len();
    let result = collector.flush().await;
    pool.close_all().await;
    result?;

    info!(topic = %args.topic, messages = sent, "Published");
    Ok(())
}
