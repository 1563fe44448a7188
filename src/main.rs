//! MQTT bindings host - Main Entry Point
//!
//! Runs the functions declared in the host configuration: each function is
//! triggered by its topic and, when an output topic is set, echoes the
//! payload there.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use mqtt_bindings::config::HostConfig;
use mqtt_bindings::observability::{init_default_logging, metrics};
use mqtt_bindings::{
    FunctionResult, Listener, MqttExtension, TriggerBinding, TriggeredFunctionData,
    TriggeredFunctionExecutor,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Host process for MQTT-triggered functions
#[derive(Parser)]
#[command(name = "mqtt-bindings-host")]
#[command(about = "Run functions triggered by MQTT topics")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listeners for every configured function
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting MQTT bindings host v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_host(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Host shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<HostConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(HostConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["host.toml", "config/host.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(HostConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create host.toml"
                .into())
        }
    }
}

async fn run_host(config: HostConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.functions.is_empty() {
        warn!("No functions configured; the host will idle until shutdown");
    }

    let options = config.mqtt.client_options()?;
    let extension = Arc::new(MqttExtension::new(options));

    let listeners = start_listeners(&config, &extension).await;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(
        listeners = listeners.len(),
        "Host is running and waiting for MQTT messages..."
    );

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    for listener in &listeners {
        if let Err(e) = listener.stop() {
            debug!(topic = %listener.topic(), "Listener stop skipped: {}", e);
        }
        listener.dispose();
    }
    extension.shutdown().await;

    let snapshot = metrics().get_metrics();
    info!(
        received = snapshot.mqtt.messages_received,
        published = snapshot.mqtt.messages_published,
        dispatched = snapshot.dispatch.messages_dispatched,
        failed = snapshot.dispatch.dispatch_failures,
        "Final host metrics"
    );

    Ok(())
}

/// Start one listener per function; a function that fails to start is
/// logged and skipped
async fn start_listeners(config: &HostConfig, extension: &Arc<MqttExtension>) -> Vec<Listener> {
    let mut listeners = Vec::with_capacity(config.functions.len());

    for function in &config.functions {
        let binding = match extension.trigger_binding_for(function) {
            Ok(binding) => binding,
            Err(e) => {
                error!(function = %function.name, "Invalid trigger binding: {}", e);
                continue;
            }
        };

        let executor = Arc::new(EchoExecutor {
            name: function.name.clone(),
            binding: binding.clone(),
            extension: extension.clone(),
            output_topic: function.output_topic.clone(),
        });

        let listener = match extension.create_listener(&binding, executor) {
            Ok(listener) => listener,
            Err(e) => {
                error!(function = %function.name, "Failed to create listener: {}", e);
                continue;
            }
        };

        match listener.start().await {
            Ok(()) => {
                info!(
                    function = %function.name,
                    topic = %binding.topic(),
                    shape = %binding.shape(),
                    "Function listening"
                );
                listeners.push(listener);
            }
            Err(e) => {
                error!(function = %function.name, "Failed to start listener: {}", e);
            }
        }
    }

    listeners
}

/// Sample function: binds the trigger and republishes its payload
struct EchoExecutor {
    name: String,
    binding: TriggerBinding,
    extension: Arc<MqttExtension>,
    output_topic: Option<String>,
}

#[async_trait]
impl TriggeredFunctionExecutor for EchoExecutor {
    async fn try_execute(
        &self,
        input: TriggeredFunctionData,
        cancel: CancellationToken,
    ) -> FunctionResult {
        let payload = input.trigger_value.payload.clone();
        let data = match self.binding.bind(input.trigger_value) {
            Ok(data) => data,
            Err(e) => return FunctionResult::failure(e),
        };

        info!(
            function = %self.name,
            argument = %data.invoke_string,
            topic = %data.binding_data.topic,
            qos = data.binding_data.quality_of_service_level,
            retain = data.binding_data.retain,
            "Function triggered"
        );

        let Some(output_topic) = &self.output_topic else {
            return FunctionResult::success();
        };

        if cancel.is_cancelled() {
            debug!(function = %self.name, "Skipping output, listener is stopping");
            return FunctionResult::success();
        }

        let mut collector = match self.extension.collector(output_topic) {
            Ok(collector) => collector,
            Err(e) => return FunctionResult::failure(e),
        };
        if let Err(e) = collector.add_bytes(payload) {
            return FunctionResult::failure(e);
        }

        match collector.flush().await {
            Ok(()) => FunctionResult::success(),
            Err(e) => FunctionResult::failure(e),
        }
    }
}

fn handle_config_command(
    config: &HostConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    if show {
        println!("Current host configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    for function in &config.functions {
        TriggerBinding::from_declared(function.trigger_topic.clone(), &function.data_type)?;
    }

    info!(
        functions = config.functions.len(),
        "Configuration validation complete"
    );
    Ok(())
}
