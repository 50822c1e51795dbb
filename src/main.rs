//! mtls-pubsub - Main Entry Point
//!
//! Connects to the broker with a client certificate, subscribes and/or
//! publishes on one topic, and releases the session on SIGINT or SIGTERM.

use clap::{Args, Parser, Subcommand};
use mtls_pubsub::config::{ClientSettings, ConfigError, SettingsOverrides};
use mtls_pubsub::error::SessionError;
use mtls_pubsub::observability::init_default_logging;
use mtls_pubsub::session::{LoggingObserver, SessionController};
use mtls_pubsub::shutdown::ShutdownTrigger;
use mtls_pubsub::transport::mqtt::MqttTransport;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// Settings file looked up when `--config` is not given
const DEFAULT_CONFIG_FILE: &str = "mtls-pubsub.toml";

/// MQTT client with mutual TLS authentication
#[derive(Parser)]
#[command(name = "mtls-pubsub")]
#[command(about = "Publish and subscribe over an mTLS-authenticated MQTT session")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the client until a termination signal (default)
    Run,
    /// Validate the effective configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[derive(Args)]
struct OverrideArgs {
    /// Broker host name
    #[arg(long, env = "MQTT_BROKER_FQDN", value_name = "HOST")]
    fqdn: Option<String>,

    /// Topic to subscribe and publish on
    #[arg(long, env = "MQTT_TOPIC")]
    topic: Option<String>,

    /// Authentication identity sent as the MQTT username
    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    /// Client identifier; reuse it to resume a session
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// Client certificate (PEM)
    #[arg(long, env = "MQTT_TLS_CERT_FILE", value_name = "FILE")]
    cert_file: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, env = "MQTT_TLS_KEY_FILE", value_name = "FILE")]
    key_file: Option<PathBuf>,

    /// Extra CA certificates for the broker (PEM)
    #[arg(long, env = "MQTT_TLS_CA_FILE", value_name = "FILE")]
    ca_file: Option<PathBuf>,

    /// Subscribe to the topic
    #[arg(long)]
    subscribe: bool,

    /// Publish to the topic
    #[arg(long, value_name = "BOOL")]
    publish: Option<bool>,

    /// Message text; each publish appends " #<n>!"
    #[arg(long)]
    message: Option<String>,

    /// QoS level for subscribe and publish (0, 1 or 2)
    #[arg(long)]
    qos: Option<u8>,

    /// Start a clean session instead of resuming
    #[arg(long)]
    clean_session: bool,

    /// Verify the broker chain but not its host name
    #[arg(long)]
    skip_hostname_verification: bool,

    /// First sequence number of published messages
    #[arg(long)]
    sequence_base: Option<u64>,

    /// Seconds between publishes
    #[arg(long)]
    interval_secs: Option<u64>,
}

impl From<OverrideArgs> for SettingsOverrides {
    fn from(args: OverrideArgs) -> Self {
        SettingsOverrides {
            fqdn: args.fqdn,
            topic: args.topic,
            username: args.username,
            client_id: args.client_id,
            cert_file: args.cert_file,
            key_file: args.key_file,
            ca_file: args.ca_file,
            skip_hostname_verification: args.skip_hostname_verification.then_some(true),
            clean_session: args.clean_session.then_some(true),
            qos: args.qos,
            subscribe: args.subscribe.then_some(true),
            publish: args.publish,
            message: args.message,
            sequence_base: args.sequence_base,
            interval_secs: args.interval_secs,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting mtls-pubsub v{}", env!("CARGO_PKG_VERSION"));

    let settings = match load_settings(cli.config.as_deref(), cli.overrides.into()) {
        Ok(settings) => settings,
        Err(e) => {
            let e = SessionError::from(e);
            error!("Failed to load configuration: {}", e);
            process::exit(e.exit_code());
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_client(settings).await,
        Commands::Config { show } => handle_config_command(&settings, show),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(e.exit_code());
    }

    info!("Done");
}

fn load_settings(
    config_path: Option<&Path>,
    overrides: SettingsOverrides,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientSettings::load_from_file(path)?
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_FILE);
            ClientSettings::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => ClientSettings::default(),
    };

    settings.apply_overrides(overrides);
    Ok(settings)
}

async fn run_client(settings: ClientSettings) -> Result<(), SessionError> {
    settings.validate()?;

    let plan = settings.run_plan()?;
    let security = settings.security_context()?;
    let config = settings.session_config(security, Arc::new(LoggingObserver))?;

    let trigger = ShutdownTrigger::install().map_err(SessionError::Signal)?;

    let mut controller = SessionController::new(config, MqttTransport::new())
        .with_policy(settings.operation_policy());

    controller
        .run(&plan, async {
            trigger.wait().await;
        })
        .await
}

fn handle_config_command(settings: &ClientSettings, show: bool) -> Result<(), SessionError> {
    settings.validate()?;

    if show {
        let rendered = toml::to_string_pretty(settings)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        println!("Effective configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
