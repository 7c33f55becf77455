mod monitor_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use relay_config::RelayConfig;

const DEFAULT_URL: &str = "http://127.0.0.1:3000";

#[derive(Parser)]
#[command(name = "relay", about = "relay: single-session WhatsApp messaging gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (relay.toml / .yaml / .json). Discovered when omitted.
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server and the WhatsApp session.
    Gateway {
        #[arg(long, env = "RELAY_BIND")]
        bind: Option<String>,
        #[arg(long, env = "RELAY_PORT")]
        port: Option<u16>,
    },
    /// Print the health of a running gateway.
    Health {
        #[arg(long, env = "RELAY_URL", default_value = DEFAULT_URL)]
        url: String,
    },
    /// Send a test message through a running gateway.
    TestSend {
        #[arg(long, env = "RELAY_URL", default_value = DEFAULT_URL)]
        url: String,
        /// Recipient, 10-15 digits including the country code.
        #[arg(long)]
        phone: String,
        #[arg(short, long, default_value = "Test message from relay")]
        message: String,
    },
    /// Delete the stored session and the provider cache. The next start
    /// asks for a fresh pairing.
    Cleanup,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Log panics through tracing. A panicking task is lost but the process
/// keeps serving.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(location, panic = %info, "unhandled panic");
    }));
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    match path {
        Some(path) => relay_config::load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(relay_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);
    install_panic_hook();

    match cli.command {
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "relay starting");
            let config = load_config(cli.config.as_deref())?;
            let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
            let port = port.unwrap_or(config.gateway.port);
            relay_gateway::start_gateway(config, &bind, port).await
        },
        Commands::Health { url } => monitor_commands::health(&url).await,
        Commands::TestSend {
            url,
            phone,
            message,
        } => monitor_commands::test_send(&url, &phone, &message).await,
        Commands::Cleanup => {
            let config = load_config(cli.config.as_deref())?;
            monitor_commands::cleanup(&config).await
        },
    }
}
