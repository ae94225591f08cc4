//! Trestle bridge entry point.
//!
//! Parses CLI arguments and environment variables, validates the runtime
//! configuration, initializes logging and metrics, and starts the servers
//! for the selected client transport.
//!
//! # Application Lifecycle
//!
//! 1. **Unknown** → Parse CLI args and initialize state
//! 2. **Initializing** → Build and validate configuration
//! 3. **StartingNetwork** → Bind listeners, install handlers
//! 4. **Ready** → Bridge is fully operational
//! 5. **Terminating** → Bridge is shutting down

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;
use trestle::config::{AuthOption, ClientTransport, Config, client_config_json};
use trestle::server::service::start;
use trestle::state::{ApplicationState, BridgeState};

/// CLI arguments definition for the Trestle bridge.
///
/// Field documentation is used by Clap to generate help text, so keep it
/// in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "trestle", version, about = "Trestle MCP bridge", long_about = None)]
struct Args {
    /// HTTP listen port
    #[arg(long = "port", value_name = "PORT", env = "MCP_PLUGIN_PORT", default_value_t = 8080)]
    port: u16,

    /// Per-call deadline for plugin dispatch, in milliseconds (0 = unbounded)
    #[arg(
        long = "plugin-timeout",
        value_name = "MS",
        env = "MCP_PLUGIN_CLIENT_TIMEOUT",
        default_value_t = 10_000
    )]
    plugin_timeout: u64,

    /// Transport for MCP client sessions
    #[arg(
        long = "client-transport",
        value_name = "TRANSPORT",
        env = "MCP_PLUGIN_CLIENT_TRANSPORT",
        value_enum,
        default_value_t = ClientTransport::StreamableHttp
    )]
    client_transport: ClientTransport,

    /// Shared secret for the bearer authentication scheme
    #[arg(long = "token", value_name = "TOKEN", env = "MCP_PLUGIN_TOKEN")]
    token: Option<String>,

    /// Authorization requirement; `required` selects multi-tenant remote mode
    #[arg(
        long = "authorization",
        value_name = "MODE",
        env = "MCP_PLUGIN_AUTH",
        value_enum,
        default_value_t = AuthOption::Auto
    )]
    authorization: AuthOption,

    /// Print the MCP client configuration JSON for this bridge and exit
    #[arg(long = "print-client-config", default_value_t = false)]
    print_client_config: bool,
}

/// Main entry point for the Trestle bridge.
///
/// # Returns
/// - `Ok(())` if the bridge starts and shuts down cleanly
/// - `Err(anyhow::Error)` on configuration or startup failure (non-zero exit)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = fmt::layer().with_target(false).compact();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::filter::EnvFilter::new(env_filter))
        .init();

    // Build and validate the runtime configuration
    let config = Config::build(
        args.port,
        args.plugin_timeout,
        args.client_transport,
        args.token,
        args.authorization,
    )?;

    if args.print_client_config {
        let command = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "trestle".to_string());
        let tree = client_config_json(&config, &command, None, None);
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    // Validate the configuration against the selected strategy as well
    let state = Arc::new(BridgeState::new(config));
    state.strategy.validate(&state.config)?;
    state.set_state(ApplicationState::Initializing);
    tracing::debug!("Early init completed");

    // Initialize metrics collection if enabled
    trestle::metrics::init();

    // Start the servers for the configured transport
    match start(state).await {
        Ok(_) => tracing::debug!("Server has exited"),
        Err(e) => {
            tracing::error!("Server execution failed: {:?}", e);
            return Err(e);
        }
    }

    Ok(())
}
