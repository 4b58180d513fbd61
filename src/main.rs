//! telemetry-relay: a single-client telemetry sink
//!
//! Waits for one sensor to connect, then:
//! - relays operator commands (`start`, `stop`, `exit`) typed on stdin
//! - appends every JSON reading the sensor sends to a log file, stamped with
//!   the server's receipt time
//!
//! When the sensor disconnects (or the operator exits) the server goes back
//! to waiting for the next connection. Configuration via CLI arguments or
//! TOML file.

mod command;
mod config;
mod framing;
mod operator;
mod record;
mod server;
mod session;
mod storage;

use config::Config;
use operator::OperatorInput;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging; stdout is reserved for the operator prompt
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(
        listen = %config.listen,
        output = %config.output.display(),
        read_buffer_size = config.read_buffer_size,
        framing = ?config.framing,
        "Starting telemetry-relay server"
    );

    let server = Server::new(config, OperatorInput::stdin())?;
    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }
    Ok(())
}
