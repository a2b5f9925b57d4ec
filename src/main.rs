use std::process::ExitCode;

use ferrodis::server::{Server, ServerOptions};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Binary entry point: parse flags, install the log subscriber, serve until
/// SHUTDOWN.
#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = match ServerOptions::from_args(std::env::args()) {
        Ok(options) => options,
        Err(e) => {
            error!("invalid arguments: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match Server::new(options).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
