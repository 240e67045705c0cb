//! Process entry: configuration, telemetry, then the selected transport.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crucible_config::{Config, LaunchMode};

use crate::dispatch::Dispatcher;
use crate::session::Session;
use crate::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
use crate::telemetry::{self, TelemetryError};
use crate::transport::{self, SocketServer, TransportError};

const LAUNCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launch");

/// Errors that terminate the process during startup or serving.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Telemetry could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The socket transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Waiting for a shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The stdio transport failed.
    #[error("standard stream transport failed: {0}")]
    Stdio(#[from] std::io::Error),
}

/// Runs the service to completion.
///
/// Stdio mode serves until stdin closes. Socket mode serves until SIGTERM
/// or SIGINT arrives, then stops the listener and removes the socket file.
///
/// # Errors
/// Returns a [`LaunchError`] describing the first fatal failure.
pub fn run() -> Result<(), LaunchError> {
    let config = Config::load();
    let _telemetry = telemetry::initialise(&config)?;

    info!(
        target: LAUNCH_TARGET,
        mode = %config.mode(),
        "service starting"
    );

    let session = Arc::new(Session::new());
    let dispatcher = Dispatcher::new(session);

    match config.mode() {
        LaunchMode::Stdio => transport::run_stdio(&dispatcher)?,
        LaunchMode::Socket { path } => {
            let server = SocketServer::bind(path)?;
            let handle = server.start(Arc::new(dispatcher))?;
            SystemShutdownSignal.wait()?;
            handle.shutdown();
            handle.join()?;
        }
    }

    info!(target: LAUNCH_TARGET, "service stopped");
    Ok(())
}
