//! The crucible daemon: a persistent script-execution JSON-RPC service.
//!
//! The daemon accepts newline-delimited JSON-RPC 2.0 requests over standard
//! input or a Unix domain socket and executes submitted code against a
//! long-lived [`Session`]. Variables persist across `execute` calls until an
//! explicit `reset`.  Captured output is post-processed into a typed marker
//! stream (`[TYPE] content` / `[TYPE:SUBTYPE] content` annotations) before
//! being returned to the client.
//!
//! Module map:
//! - [`markers`] — pure extraction of bracketed annotations from text.
//! - [`probe`] — best-effort process memory readings.
//! - [`session`] — the mutable execution context and its lifecycle.
//! - [`engine`] — one unit of execution under a deadline, with scoped
//!   output capture and outcome classification.
//! - [`dispatch`] — request validation, method routing, response framing.
//! - [`transport`] — the stdin loop and the Unix socket accept loop.
//!
//! Diagnostics always go to stderr via `tracing`; the protocol sink (stdout
//! or the accepted connection) carries nothing but response lines.

pub mod dispatch;
pub mod engine;
mod launch;
pub mod markers;
pub mod probe;
pub mod session;
mod shutdown;
mod telemetry;
pub mod transport;

pub use dispatch::{DispatchError, Dispatcher, Method, ProtocolWriter};
pub use engine::ExecutionResult;
pub use launch::{LaunchError, run};
pub use session::Session;
pub use shutdown::ShutdownError;
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{ServerHandle, SocketServer, TransportError};
