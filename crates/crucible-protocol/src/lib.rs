//! Wire types for the crucible JSON-RPC protocol.
//!
//! The daemon speaks newline-delimited JSON-RPC 2.0: one request object per
//! line in, one response object per line out. This crate holds the shared
//! envelope and result payload types so the daemon and any future client
//! agree on the schema. It deliberately contains no IO: framing and
//! validation live in the daemon.

mod envelope;
mod report;

pub use envelope::{RpcErrorObject, RpcResponse, code};
pub use report::{
    ExecuteError, ExecuteReport, ExecuteTiming, InterruptReport, Marker, MemoryReading,
    PingReport, ResetReport, StateReport,
};

/// The only protocol version the daemon accepts.
pub const PROTOCOL_VERSION: &str = "2.0";
