//! Newline-delimited response framing over any byte sink.

use std::io::{self, Write};

use serde_json::Value;

use crucible_protocol::{RpcErrorObject, RpcResponse};

/// Serialises responses as single-line JSON followed by a newline, flushing
/// after every write so clients blocked on a read make progress
/// immediately.
pub struct ProtocolWriter<W: Write> {
    sink: W,
}

impl<W: Write> ProtocolWriter<W> {
    /// Wraps `sink` as a response line sink.
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Writes a success envelope.
    ///
    /// # Errors
    /// Returns any I/O error from the underlying sink.
    pub fn write_success(&mut self, id: Option<Value>, result: Value) -> io::Result<()> {
        self.write_line(&RpcResponse::success(id, result))
    }

    /// Writes an error envelope.
    ///
    /// # Errors
    /// Returns any I/O error from the underlying sink.
    pub fn write_failure(&mut self, id: Option<Value>, error: RpcErrorObject) -> io::Result<()> {
        self.write_line(&RpcResponse::failure(id, error))
    }

    fn write_line(&mut self, response: &RpcResponse) -> io::Result<()> {
        let payload = serde_json::to_string(response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.sink.write_all(payload.as_bytes())?;
        self.sink.write_all(b"\n")?;
        self.sink.flush()
    }
}
