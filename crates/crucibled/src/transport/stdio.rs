//! Single-client transport over the process's standard streams.

use std::io::{self, BufReader};

use tracing::{info, warn};

use super::{read_request_line, ReadOutcome, TRANSPORT_TARGET};
use crate::dispatch::{DispatchError, Dispatcher, ProtocolWriter};

/// Serves requests from stdin until it closes, writing responses to
/// stdout. Blank lines are skipped without a response.
///
/// # Errors
/// Returns any I/O error from the standard streams.
pub fn run_stdio(dispatcher: &Dispatcher) -> io::Result<()> {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = ProtocolWriter::new(io::stdout().lock());

    info!(target: TRANSPORT_TARGET, "serving on standard streams");

    loop {
        match read_request_line(&mut reader)? {
            ReadOutcome::Eof => break,
            ReadOutcome::Oversized => {
                warn!(target: TRANSPORT_TARGET, "request line exceeded size bound");
                let error = DispatchError::Parse("request line too long".to_owned());
                writer.write_failure(None, error.to_error_object())?;
            }
            ReadOutcome::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatcher.dispatch_line(&line, &mut writer)?;
            }
        }
    }

    info!(target: TRANSPORT_TARGET, "standard input closed, shutting down");
    Ok(())
}
