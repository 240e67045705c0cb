//! Request framing shared by the stdio and socket transports.
//!
//! Both transports speak the same newline-delimited protocol: one JSON
//! request per line in, one JSON response per line out. Reads are bounded
//! so a client cannot grow a single line without limit.

mod listener;
mod stdio;

pub use listener::{ServerHandle, SocketServer, TransportError};
pub use stdio::run_stdio;

use std::io::{self, BufRead};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Upper bound on a single request line, in bytes.
pub(crate) const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Result of reading one request line from a transport.
pub(crate) enum ReadOutcome {
    /// A complete line, newline stripped.
    Line(String),
    /// The line exceeded [`MAX_REQUEST_BYTES`]; the excess was discarded
    /// up to the next newline.
    Oversized,
    /// The peer closed the stream.
    Eof,
}

/// Reads one newline-terminated request, enforcing the size bound.
///
/// Invalid UTF-8 is replaced rather than rejected so the parse stage can
/// still produce a protocol-level error for the client.
///
/// # Errors
/// Returns any I/O error from the reader other than `Interrupted`, which
/// is retried.
pub(crate) fn read_request_line<R: BufRead>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut collected: Vec<u8> = Vec::new();
    let mut oversized = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return if collected.is_empty() && !oversized {
                Ok(ReadOutcome::Eof)
            } else if oversized {
                Ok(ReadOutcome::Oversized)
            } else {
                Ok(ReadOutcome::Line(
                    String::from_utf8_lossy(&collected).into_owned(),
                ))
            };
        }

        let newline_at = available.iter().position(|&b| b == b'\n');
        let take = newline_at.map_or(available.len(), |at| at);

        if !oversized {
            if collected.len() + take > MAX_REQUEST_BYTES {
                oversized = true;
                collected.clear();
            } else {
                collected.extend_from_slice(&available[..take]);
            }
        }

        match newline_at {
            Some(at) => {
                reader.consume(at + 1);
                return if oversized {
                    Ok(ReadOutcome::Oversized)
                } else {
                    Ok(ReadOutcome::Line(
                        String::from_utf8_lossy(&collected).into_owned(),
                    ))
                };
            }
            None => reader.consume(take),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn reads_a_single_line_without_its_newline() {
        let mut reader = BufReader::new(&b"{\"a\": 1}\nrest"[..]);
        match read_request_line(&mut reader).expect("read") {
            ReadOutcome::Line(line) => assert_eq!(line, "{\"a\": 1}"),
            _ => panic!("expected a line"),
        }
    }

    #[test]
    fn empty_input_is_eof() {
        let mut reader = BufReader::new(&b""[..]);
        assert!(matches!(
            read_request_line(&mut reader).expect("read"),
            ReadOutcome::Eof
        ));
    }

    #[test]
    fn final_line_without_newline_is_returned() {
        let mut reader = BufReader::new(&b"tail"[..]);
        match read_request_line(&mut reader).expect("read") {
            ReadOutcome::Line(line) => assert_eq!(line, "tail"),
            _ => panic!("expected a line"),
        }
    }

    #[test]
    fn oversized_line_is_flagged_and_skipped() {
        let mut payload = vec![b'x'; MAX_REQUEST_BYTES + 10];
        payload.push(b'\n');
        payload.extend_from_slice(b"next\n");
        let mut reader = BufReader::new(&payload[..]);

        assert!(matches!(
            read_request_line(&mut reader).expect("read"),
            ReadOutcome::Oversized
        ));
        match read_request_line(&mut reader).expect("read") {
            ReadOutcome::Line(line) => assert_eq!(line, "next"),
            _ => panic!("expected the following line"),
        }
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut reader = BufReader::new(&b"\xff\xfe\n"[..]);
        match read_request_line(&mut reader).expect("read") {
            ReadOutcome::Line(line) => assert!(line.contains('\u{fffd}')),
            _ => panic!("expected a line"),
        }
    }
}
