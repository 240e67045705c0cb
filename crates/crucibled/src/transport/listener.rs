//! Unix socket transport.
//!
//! The listener accepts on a background thread in non-blocking mode so
//! shutdown requests are observed promptly. Each connection is served on
//! its own thread: a client blocked mid-read must never pin the accept
//! loop, or shutdown would hang behind it. The session serialises
//! executions under its lock, so concurrent connections still observe a
//! single ordered stream of requests.

use std::fs;
use std::io::{self, BufReader};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{read_request_line, ReadOutcome, TRANSPORT_TARGET};
use crate::dispatch::{DispatchError, Dispatcher, ProtocolWriter};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors raised while binding or running the socket transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket path exists but is not a socket.
    #[error("path '{path}' exists and is not a socket")]
    NotSocket {
        /// Offending path.
        path: String,
    },
    /// Another process is already serving on the socket path.
    #[error("socket '{path}' is already in use")]
    InUse {
        /// Offending path.
        path: String,
    },
    /// Inspecting or removing a stale socket file failed.
    #[error("failed to clear stale socket '{path}': {source}")]
    StaleCleanup {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// Binding the listener failed.
    #[error("failed to bind socket '{path}': {source}")]
    Bind {
        /// Offending path.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to configure listener: {source}")]
    NonBlocking {
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}

/// Bound Unix socket listener, not yet accepting.
#[derive(Debug)]
pub struct SocketServer {
    listener: UnixListener,
    path: PathBuf,
}

impl SocketServer {
    /// Binds the socket path, clearing a stale socket file left by a
    /// previous instance. A live socket another process still answers on
    /// is refused.
    ///
    /// # Errors
    /// Returns a [`TransportError`] describing the bind failure.
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        if path.exists() {
            clear_stale_socket(path)?;
        }
        let listener = UnixListener::bind(path).map_err(|source| TransportError::Bind {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Starts the accept loop on a background thread.
    ///
    /// # Errors
    /// Returns [`TransportError::NonBlocking`] when the listener cannot be
    /// switched to non-blocking mode.
    pub fn start(self, dispatcher: Arc<Dispatcher>) -> Result<ServerHandle, TransportError> {
        if let Err(source) = self.listener.set_nonblocking(true) {
            remove_socket_file(&self.path);
            return Err(TransportError::NonBlocking { source });
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || accept_loop(&self, &shutdown_flag, &dispatcher));
        Ok(ServerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background accept thread.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Signals the accept loop to stop at its next poll. Connections
    /// already being served run to completion on their own threads.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept thread to exit.
    ///
    /// # Errors
    /// Returns [`TransportError::ThreadPanic`] when the thread panicked.
    pub fn join(mut self) -> Result<(), TransportError> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| TransportError::ThreadPanic)
        } else {
            Ok(())
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn accept_loop(server: &SocketServer, shutdown: &AtomicBool, dispatcher: &Arc<Dispatcher>) {
    info!(
        target: TRANSPORT_TARGET,
        path = %server.path.display(),
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match server.listener.accept() {
            Ok((stream, _)) => {
                last_error = None;
                let dispatcher = Arc::clone(dispatcher);
                thread::spawn(move || {
                    if let Err(error) = serve_connection(stream, &dispatcher) {
                        warn!(
                            target: TRANSPORT_TARGET,
                            error = %error,
                            "connection ended with an error"
                        );
                    }
                });
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    remove_socket_file(&server.path);
    info!(target: TRANSPORT_TARGET, "socket listener stopped");
}

fn serve_connection(stream: UnixStream, dispatcher: &Dispatcher) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let reading_half = stream.try_clone()?;
    let mut reader = BufReader::new(reading_half);
    let mut writer = ProtocolWriter::new(stream);

    loop {
        match read_request_line(&mut reader)? {
            ReadOutcome::Eof => return Ok(()),
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
}

fn clear_stale_socket(path: &Path) -> Result<(), TransportError> {
    let metadata = fs::symlink_metadata(path).map_err(|source| TransportError::StaleCleanup {
        path: path.display().to_string(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(TransportError::NotSocket {
            path: path.display().to_string(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(TransportError::InUse {
            path: path.display().to_string(),
        }),
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| TransportError::StaleCleanup {
                path: path.display().to_string(),
                source,
            })
        }
        Err(error) => Err(TransportError::StaleCleanup {
            path: path.display().to_string(),
            source: error,
        }),
    }
}

fn remove_socket_file(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            warn!(
                target: TRANSPORT_TARGET,
                error = %error,
                path = %path.display(),
                "failed to remove socket file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use serde_json::Value;
    use std::io::{BufRead, Write};

    fn start_server(path: &Path) -> ServerHandle {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(Session::new())));
        SocketServer::bind(path)
            .expect("bind server")
            .start(dispatcher)
            .expect("start server")
    }

    fn request(stream: &mut UnixStream, line: &str) -> Value {
        stream.write_all(line.as_bytes()).expect("send");
        stream.write_all(b"\n").expect("send newline");
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut response = String::new();
        reader.read_line(&mut response).expect("read response");
        serde_json::from_str(&response).expect("response is JSON")
    }

    #[test]
    fn ping_round_trips_over_the_socket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let handle = start_server(&path);

        let mut stream = UnixStream::connect(&path).expect("connect");
        let response = request(&mut stream, r#"{"jsonrpc": "2.0", "method": "ping", "id": 1}"#);
        assert_eq!(response["result"]["status"], "ok");

        handle.shutdown();
        handle.join().expect("join listener");
    }

    #[test]
    fn state_persists_across_connections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let handle = start_server(&path);

        {
            let mut first = UnixStream::connect(&path).expect("connect");
            let response = request(
                &mut first,
                r#"{"jsonrpc": "2.0", "method": "execute", "params": {"code": "let kept = 7;"}, "id": 1}"#,
            );
            assert_eq!(response["result"]["success"], true);
        }

        let mut second = UnixStream::connect(&path).expect("connect again");
        let state = request(&mut second, r#"{"jsonrpc": "2.0", "method": "get_state", "id": 2}"#);
        assert_eq!(state["result"]["variables"][0], "kept");

        handle.shutdown();
        handle.join().expect("join listener");
    }

    #[test]
    fn stale_socket_file_is_cleared_on_bind() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        {
            let _stale = UnixListener::bind(&path).expect("bind stale listener");
        }
        assert!(path.exists(), "stale socket should remain");

        let handle = start_server(&path);
        let mut stream = UnixStream::connect(&path).expect("connect");
        let response = request(&mut stream, r#"{"jsonrpc": "2.0", "method": "ping", "id": 1}"#);
        assert_eq!(response["result"]["status"], "ok");

        handle.shutdown();
        handle.join().expect("join listener");
    }

    #[test]
    fn live_socket_is_refused() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing listener");

        let error = SocketServer::bind(&path).expect_err("bind should fail");
        assert!(matches!(error, TransportError::InUse { .. }));
    }

    #[test]
    fn shutdown_completes_while_a_client_holds_its_connection_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let handle = start_server(&path);

        // Idle client: connected, mid-protocol, never sending another line.
        let mut stream = UnixStream::connect(&path).expect("connect");
        let response = request(&mut stream, r#"{"jsonrpc": "2.0", "method": "ping", "id": 1}"#);
        assert_eq!(response["result"]["status"], "ok");

        handle.shutdown();
        handle.join().expect("join must not wait on the open connection");
        assert!(!path.exists(), "socket file should be removed");
    }

    #[test]
    fn oversized_line_reports_an_error_and_keeps_the_connection() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let handle = start_server(&path);

        let mut stream = UnixStream::connect(&path).expect("connect");
        let mut oversized = vec![b'x'; super::super::MAX_REQUEST_BYTES + 1];
        oversized.push(b'\n');
        stream.write_all(&oversized).expect("send oversized line");

        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut response = String::new();
        reader.read_line(&mut response).expect("read response");
        let parsed: Value = serde_json::from_str(&response).expect("response is JSON");
        assert_eq!(parsed["error"]["code"], -32700);

        let ping = request(&mut stream, r#"{"jsonrpc": "2.0", "method": "ping", "id": 2}"#);
        assert_eq!(ping["result"]["status"], "ok");

        handle.shutdown();
        handle.join().expect("join listener");
    }

    #[test]
    fn socket_file_is_removed_on_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("crucibled.sock");
        let handle = start_server(&path);
        assert!(path.exists());

        handle.shutdown();
        handle.join().expect("join listener");
        assert!(!path.exists(), "socket file should be removed");
    }

    #[test]
    fn non_socket_path_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("not-a-socket");
        fs::write(&path, b"plain file").expect("write file");

        let error = SocketServer::bind(&path).expect_err("bind should fail");
        assert!(matches!(error, TransportError::NotSocket { .. }));
    }
}
