//! Launch configuration for the crucible daemon.
//!
//! The launch surface is deliberately small: a mode flag selecting
//! socket-server versus standard-input operation, the socket path for server
//! mode, and logging knobs. Everything is carried on the command line; there
//! is no configuration file layer.

mod logging;

use std::fmt;
use std::path::PathBuf;

use clap::Parser;

pub use logging::LogFormat;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "crucibled", about = "Persistent script-execution JSON-RPC daemon")]
pub struct Cli {
    /// Serve requests on a Unix domain socket instead of standard input.
    #[arg(long, requires = "socket")]
    pub server: bool,

    /// Filesystem path for the Unix domain socket (server mode).
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Tracing filter expression for diagnostic output.
    #[arg(long, value_name = "FILTER", default_value = "info")]
    pub log_filter: String,

    /// Format for diagnostic log lines on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

/// How the daemon receives its request stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Line-oriented loop over standard input; responses on standard output.
    Stdio,
    /// Accept loop on a Unix domain socket; each connection is its own
    /// response sink.
    Socket {
        /// Filesystem path backing the socket.
        path: PathBuf,
    },
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => formatter.write_str("stdio"),
            Self::Socket { path } => write!(formatter, "unix://{}", path.display()),
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    mode: LaunchMode,
    log_filter: String,
    log_format: LogFormat,
}

impl Config {
    /// Parses configuration from the process arguments.
    #[must_use]
    pub fn load() -> Self {
        Self::from_cli(Cli::parse())
    }

    /// Builds configuration from already-parsed arguments.
    ///
    /// Socket mode requires both `--server` and `--socket`; clap enforces
    /// the pairing, so a lone `--socket` falls back to stdio mode exactly as
    /// a bare invocation does.
    #[must_use]
    pub fn from_cli(cli: Cli) -> Self {
        let mode = match (cli.server, cli.socket) {
            (true, Some(path)) => LaunchMode::Socket { path },
            _ => LaunchMode::Stdio,
        };
        Self {
            mode,
            log_filter: cli.log_filter,
            log_format: cli.log_format,
        }
    }

    /// The configured launch mode.
    #[must_use]
    pub fn mode(&self) -> &LaunchMode {
        &self.mode
    }

    /// Tracing filter expression for diagnostic output.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Diagnostic log format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
