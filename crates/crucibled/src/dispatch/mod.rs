//! Request validation and routing.
//!
//! Every inbound line passes through the same staged pipeline: parse the
//! JSON, validate the envelope, resolve the method, validate its
//! parameters, then run the handler. A failure at any stage produces an
//! error response carrying the stage's wire code; nothing later in the
//! pipeline runs, so a rejected request never touches the session.

mod errors;
mod writer;

pub use errors::DispatchError;
pub use writer::ProtocolWriter;

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use crate::markers;
use crate::probe;
use crate::session::Session;
use crucible_protocol::{
    ExecuteError, ExecuteReport, ExecuteTiming, InterruptReport, PingReport, ResetReport,
    StateReport, PROTOCOL_VERSION,
};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Execution deadline applied when a request does not supply one.
const DEFAULT_TIMEOUT_SECS: f64 = 300.0;

/// Methods the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Run code against the persistent session.
    Execute,
    /// Request cancellation of the in-flight execution.
    Interrupt,
    /// Discard and reseed the session namespace.
    Reset,
    /// List user-visible session variables.
    GetState,
    /// Liveness check.
    Ping,
}

impl Method {
    /// Resolves a wire method name, case-sensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "execute" => Some(Self::Execute),
            "interrupt" => Some(Self::Interrupt),
            "reset" => Some(Self::Reset),
            "get_state" => Some(Self::GetState),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }

    /// Wire name of this method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Interrupt => "interrupt",
            Self::Reset => "reset",
            Self::GetState => "get_state",
            Self::Ping => "ping",
        }
    }
}

/// Routes request lines to session operations and writes the responses.
pub struct Dispatcher {
    session: Arc<Session>,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared session.
    #[must_use]
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Processes one request line and writes exactly one response.
    ///
    /// A panicking handler is caught and reported as an internal error so
    /// one malformed request cannot take the connection down.
    ///
    /// # Errors
    /// Returns any I/O error from the response writer.
    pub fn dispatch_line<W: Write>(
        &self,
        line: &str,
        writer: &mut ProtocolWriter<W>,
    ) -> io::Result<()> {
        match self.process(line) {
            Ok((id, result)) => writer.write_success(id, result),
            Err((id, dispatch_error)) => {
                warn!(
                    target: DISPATCH_TARGET,
                    code = dispatch_error.code(),
                    %dispatch_error,
                    "request rejected"
                );
                writer.write_failure(id, dispatch_error.to_error_object())
            }
        }
    }

    /// Validates and routes one request, returning the response body or
    /// the rejection paired with whatever request id was recoverable.
    #[allow(clippy::type_complexity)]
    fn process(&self, line: &str) -> Result<(Option<Value>, Value), (Option<Value>, DispatchError)> {
        let parsed: Value =
            serde_json::from_str(line).map_err(|e| (None, DispatchError::parse(&e)))?;

        let request = parsed
            .as_object()
            .ok_or_else(|| (None, DispatchError::invalid_request("Request must be a JSON object")))?;

        let id = request.get("id").cloned();

        let version = request.get("jsonrpc").and_then(Value::as_str);
        if version != Some(PROTOCOL_VERSION) {
            return Err((
                id,
                DispatchError::invalid_request("Invalid jsonrpc version, expected '2.0'"),
            ));
        }

        let method_name = request
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                (
                    id.clone(),
                    DispatchError::invalid_request("Missing or invalid 'method'"),
                )
            })?;

        // Params shape is validated before the registry lookup: a malformed
        // request is Invalid-Params even when the method is also unknown.
        let params = match request.get("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err((
                    id,
                    DispatchError::invalid_params("Parameter 'params' must be an object"),
                ));
            }
        };

        let method = Method::parse(method_name)
            .ok_or_else(|| (id.clone(), DispatchError::MethodNotFound(method_name.to_owned())))?;

        debug!(
            target: DISPATCH_TARGET,
            method = method.as_str(),
            "dispatching request"
        );

        // The id is recovered before the handler runs, so even a panicking
        // handler gets reported against the request that triggered it.
        let result = guard_handler(|| match method {
            Method::Execute => self.handle_execute(&params),
            Method::Interrupt => self.handle_interrupt(),
            Method::Reset => self.handle_reset(),
            Method::GetState => self.handle_get_state(),
            Method::Ping => Ok(handle_ping()),
        });

        match result {
            Ok(body) => Ok((id, body)),
            Err(dispatch_error) => Err((id, dispatch_error)),
        }
    }

    fn handle_execute(&self, params: &Map<String, Value>) -> Result<Value, DispatchError> {
        let code = match params.get("code") {
            None => {
                return Err(DispatchError::invalid_params(
                    "Missing required parameter: code",
                ));
            }
            Some(Value::String(code)) if code.is_empty() => {
                return Err(DispatchError::invalid_params(
                    "Missing required parameter: code",
                ));
            }
            Some(Value::String(code)) => code,
            Some(_) => {
                return Err(DispatchError::invalid_params(
                    "Parameter 'code' must be a string",
                ));
            }
        };

        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let started_at = now_rfc3339();
        let started = Instant::now();
        let outcome = self
            .session
            .execute(code, Duration::from_secs_f64(timeout_secs))
            .map_err(|e| DispatchError::internal(e.to_string(), None))?;
        let duration_ms =
            probe::round_to_hundredths(started.elapsed().as_secs_f64() * 1000.0);

        let markers = markers::extract_markers(&outcome.stdout);
        let error = if outcome.success {
            None
        } else {
            Some(ExecuteError {
                kind: outcome.exception_kind.clone().unwrap_or_default(),
                message: outcome.exception.clone().unwrap_or_default(),
                traceback: outcome.traceback.clone(),
            })
        };

        let report = ExecuteReport {
            success: outcome.success,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            markers,
            artifacts: Vec::new(),
            timing: ExecuteTiming {
                started_at,
                duration_ms,
            },
            memory: probe::memory_usage(),
            error,
        };

        serde_json::to_value(report)
            .map_err(|e| DispatchError::internal("failed to encode result", Some(e.to_string())))
    }

    fn handle_interrupt(&self) -> Result<Value, DispatchError> {
        self.session.interrupt();
        serde_json::to_value(InterruptReport::new())
            .map_err(|e| DispatchError::internal("failed to encode result", Some(e.to_string())))
    }

    fn handle_reset(&self) -> Result<Value, DispatchError> {
        let memory = self
            .session
            .reset()
            .map_err(|e| DispatchError::internal(e.to_string(), None))?;
        serde_json::to_value(ResetReport::new(memory))
            .map_err(|e| DispatchError::internal("failed to encode result", Some(e.to_string())))
    }

    fn handle_get_state(&self) -> Result<Value, DispatchError> {
        let variables = self
            .session
            .state()
            .map_err(|e| DispatchError::internal(e.to_string(), None))?;
        let report = StateReport {
            memory: probe::memory_usage(),
            variable_count: variables.len(),
            variables,
        };
        serde_json::to_value(report)
            .map_err(|e| DispatchError::internal("failed to encode result", Some(e.to_string())))
    }
}

/// Converts a panicking handler into an internal error so one request
/// cannot take the connection down.
fn guard_handler<F>(handler: F) -> Result<Value, DispatchError>
where
    F: FnOnce() -> Result<Value, DispatchError>,
{
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            error!(target: DISPATCH_TARGET, detail, "handler panicked");
            Err(DispatchError::internal(
                "handler panicked",
                Some(detail.to_owned()),
            ))
        }
    }
}

fn handle_ping() -> Value {
    json!(PingReport::new(now_rfc3339()))
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
