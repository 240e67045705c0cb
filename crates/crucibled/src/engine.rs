//! Runs one unit of code against the persistent namespace.
//!
//! Each run compiles the submitted code before executing it, so parse
//! failures are reported distinctly from run-time failures. Output produced
//! by the code's `print`/`debug` statements is captured into private
//! in-memory buffers that are drained on every exit path — the process's
//! own stdout/stderr are never touched, which is what keeps protocol
//! framing safe from the program under execution.
//!
//! Cancellation is cooperative: the engine's progress hook checks the
//! session's interrupt flag and the armed deadline between interpreter
//! steps. A run blocked inside a long native call cannot be stopped — the
//! contract is "signal delivered", not "execution stopped".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, ParseError, Scope};

use crate::probe;
use crucible_protocol::MemoryReading;

const INTERRUPT_TOKEN: &str = "interrupt";
const TIMEOUT_TOKEN: &str = "timeout";

/// Classified outcome of one unit of execution.
///
/// Exactly one of two shapes holds: `success == true` with all exception
/// fields empty, or `success == false` with `exception` and
/// `exception_kind` populated (`traceback` is absent for timeouts).
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Whether the unit ran to completion.
    pub success: bool,
    /// Output captured from `print` statements.
    pub stdout: String,
    /// Output captured from `debug` statements.
    pub stderr: String,
    /// Human-readable failure message.
    pub exception: Option<String>,
    /// Short kind name for the failure, e.g. `SyntaxError`.
    pub exception_kind: Option<String>,
    /// Formatted trace with source position; absent for timeouts.
    pub traceback: Option<String>,
}

impl ExecutionResult {
    fn completed(stdout: String, stderr: String) -> Self {
        Self {
            success: true,
            stdout,
            stderr,
            ..Self::default()
        }
    }

    fn failed(
        kind: &str,
        message: String,
        traceback: Option<String>,
        stdout: String,
        stderr: String,
    ) -> Self {
        Self {
            success: false,
            stdout,
            stderr,
            exception: Some(message),
            exception_kind: Some(kind.to_owned()),
            traceback,
        }
    }
}

enum RunOutcome {
    Completed,
    Parse(ParseError),
    Eval(Box<EvalAltResult>),
}

/// Executes code units against a scope with scoped capture and a deadline.
///
/// The engine's hooks are bound once at construction: print/debug feed the
/// capture buffers, the progress hook observes the interrupt flag and the
/// deadline cell. `run` is not re-entrant; the session's lock guarantees at
/// most one run at a time.
pub(crate) struct Executor {
    engine: Engine,
    stdout: Arc<Mutex<String>>,
    stderr: Arc<Mutex<String>>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl Executor {
    pub(crate) fn new(interrupt: Arc<AtomicBool>) -> Self {
        let stdout = Arc::new(Mutex::new(String::new()));
        let stderr = Arc::new(Mutex::new(String::new()));
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let mut engine = Engine::new();

        let print_sink = Arc::clone(&stdout);
        engine.on_print(move |text| {
            if let Ok(mut buffer) = print_sink.lock() {
                buffer.push_str(text);
                buffer.push('\n');
            }
        });

        let debug_sink = Arc::clone(&stderr);
        engine.on_debug(move |text, _source, _position| {
            if let Ok(mut buffer) = debug_sink.lock() {
                buffer.push_str(text);
                buffer.push('\n');
            }
        });

        let deadline_cell = Arc::clone(&deadline);
        engine.on_progress(move |_operations| {
            if interrupt.load(Ordering::SeqCst) {
                return Some(Dynamic::from(INTERRUPT_TOKEN));
            }
            let expired = deadline_cell
                .lock()
                .ok()
                .and_then(|slot| *slot)
                .is_some_and(|deadline| Instant::now() >= deadline);
            if expired {
                return Some(Dynamic::from(TIMEOUT_TOKEN));
            }
            None
        });

        engine.register_fn("get_memory", || memory_map(probe::memory_usage()));
        engine.register_fn("clean_memory", || memory_map(probe::clean_memory()));

        Self {
            engine,
            stdout,
            stderr,
            deadline,
        }
    }

    /// Runs one unit of code against `scope`, bounded by `deadline` when
    /// one is supplied. The scope is read and written in place; that is how
    /// state persists across calls.
    pub(crate) fn run(
        &self,
        scope: &mut Scope<'static>,
        code: &str,
        deadline: Option<Duration>,
    ) -> ExecutionResult {
        self.arm(deadline);
        self.clear_capture();

        let outcome = match self.engine.compile(code) {
            Err(parse_error) => RunOutcome::Parse(parse_error),
            Ok(ast) => match self.engine.run_ast_with_scope(scope, &ast) {
                Ok(()) => RunOutcome::Completed,
                Err(error) => RunOutcome::Eval(error),
            },
        };

        // Single tail for every exit path: disarm, drain, classify.
        self.arm(None);
        let (stdout, stderr) = self.drain_capture();
        classify(outcome, stdout, stderr)
    }

    fn arm(&self, deadline: Option<Duration>) {
        if let Ok(mut slot) = self.deadline.lock() {
            *slot = deadline.map(|limit| Instant::now() + limit);
        }
    }

    fn clear_capture(&self) {
        if let Ok(mut buffer) = self.stdout.lock() {
            buffer.clear();
        }
        if let Ok(mut buffer) = self.stderr.lock() {
            buffer.clear();
        }
    }

    fn drain_capture(&self) -> (String, String) {
        let stdout = self
            .stdout
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default();
        let stderr = self
            .stderr
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .unwrap_or_default();
        (stdout, stderr)
    }
}

fn classify(outcome: RunOutcome, stdout: String, stderr: String) -> ExecutionResult {
    match outcome {
        RunOutcome::Completed => ExecutionResult::completed(stdout, stderr),
        RunOutcome::Parse(error) => {
            let message = error.to_string();
            let trace = format!("syntax error: {error}");
            ExecutionResult::failed("SyntaxError", message, Some(trace), stdout, stderr)
        }
        RunOutcome::Eval(error) => classify_eval(&error, stdout, stderr),
    }
}

fn classify_eval(error: &EvalAltResult, stdout: String, stderr: String) -> ExecutionResult {
    if let EvalAltResult::ErrorTerminated(token, _) = error {
        return if token.to_string() == TIMEOUT_TOKEN {
            ExecutionResult::failed(
                "Timeout",
                "Code execution timed out".to_owned(),
                None,
                stdout,
                stderr,
            )
        } else {
            ExecutionResult::failed(
                "Interrupted",
                "Execution interrupted".to_owned(),
                Some("Interrupted by user".to_owned()),
                stdout,
                stderr,
            )
        };
    }

    ExecutionResult::failed(
        kind_of(error),
        error.to_string(),
        Some(format_trace(error)),
        stdout,
        stderr,
    )
}

/// Fixed mapping from evaluation errors to short kind names.
fn kind_of(error: &EvalAltResult) -> &'static str {
    match error {
        EvalAltResult::ErrorVariableNotFound(..) => "VariableNotFound",
        EvalAltResult::ErrorFunctionNotFound(..) => "FunctionNotFound",
        EvalAltResult::ErrorArithmetic(..) => "Arithmetic",
        EvalAltResult::ErrorArrayBounds(..) => "IndexOutOfBounds",
        _ => "Runtime",
    }
}

fn format_trace(error: &EvalAltResult) -> String {
    let position = error.position();
    if position.is_none() {
        format!("error: {error}")
    } else {
        format!("error: {error} (at {position})")
    }
}

fn memory_map(reading: MemoryReading) -> rhai::Map {
    let mut map = rhai::Map::new();
    map.insert("rss_mb".into(), Dynamic::from_float(reading.rss_mb));
    map.insert("vms_mb".into(), Dynamic::from_float(reading.vms_mb));
    map
}
