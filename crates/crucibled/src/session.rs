//! The persistent execution session.
//!
//! A session owns the long-lived scope that survives across requests, the
//! executor bound to it, and the interrupt flag shared with the executor's
//! progress hook. All mutation of the scope happens under one lock, so
//! concurrent connections observe a single serialised stream of
//! executions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rhai::Scope;
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{ExecutionResult, Executor};
use crate::probe;
use crucible_protocol::MemoryReading;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Names starting with this prefix are internal and never reported.
const RESERVED_PREFIX: &str = "__";

/// Helper functions registered on the engine, excluded from state listings.
const BUILTIN_BINDINGS: [&str; 2] = ["get_memory", "clean_memory"];

/// Constant seeded into every fresh scope so code can confirm which
/// session it is running in.
const SESSION_CONSTANT: &str = "__session__";

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The scope lock was poisoned by a panicking execution.
    #[error("execution state lock poisoned")]
    Poisoned,
}

/// Long-lived execution state shared by every connection.
pub struct Session {
    executor: Executor,
    scope: Mutex<Scope<'static>>,
    interrupt: Arc<AtomicBool>,
}

impl Session {
    /// Creates a session with a freshly seeded scope.
    #[must_use]
    pub fn new() -> Self {
        let interrupt = Arc::new(AtomicBool::new(false));
        Self {
            executor: Executor::new(Arc::clone(&interrupt)),
            scope: Mutex::new(seeded_scope()),
            interrupt,
        }
    }

    /// Runs one unit of code against the persistent scope.
    ///
    /// Any pending interrupt is discarded before the run starts, so a
    /// request that raced a previous interrupt is not cancelled by it.
    ///
    /// # Errors
    /// Returns [`SessionError::Poisoned`] when a previous execution
    /// panicked while holding the scope lock.
    pub fn execute(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SessionError> {
        let mut scope = self.scope.lock().map_err(|_| SessionError::Poisoned)?;
        self.interrupt.store(false, Ordering::SeqCst);
        debug!(
            target: SESSION_TARGET,
            code_bytes = code.len(),
            timeout_secs = timeout.as_secs_f64(),
            "executing code unit"
        );
        Ok(self.executor.run(&mut scope, code, Some(timeout)))
    }

    /// Discards the namespace and replaces it with a fresh seeded scope.
    ///
    /// # Errors
    /// Returns [`SessionError::Poisoned`] when the scope lock is poisoned.
    pub fn reset(&self) -> Result<MemoryReading, SessionError> {
        let mut scope = self.scope.lock().map_err(|_| SessionError::Poisoned)?;
        *scope = seeded_scope();
        self.interrupt.store(false, Ordering::SeqCst);
        info!(target: SESSION_TARGET, "session state reset");
        Ok(probe::clean_memory())
    }

    /// Lists user-visible variable names, sorted and deduplicated.
    ///
    /// # Errors
    /// Returns [`SessionError::Poisoned`] when the scope lock is poisoned.
    pub fn state(&self) -> Result<Vec<String>, SessionError> {
        let scope = self.scope.lock().map_err(|_| SessionError::Poisoned)?;
        let names: std::collections::BTreeSet<String> = scope
            .iter_raw()
            .map(|(name, _constant, _value)| name)
            .filter(|name| is_user_visible(name))
            .map(ToOwned::to_owned)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Requests cancellation of the in-flight execution, if any.
    ///
    /// Delivery is cooperative: the flag is observed at the executor's next
    /// safe point. Setting it while the session is idle has no effect
    /// because `execute` clears it before each run.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        info!(target: SESSION_TARGET, "interrupt requested");
    }

    /// Reads an integer value out of the persistent scope.
    #[cfg(test)]
    pub fn variable_i64(&self, name: &str) -> Option<i64> {
        self.scope.lock().ok()?.get_value::<i64>(name)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

fn seeded_scope() -> Scope<'static> {
    let mut scope = Scope::new();
    scope.push_constant(SESSION_CONSTANT, env!("CARGO_PKG_NAME"));
    scope
}

fn is_user_visible(name: &str) -> bool {
    !name.starts_with(RESERVED_PREFIX) && !BUILTIN_BINDINGS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn execute_persists_variables_across_calls() {
        let session = Session::new();

        let first = session.execute("let x = 21;", TIMEOUT).expect("lock");
        assert!(first.success);

        let second = session.execute("let y = x * 2;", TIMEOUT).expect("lock");
        assert!(second.success, "second run failed: {:?}", second.exception);
        assert_eq!(session.variable_i64("y"), Some(42));
    }

    #[test]
    fn reset_discards_user_variables() {
        let session = Session::new();
        session.execute("let z = 1;", TIMEOUT).expect("lock");
        assert_eq!(session.variable_i64("z"), Some(1));

        session.reset().expect("lock");
        assert_eq!(session.variable_i64("z"), None);
    }

    #[test]
    fn state_lists_user_names_sorted_and_hides_internals() {
        let session = Session::new();
        session
            .execute("let beta = 2; let alpha = 1;", TIMEOUT)
            .expect("lock");

        let names = session.state().expect("lock");
        assert_eq!(names, vec!["alpha".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn fresh_session_reports_no_variables() {
        let session = Session::new();
        assert!(session.state().expect("lock").is_empty());
    }

    #[test]
    fn session_constant_is_readable_from_code() {
        let session = Session::new();
        let result = session
            .execute("print(__session__);", TIMEOUT)
            .expect("lock");
        assert!(result.success);
        assert!(result.stdout.contains("crucibled"));
    }

    #[test]
    fn pending_interrupt_does_not_cancel_the_next_run() {
        let session = Session::new();
        session.interrupt();

        let result = session.execute("let ok = true;", TIMEOUT).expect("lock");
        assert!(result.success, "stale interrupt cancelled a fresh run");
    }

    #[test]
    fn shadowed_variables_are_listed_once() {
        let session = Session::new();
        session.execute("let v = 1;", TIMEOUT).expect("lock");
        session.execute("let v = 2;", TIMEOUT).expect("lock");

        let names = session.state().expect("lock");
        assert_eq!(names.iter().filter(|n| *n == "v").count(), 1);
    }
}
