// Per-session trace coordination: at most one trace in flight

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::TraceError;
use crate::resolver::CompilationUnit;
use crate::sandbox::{self, CancellationToken, Trace, TraceLimits};

/// Result of [`TraceSession::run`].
#[derive(Debug)]
pub enum SessionOutcome {
    Finished(Result<Trace, TraceError>),
    /// A newer request started while this one ran; its result was dropped.
    Superseded,
}

impl SessionOutcome {
    pub fn is_superseded(&self) -> bool {
        matches!(self, SessionOutcome::Superseded)
    }

    pub fn into_result(self) -> Option<Result<Trace, TraceError>> {
        match self {
            SessionOutcome::Finished(result) => Some(result),
            SessionOutcome::Superseded => None,
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Last-request-wins trace runner for one user session.
///
/// Starting a trace cancels the one in flight. A cancelled request resolves
/// to [`SessionOutcome::Superseded`] so a stale trace is never delivered.
#[derive(Debug, Default)]
pub struct TraceSession {
    state: Mutex<InFlight>,
}

impl TraceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run(&self, unit: Arc<CompilationUnit>, limits: TraceLimits) -> SessionOutcome {
        let token = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.token.replace(token.clone()) {
                debug!("Cancelling trace generation {}", state.generation);
                previous.cancel();
            }
            state.generation += 1;
            state.generation
        };

        let language = unit.language;
        let result = sandbox::trace_in_background(unit, language, limits, token).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            info!("Trace generation {} superseded by {}", generation, state.generation);
            return SessionOutcome::Superseded;
        }
        state.token = None;
        SessionOutcome::Finished(result)
    }

    /// Cancel the trace in flight, if any. Its caller sees `Superseded`.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
            state.generation += 1;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Language;
    use crate::resolver::{resolve, FileInput};
    use std::time::Duration;

    fn unit(source: &str) -> Arc<CompilationUnit> {
        Arc::new(resolve(FileInput::new("main.py", source), vec![], Language::Python).unwrap())
    }

    fn long_limits() -> TraceLimits {
        TraceLimits {
            timeout_ms: 20_000,
            max_steps: 50_000_000,
            ..TraceLimits::default()
        }
    }

    #[tokio::test]
    async fn test_single_run_finishes() {
        let session = TraceSession::new();
        let outcome = session.run(unit("x = 1\nx = x + 1\n"), TraceLimits::default()).await;
        let trace = outcome.into_result().unwrap().unwrap();
        assert_eq!(trace.history("x").len(), 2);
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_newer_request_supersedes() {
        let session = Arc::new(TraceSession::new());
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.run(unit("while True:\n    x = 1\n"), long_limits()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = session.run(unit("y = 2\n"), TraceLimits::default()).await;
        assert!(!second.is_superseded());
        assert!(second.into_result().unwrap().is_ok());

        let first = tokio::time::timeout(Duration::from_secs(10), first).await.unwrap().unwrap();
        assert!(first.is_superseded());
    }

    #[tokio::test]
    async fn test_cancel_marks_superseded() {
        let session = Arc::new(TraceSession::new());
        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.run(unit("while True:\n    pass\n"), long_limits()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap();
        assert!(outcome.is_superseded());
    }
}
