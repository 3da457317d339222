// Execution sandbox: lowers a compilation unit to a shared IR and runs it
// under step, time and depth limits, recording a deterministic trace.

mod builtins;
pub mod cancel;
mod containers;
mod format;
mod interpreter;
pub mod ir;
pub mod lower;
mod methods;
mod ops;
mod recorder;
pub mod value;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

pub use cancel::CancellationToken;

use crate::error::{TraceError, TraceErrorKind};
use crate::grammar::Language;
use crate::resolver::CompilationUnit;
use interpreter::{Fault, Halt, Interpreter};
use recorder::Recorder;

/// Where a trace ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TraceStatus {
    Running,
    Completed,
    TimedOut,
    StepLimitExceeded,
    RuntimeError,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Call,
    Return,
    Assignment,
    Branch,
    Exception,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub index: usize,
    pub file_id: String,
    pub line: u32,
    pub event: EventKind,
    /// Function executing when the step was taken; `<module>` for top-level code.
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSnapshot {
    pub name: String,
    pub step_index: usize,
    pub value: Json,
    pub scope_id: String,
}

/// The fault that ended a `RuntimeError` trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFault {
    pub message: String,
    pub last_step: Option<usize>,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub status: TraceStatus,
    pub steps: Vec<TraceStep>,
    /// Per-variable history, ordered by step index.
    pub variables: BTreeMap<String, Vec<VariableSnapshot>>,
    /// Captured standard output, one entry per line.
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<TraceFault>,
}

impl Trace {
    pub fn history(&self, name: &str) -> &[VariableSnapshot] {
        self.variables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_step(&self) -> Option<usize> {
        self.steps.last().map(|s| s.index)
    }

    /// Step indices are exactly `0..len`.
    pub fn is_contiguous(&self) -> bool {
        self.steps.iter().enumerate().all(|(i, s)| s.index == i)
    }

    pub fn stdout(&self) -> String {
        self.output.join("\n")
    }
}

/// Resource bounds for one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceLimits {
    pub timeout_ms: u64,
    pub max_steps: usize,
    pub max_call_depth: usize,
    pub max_collection_len: usize,
    pub max_string_len: usize,
    pub max_output_lines: usize,
    /// Extra time a background trace gets to observe cancellation before it
    /// is abandoned.
    pub hard_kill_grace_ms: u64,
}

impl Default for TraceLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_steps: 10_000,
            max_call_depth: 200,
            max_collection_len: 100_000,
            max_string_len: 100_000,
            max_output_lines: 1000,
            hard_kill_grace_ms: 250,
        }
    }
}

impl TraceLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn hard_kill_grace(&self) -> Duration {
        Duration::from_millis(self.hard_kill_grace_ms)
    }
}

/// Run `unit` to completion or until a limit trips.
///
/// A completed run returns the trace. Every other outcome returns
/// [`TraceError::Aborted`] carrying the partial trace collected up to the
/// point execution stopped.
pub fn trace(unit: &CompilationUnit, language: Language, limits: &TraceLimits) -> Result<Trace, TraceError> {
    trace_with_cancel(unit, language, limits, &CancellationToken::new())
}

pub fn trace_with_cancel(
    unit: &CompilationUnit,
    language: Language,
    limits: &TraceLimits,
    cancel: &CancellationToken,
) -> Result<Trace, TraceError> {
    let recorder = Recorder::new(limits.max_output_lines);
    run_recorded(unit, language, limits, cancel, &recorder)
}

/// Run on tokio's blocking pool. If the worker has not finished within the
/// timeout plus the grace period, the token is cancelled and the partial
/// trace recorded so far is returned tagged `TimedOut`.
pub async fn trace_in_background(
    unit: Arc<CompilationUnit>,
    language: Language,
    limits: TraceLimits,
    cancel: CancellationToken,
) -> Result<Trace, TraceError> {
    let recorder = Recorder::new(limits.max_output_lines);
    let budget = limits.timeout() + limits.hard_kill_grace();

    let worker = {
        let recorder = recorder.clone();
        let cancel = cancel.clone();
        let limits = limits.clone();
        tokio::task::spawn_blocking(move || run_recorded(&unit, language, &limits, &cancel, &recorder))
    };

    match tokio::time::timeout(budget, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(TraceError::Rejected(format!("trace worker failed: {}", e))),
        Err(_) => {
            cancel.cancel();
            warn!("Trace did not stop within {:?}, abandoning worker", budget);
            let partial = recorder.snapshot(TraceStatus::TimedOut, None);
            Err(TraceError::Aborted {
                kind: TraceErrorKind::TimedOut,
                message: format!("execution exceeded {} ms", limits.timeout_ms),
                partial: Box::new(partial),
            })
        }
    }
}

/// Stack reserved for the interpreter thread. Evaluation recurses once per
/// nested call and expression, bounded by `max_call_depth`.
const SANDBOX_STACK_BYTES: usize = 64 * 1024 * 1024;

/// How the interpreter stopped, in a form that can leave its thread.
struct Outcome {
    status: TraceStatus,
    kind: Option<TraceErrorKind>,
    message: String,
    file: String,
    line: u32,
}

fn run_recorded(
    unit: &CompilationUnit,
    language: Language,
    limits: &TraceLimits,
    cancel: &CancellationToken,
    recorder: &Recorder,
) -> Result<Trace, TraceError> {
    if unit.language != language {
        return Err(TraceError::Rejected(format!(
            "compilation unit is {} but {} was requested",
            unit.language, language
        )));
    }

    // Runtime values are reference counted and stay on the thread that
    // created them; only the outcome crosses back.
    let outcome = std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("flowtrace-sandbox".to_string())
            .stack_size(SANDBOX_STACK_BYTES)
            .spawn_scoped(scope, || execute(unit, language, limits, cancel, recorder))
            .map_err(|e| TraceError::Rejected(format!("failed to start sandbox thread: {}", e)))?;
        handle
            .join()
            .map_err(|_| TraceError::Rejected("sandbox thread panicked".to_string()))?
    })?;

    let fault = (outcome.status == TraceStatus::RuntimeError).then(|| TraceFault {
        message: outcome.message.clone(),
        last_step: recorder.last_step(),
        file: outcome.file.clone(),
        line: outcome.line,
    });
    let trace = recorder.snapshot(outcome.status, fault);
    info!(
        "Trace of {} finished {:?} after {} steps",
        unit.primary,
        outcome.status,
        trace.steps.len()
    );

    match outcome.kind {
        None => Ok(trace),
        Some(kind) => Err(TraceError::Aborted {
            kind,
            message: outcome.message,
            partial: Box::new(trace),
        }),
    }
}

fn execute(
    unit: &CompilationUnit,
    language: Language,
    limits: &TraceLimits,
    cancel: &CancellationToken,
    recorder: &Recorder,
) -> Result<Outcome, TraceError> {
    let program = lower::lower_unit(unit)?;
    debug!(
        "Lowered {} functions and {} classes for {}",
        program.functions.len(),
        program.classes.len(),
        unit.primary
    );
    if language != Language::Python && !program.functions.iter().any(ir::Function::is_entry) {
        return Err(TraceError::Rejected(format!("no `main` function found in {}", unit.primary)));
    }

    let mut interpreter = Interpreter::new(&program, language, limits.clone(), cancel.clone(), recorder.clone());
    let result = interpreter.run(unit);
    let (file, line) = interpreter.location();

    let (status, kind, message) = match result {
        // Stray control flow at the top level just ends the program.
        Ok(()) | Err(Fault::Exit(_)) | Err(Fault::Escape(_)) => (TraceStatus::Completed, None, String::new()),
        Err(Fault::Halt(Halt::StepLimit)) => (
            TraceStatus::StepLimitExceeded,
            Some(TraceErrorKind::StepLimitExceeded),
            format!("step limit of {} reached", limits.max_steps),
        ),
        Err(Fault::Halt(Halt::Timeout)) => (
            TraceStatus::TimedOut,
            Some(TraceErrorKind::TimedOut),
            format!("execution exceeded {} ms", limits.timeout_ms),
        ),
        Err(Fault::Halt(Halt::Cancelled)) => (
            TraceStatus::Cancelled,
            Some(TraceErrorKind::Cancelled),
            "trace cancelled".to_string(),
        ),
        Err(Fault::Exception { kind, message, .. }) => (
            TraceStatus::RuntimeError,
            Some(TraceErrorKind::RuntimeError),
            if message.is_empty() { kind } else { format!("{}: {}", kind, message) },
        ),
        Err(Fault::Fatal(message)) => (TraceStatus::RuntimeError, Some(TraceErrorKind::RuntimeError), message),
    };
    Ok(Outcome {
        status,
        kind,
        message,
        file,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{resolve, FileInput};

    fn run(language: Language, path: &str, source: &str) -> Result<Trace, TraceError> {
        let unit = resolve(FileInput::new(path, source), vec![], language).unwrap();
        trace(&unit, language, &TraceLimits::default())
    }

    #[test]
    fn test_assignment_history() {
        let trace = run(Language::Python, "main.py", "x = 1\nx = x + 1\n").unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        let history: Vec<_> = trace.history("x").iter().map(|s| (s.step_index, s.value.clone())).collect();
        assert_eq!(history, vec![(0, serde_json::json!(1)), (1, serde_json::json!(2))]);
        assert!(trace.is_contiguous());
    }

    #[test]
    fn test_step_limit_keeps_partial_trace() {
        let unit = resolve(FileInput::new("main.py", "i = 0\nwhile True:\n    i += 1\n"), vec![], Language::Python).unwrap();
        let limits = TraceLimits {
            max_steps: 50,
            ..TraceLimits::default()
        };
        let err = trace(&unit, Language::Python, &limits).unwrap_err();
        assert_eq!(err.kind(), Some(TraceErrorKind::StepLimitExceeded));
        let partial = err.partial_trace().unwrap();
        assert_eq!(partial.steps.len(), 50);
        assert_eq!(partial.status, TraceStatus::StepLimitExceeded);
        assert!(partial.is_contiguous());
    }

    #[test]
    fn test_cancelled_before_start() {
        let unit = resolve(FileInput::new("main.py", "x = 1\n"), vec![], Language::Python).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = trace_with_cancel(&unit, Language::Python, &TraceLimits::default(), &token).unwrap_err();
        assert_eq!(err.kind(), Some(TraceErrorKind::Cancelled));
    }

    #[test]
    fn test_language_mismatch_rejected() {
        let unit = resolve(FileInput::new("main.py", "x = 1\n"), vec![], Language::Python).unwrap();
        let err = trace(&unit, Language::Rust, &TraceLimits::default()).unwrap_err();
        assert!(matches!(err, TraceError::Rejected(_)));
    }

    #[test]
    fn test_missing_main_rejected() {
        let err = run(Language::C, "main.c", "int helper(void) { return 1; }\n").unwrap_err();
        assert!(matches!(err, TraceError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_background_trace_times_out() {
        let source = "fn main() {\n    let mut i = 0;\n    loop {\n        i += 1;\n    }\n}\n";
        let unit = resolve(FileInput::new("main.rs", source), vec![], Language::Rust).unwrap();
        let limits = TraceLimits {
            max_steps: usize::MAX,
            timeout_ms: 50,
            hard_kill_grace_ms: 50,
            ..TraceLimits::default()
        };
        let err = trace_in_background(Arc::new(unit), Language::Rust, limits, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(TraceErrorKind::TimedOut));

        let partial = err.partial_trace().unwrap();
        assert_eq!(partial.status, TraceStatus::TimedOut);
        assert!(!partial.steps.is_empty());
        assert!(partial.is_contiguous());
        assert!(!partial.history("i").is_empty());
    }
}
