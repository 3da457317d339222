// Error types surfaced at the pipeline boundary

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::grammar::Span;
use crate::sandbox::Trace;

/// Top-level error type.
///
/// Every fallible pipeline operation returns [`Result<T, FlowError>`](Result).
/// Each variant wraps a stage-specific error so callers can branch on the
/// stage without parsing messages.
#[derive(thiserror::Error, Debug)]
pub enum FlowError {
    /// Rejected before any parsing began.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Syntax error in one file.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Structural error in the reference graph.
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Execution did not complete.
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
}

/// Errors in the raw input: language tag or file set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("File path cannot be empty")]
    EmptyPath,

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("Duplicate file path: {0}")]
    DuplicatePath(String),

    #[error("File {path} is {size} bytes, limit is {limit}")]
    FileTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("{count} files supplied, limit is {limit}")]
    TooManyFiles { count: usize, limit: usize },
}

/// A syntax error with the offending span so a caller can highlight it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{file}:{}:{}: {message}", span.line, span.column)]
pub struct ParseError {
    pub file: String,
    pub span: Span,
    pub message: String,
}

/// A reference to a file outside the provided set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedReference {
    /// The reference as written (`utils`, `"util.h"`, `a.b.C`).
    pub reference: String,
    pub referencing_file: String,
    pub line: u32,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Non-fatal; collected on the compilation unit.
    #[error("Unresolved reference `{}` in {}:{}", .0.reference, .0.referencing_file, .0.line)]
    UnresolvedReference(UnresolvedReference),

    /// Fatal for the whole unit.
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Why a trace stopped short of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceErrorKind {
    TimedOut,
    StepLimitExceeded,
    RuntimeError,
    Cancelled,
}

impl fmt::Display for TraceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceErrorKind::TimedOut => "timed out",
            TraceErrorKind::StepLimitExceeded => "step limit exceeded",
            TraceErrorKind::RuntimeError => "runtime error",
            TraceErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum TraceError {
    /// Execution started and stopped early; the partial trace is kept.
    #[error("{kind}: {message}")]
    Aborted {
        kind: TraceErrorKind,
        message: String,
        partial: Box<Trace>,
    },

    /// Execution never started (syntax errors, language mismatch).
    #[error("cannot execute: {0}")]
    Rejected(String),
}

impl TraceError {
    pub fn kind(&self) -> Option<TraceErrorKind> {
        match self {
            TraceError::Aborted { kind, .. } => Some(*kind),
            TraceError::Rejected(_) => None,
        }
    }

    pub fn partial_trace(&self) -> Option<&Trace> {
        match self {
            TraceError::Aborted { partial, .. } => Some(partial),
            TraceError::Rejected(_) => None,
        }
    }
}

/// Structured error record for JSON consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    pub detail: Value,
}

impl InputError {
    fn kind_name(&self) -> &'static str {
        match self {
            InputError::UnsupportedLanguage(_) => "UnsupportedLanguage",
            InputError::EmptyPath => "EmptyPath",
            InputError::InvalidPath(_) => "InvalidPath",
            InputError::DuplicatePath(_) => "DuplicatePath",
            InputError::FileTooLarge { .. } => "FileTooLarge",
            InputError::TooManyFiles { .. } => "TooManyFiles",
        }
    }
}

impl ParseError {
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: "ParseError".to_string(),
            message: self.message.clone(),
            detail: json!({ "file": self.file, "span": self.span }),
        }
    }
}

impl ResolutionError {
    pub fn report(&self) -> ErrorReport {
        match self {
            ResolutionError::UnresolvedReference(reference) => ErrorReport {
                kind: "UnresolvedReference".to_string(),
                message: self.to_string(),
                detail: json!(reference),
            },
            ResolutionError::CyclicDependency { cycle } => ErrorReport {
                kind: "CyclicDependency".to_string(),
                message: self.to_string(),
                detail: json!({ "cycle": cycle }),
            },
        }
    }
}

impl FlowError {
    /// Convert into the structured record sent across the boundary.
    pub fn report(&self) -> ErrorReport {
        match self {
            FlowError::Input(e) => ErrorReport {
                kind: e.kind_name().to_string(),
                message: e.to_string(),
                detail: Value::Null,
            },
            FlowError::Parse(e) => e.report(),
            FlowError::Resolution(e) => e.report(),
            FlowError::Trace(TraceError::Aborted {
                kind,
                message,
                partial,
            }) => ErrorReport {
                kind: format!("{:?}", kind),
                message: message.clone(),
                detail: json!({ "partialTrace": partial }),
            },
            FlowError::Trace(e @ TraceError::Rejected(_)) => ErrorReport {
                kind: "Rejected".to_string(),
                message: e.to_string(),
                detail: Value::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_report_lists_path() {
        let err = FlowError::from(ResolutionError::CyclicDependency {
            cycle: vec!["a.py".into(), "b.py".into(), "a.py".into()],
        });
        let report = err.report();
        assert_eq!(report.kind, "CyclicDependency");
        assert_eq!(report.detail["cycle"][2], "a.py");
        assert!(report.message.contains("a.py -> b.py -> a.py"));
    }

    #[test]
    fn test_input_report_kind() {
        let err = FlowError::from(InputError::UnsupportedLanguage("cobol".into()));
        assert_eq!(err.report().kind, "UnsupportedLanguage");
    }
}
