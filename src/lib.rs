//! flowtrace: resolve multi-file source sets, build flow graphs and record
//! sandboxed execution traces.
//!
//! ```no_run
//! use flowtrace::{CodeSet, FileInput, Language, Pipeline};
//!
//! let input = CodeSet::new(Language::Python, FileInput::new("main.py", "x = 1\nx = x + 1\n"), vec![]);
//! let pipeline = Pipeline::default();
//! let analysis = pipeline.analyze(&input).unwrap();
//! let trace = pipeline.trace_blocking(&input).unwrap();
//! assert_eq!(trace.history("x").len(), 2);
//! # let _ = analysis;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod grammar;
pub mod graph;
pub mod history;
pub mod mcp;
pub mod pipeline;
pub mod resolver;
pub mod sandbox;
pub mod session;

pub use config::Config;
pub use error::{ErrorReport, FlowError, InputError, ParseError, ResolutionError, TraceError, TraceErrorKind};
pub use grammar::{Ast, AstKind, AstNode, GrammarRegistry, Language, ParsedUnit};
pub use graph::{AnalysisCache, EdgeKind, FlowGraph, GraphEdge, GraphNode, NodeKind};
pub use history::{HistoryManager, HISTORY_CAPACITY};
pub use pipeline::{Analysis, AnalysisAndTrace, Pipeline, PipelineInput};
pub use resolver::{resolve, CodeSet, CompilationUnit, FileInput, Resolver};
pub use sandbox::{trace, CancellationToken, EventKind, Trace, TraceLimits, TraceStatus, TraceStep, VariableSnapshot};
pub use session::{SessionOutcome, TraceSession};
