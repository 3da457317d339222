// Pipeline facade: resolve, analyze and trace one code set

pub mod watcher;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FlowError, InputError, ParseError, TraceError, UnresolvedReference};
use crate::grammar::GrammarRegistry;
use crate::graph::{self, AnalysisCache, FlowGraph};
use crate::resolver::{CodeSet, CompilationUnit, Resolver};
use crate::sandbox::{self, CancellationToken, Trace, TraceLimits};
use crate::session::{SessionOutcome, TraceSession};

/// The input boundary: language plus primary and auxiliary files.
pub type PipelineInput = CodeSet;

/// Static analysis of one code set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub unit: CompilationUnit,
    pub parse_errors: Vec<ParseError>,
    pub unresolved: Vec<UnresolvedReference>,
    pub graph: FlowGraph,
}

/// Graph and trace computed together.
#[derive(Debug)]
pub struct AnalysisAndTrace {
    pub analysis: Analysis,
    pub trace: Result<Trace, TraceError>,
}

/// Owns the registry, resolver, limits and graph cache. Cheap to clone;
/// clones share the cache.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: GrammarRegistry,
    resolver: Resolver,
    limits: TraceLimits,
    cache: Arc<AnalysisCache>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: GrammarRegistry::with_languages(config.enabled_languages()),
            resolver: Resolver::new(config.input_limits()),
            limits: config.sandbox.clone(),
            cache: Arc::new(AnalysisCache::new(config.query.cache_size)),
        }
    }

    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &TraceLimits {
        &self.limits
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Validate the input and order its files.
    pub fn resolve(&self, input: &PipelineInput) -> Result<CompilationUnit, FlowError> {
        if !self.registry.supports(input.language) {
            return Err(InputError::UnsupportedLanguage(input.language.to_string()).into());
        }
        let unit = self.resolver.resolve(input)?;
        for reference in &unit.unresolved {
            warn!(
                "Unresolved reference `{}` in {}:{}",
                reference.reference, reference.referencing_file, reference.line
            );
        }
        Ok(unit)
    }

    /// Resolve, parse every file and build the flow graph. Parse errors are
    /// reported alongside the graph rather than failing the analysis.
    pub fn analyze(&self, input: &PipelineInput) -> Result<Analysis, FlowError> {
        let unit = self.resolve(input)?;
        self.analyze_unit(unit)
    }

    fn analyze_unit(&self, unit: CompilationUnit) -> Result<Analysis, FlowError> {
        let parsed = self.registry.parse_unit(&unit)?;
        let parse_errors = parsed.all_errors();
        if !parse_errors.is_empty() {
            warn!("{} parse errors in {} files", parse_errors.len(), parsed.errors.len());
        }
        let graph = self
            .cache
            .get_or_build(&unit.fingerprint, || graph::build(&unit, &parsed.asts));
        info!(
            "Analyzed {} files: {} nodes, {} edges",
            unit.files.len(),
            graph.nodes.len(),
            graph.edges.len()
        );
        Ok(Analysis {
            unresolved: unit.unresolved.clone(),
            graph: graph.as_ref().clone(),
            parse_errors,
            unit,
        })
    }

    /// Resolve and run on the blocking pool under the configured limits.
    pub async fn trace(&self, input: &PipelineInput) -> Result<Trace, FlowError> {
        let unit = Arc::new(self.resolve(input)?);
        let language = unit.language;
        Ok(sandbox::trace_in_background(unit, language, self.limits.clone(), CancellationToken::new()).await?)
    }

    /// Resolve and trace on the calling thread.
    pub fn trace_blocking(&self, input: &PipelineInput) -> Result<Trace, FlowError> {
        let unit = self.resolve(input)?;
        Ok(sandbox::trace(&unit, unit.language, &self.limits)?)
    }

    /// Trace through a session so a newer request for the same session
    /// supersedes this one.
    pub async fn trace_in_session(
        &self,
        session: &TraceSession,
        input: &PipelineInput,
    ) -> Result<SessionOutcome, FlowError> {
        let unit = Arc::new(self.resolve(input)?);
        Ok(session.run(unit, self.limits.clone()).await)
    }

    /// Build the graph while the trace runs in the background.
    pub async fn analyze_and_trace(&self, input: &PipelineInput) -> Result<AnalysisAndTrace, FlowError> {
        let unit = self.resolve(input)?;
        let shared = Arc::new(unit.clone());
        let limits = self.limits.clone();
        let tracing = tokio::spawn(async move {
            let language = shared.language;
            sandbox::trace_in_background(shared, language, limits, CancellationToken::new()).await
        });

        let analysis = self.analyze_unit(unit)?;
        debug!("Graph ready, waiting for trace");
        let trace = tracing
            .await
            .unwrap_or_else(|e| Err(TraceError::Rejected(format!("trace task failed: {}", e))));
        Ok(AnalysisAndTrace { analysis, trace })
    }
}

/// Trace outcome as sent across the boundary: the trace itself, or the
/// partial trace plus a structured error.
pub fn trace_json(result: &Result<Trace, TraceError>) -> Value {
    match result {
        Ok(trace) => json!(trace),
        Err(e) => {
            let report = FlowError::Trace(e.clone()).report();
            let error = json!({ "kind": report.kind, "message": report.message });
            match e.partial_trace() {
                Some(partial) => {
                    let mut value = json!(partial);
                    value["error"] = error;
                    value
                }
                None => json!({ "status": "rejected", "steps": [], "variables": {}, "error": error }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Language;
    use crate::graph::EdgeKind;
    use crate::resolver::FileInput;
    use crate::sandbox::TraceStatus;

    fn python(main: &str, aux: Vec<FileInput>) -> PipelineInput {
        CodeSet::new(Language::Python, FileInput::new("main.py", main), aux)
    }

    #[test]
    fn test_analyze_caches_graph() {
        let pipeline = Pipeline::default();
        let input = python("def main():\n    pass\n", vec![]);
        let first = pipeline.analyze(&input).unwrap();
        let second = pipeline.analyze(&input).unwrap();
        assert_eq!(first.graph, second.graph);
        assert_eq!(pipeline.cache().len(), 1);
    }

    #[test]
    fn test_disabled_language_rejected() {
        let mut config = Config::default();
        config.languages.enabled = vec!["rust".to_string()];
        let pipeline = Pipeline::new(&config);
        let err = pipeline.analyze(&python("x = 1\n", vec![])).unwrap_err();
        assert_eq!(err.report().kind, "UnsupportedLanguage");
    }

    #[test]
    fn test_parse_errors_do_not_fail_analysis() {
        let pipeline = Pipeline::default();
        let input = python(
            "import utils\n\ndef main():\n    utils.helper()\n",
            vec![FileInput::new("utils.py", "def helper(:\n    pass\n")],
        );
        let analysis = pipeline.analyze(&input).unwrap();
        assert_eq!(analysis.parse_errors.len(), 1);
        assert_eq!(analysis.parse_errors[0].file, "utils.py");
        assert!(analysis.graph.node("main.py").is_some());
    }

    #[tokio::test]
    async fn test_analyze_and_trace() {
        let pipeline = Pipeline::default();
        let input = python(
            "from utils import helper\n\ndef main():\n    x = helper(2)\n    print(x)\n\nmain()\n",
            vec![FileInput::new("utils.py", "def helper(n):\n    return n * 3\n")],
        );
        let result = pipeline.analyze_and_trace(&input).await.unwrap();
        assert_eq!(result.analysis.graph.edges_of_kind(EdgeKind::Call).count(), 1);
        let trace = result.trace.unwrap();
        assert_eq!(trace.status, TraceStatus::Completed);
        assert_eq!(trace.output, vec!["6".to_string()]);
    }

    #[test]
    fn test_trace_json_keeps_partial_trace() {
        let mut config = Config::default();
        config.sandbox.max_steps = 5;
        let pipeline = Pipeline::new(&config);
        let result = pipeline.trace_blocking(&python("i = 0\nwhile True:\n    i = i + 1\n", vec![]));
        let Err(FlowError::Trace(e)) = result else {
            panic!("expected a trace error");
        };
        let value = trace_json(&Err(e));
        assert_eq!(value["status"], "stepLimitExceeded");
        assert_eq!(value["steps"].as_array().unwrap().len(), 5);
        assert_eq!(value["error"]["kind"], "StepLimitExceeded");
    }
}
