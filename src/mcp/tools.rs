// MCP tool handlers

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::history::HistoryManager;
use crate::pipeline::{trace_json, Pipeline, PipelineInput};
use crate::session::{SessionOutcome, TraceSession};

/// Session used when a call names none.
pub const DEFAULT_SESSION: &str = "default";

/// Sessions kept when no limit is configured.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Per-session state: the source revisions and the trace in flight.
#[derive(Debug, Default)]
pub struct SessionState {
    pub history: Mutex<HistoryManager<PipelineInput>>,
    pub trace: TraceSession,
}

/// Everything the tools share. Sessions beyond `max_sessions` close the
/// oldest one, cancelling its trace.
#[derive(Debug)]
pub struct ToolContext {
    pub pipeline: Pipeline,
    pub sessions: DashMap<String, Arc<SessionState>>,
    opened: Mutex<VecDeque<String>>,
    max_sessions: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(Pipeline::default())
    }
}

impl ToolContext {
    pub fn new(pipeline: Pipeline) -> Self {
        Self::with_max_sessions(pipeline, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_max_sessions(pipeline: Pipeline, max_sessions: usize) -> Self {
        Self {
            pipeline,
            sessions: DashMap::new(),
            opened: Mutex::new(VecDeque::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn session(&self, args: &HashMap<String, Value>) -> Arc<SessionState> {
        let id = session_id(args);
        if let Some(session) = self.sessions.get(id) {
            return Arc::clone(session.value());
        }

        let mut opened = self.opened.lock();
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Opening session {}", id);
                opened.push_back(id.to_string());
                Arc::new(SessionState::default())
            })
            .clone();
        while opened.len() > self.max_sessions {
            if let Some(oldest) = opened.pop_front() {
                info!("Session limit reached, closing {}", oldest);
                if let Some((_, state)) = self.sessions.remove(&oldest) {
                    state.trace.cancel();
                }
            }
        }
        session
    }

    /// Drop a session and cancel its trace. Returns whether it existed.
    pub fn close(&self, id: &str) -> bool {
        let mut opened = self.opened.lock();
        opened.retain(|open| open != id);
        match self.sessions.remove(id) {
            Some((_, state)) => {
                state.trace.cancel();
                debug!("Closed session {}", id);
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn session_id(args: &HashMap<String, Value>) -> &str {
    args.get("session").and_then(|v| v.as_str()).unwrap_or(DEFAULT_SESSION)
}

fn text_content(text: String) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": text
        }]
    })
}

fn error_content(report: Value) -> Value {
    json!({
        "content": [{
            "type": "text",
            "text": report.to_string()
        }],
        "isError": true
    })
}

/// Explicit input from the arguments, else the session's current revision.
fn input_for(args: &HashMap<String, Value>, session: &SessionState) -> Result<PipelineInput> {
    if args.contains_key("primaryFile") {
        let value = Value::Object(args.clone().into_iter().collect());
        return Ok(serde_json::from_value(value)?);
    }
    session
        .history
        .lock()
        .current()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No source supplied and the session has no revisions"))
}

/// Analyze tool handler
pub async fn analyze(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let session = ctx.session(args);
    let input = input_for(args, &session)?;

    match ctx.pipeline.analyze(&input) {
        Ok(analysis) => Ok(text_content(serde_json::to_string_pretty(&analysis)?)),
        Err(e) => Ok(error_content(json!(e.report()))),
    }
}

/// Trace tool handler. A newer trace request for the same session makes
/// this one return `superseded`.
pub async fn trace(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let session = ctx.session(args);
    let input = input_for(args, &session)?;

    match ctx.pipeline.trace_in_session(&session.trace, &input).await {
        Ok(SessionOutcome::Finished(result)) => {
            let value = trace_json(&result);
            if result.is_ok() {
                Ok(text_content(serde_json::to_string_pretty(&value)?))
            } else {
                Ok(error_content(value))
            }
        }
        Ok(SessionOutcome::Superseded) => {
            info!("Trace request superseded");
            Ok(text_content(json!({ "status": "superseded" }).to_string()))
        }
        Err(e) => Ok(error_content(json!(e.report()))),
    }
}

/// Edit tool handler: record a new source revision.
pub async fn edit(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let session = ctx.session(args);
    if !args.contains_key("primaryFile") {
        return Err(anyhow::anyhow!("Missing primaryFile"));
    }
    let input = input_for(args, &session)?;

    let mut history = session.history.lock();
    history.push(input);
    Ok(text_content(
        json!({
            "revision": history.cursor(),
            "revisions": history.len(),
            "canUndo": history.can_undo(),
            "canRedo": history.can_redo()
        })
        .to_string(),
    ))
}

/// Undo tool handler
pub async fn undo(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let session = ctx.session(args);
    let mut history = session.history.lock();
    let state = history.undo().cloned();
    Ok(revision_content(state, "Nothing to undo", &history))
}

/// Redo tool handler
pub async fn redo(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let session = ctx.session(args);
    let mut history = session.history.lock();
    let state = history.redo().cloned();
    Ok(revision_content(state, "Nothing to redo", &history))
}

/// Close tool handler
pub async fn close(ctx: &ToolContext, args: &HashMap<String, Value>) -> Result<Value> {
    let id = session_id(args);
    let closed = ctx.close(id);
    Ok(text_content(json!({ "session": id, "closed": closed }).to_string()))
}

fn revision_content(state: Option<PipelineInput>, empty: &str, history: &HistoryManager<PipelineInput>) -> Value {
    match state {
        Some(input) => text_content(
            json!({
                "revision": history.cursor(),
                "revisions": history.len(),
                "input": input
            })
            .to_string(),
        ),
        None => text_content(empty.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> HashMap<String, Value> {
        value.as_object().unwrap().clone().into_iter().collect()
    }

    fn text(result: &Value) -> &str {
        result["content"][0]["text"].as_str().unwrap()
    }

    fn source(content: &str) -> Value {
        json!({
            "session": "s1",
            "language": "python",
            "primaryFile": { "path": "main.py", "content": content }
        })
    }

    #[tokio::test]
    async fn test_edit_undo_redo() {
        let ctx = ToolContext::default();
        edit(&ctx, &args(source("x = 1\n"))).await.unwrap();
        edit(&ctx, &args(source("x = 2\n"))).await.unwrap();

        let undone = undo(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        assert!(text(&undone).contains("x = 1"));
        let nothing = undo(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        assert_eq!(text(&nothing), "Nothing to undo");
        let redone = redo(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        assert!(text(&redone).contains("x = 2"));
    }

    #[tokio::test]
    async fn test_trace_uses_current_revision() {
        let ctx = ToolContext::default();
        edit(&ctx, &args(source("x = 1\nx = x + 1\n"))).await.unwrap();
        let result = trace(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        assert!(result.get("isError").is_none());
        let trace: Value = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(trace["status"], "completed");
        assert_eq!(trace["variables"]["x"][1]["value"], 2);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let ctx = ToolContext::default();
        edit(&ctx, &args(source("x = 1\n"))).await.unwrap();
        let err = analyze(&ctx, &args(json!({ "session": "other" }))).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_close_forgets_session() {
        let ctx = ToolContext::default();
        edit(&ctx, &args(source("x = 1\n"))).await.unwrap();
        assert_eq!(ctx.session_count(), 1);

        let closed = close(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        let body: Value = serde_json::from_str(text(&closed)).unwrap();
        assert_eq!(body["closed"], true);
        assert_eq!(ctx.session_count(), 0);

        let again = close(&ctx, &args(json!({ "session": "s1" }))).await.unwrap();
        let body: Value = serde_json::from_str(text(&again)).unwrap();
        assert_eq!(body["closed"], false);

        // a later call starts over with no revisions
        assert!(trace(&ctx, &args(json!({ "session": "s1" }))).await.is_err());
    }

    #[tokio::test]
    async fn test_oldest_session_evicted_at_limit() {
        let ctx = ToolContext::with_max_sessions(Pipeline::default(), 2);
        for id in ["a", "b", "c"] {
            let mut call = source("x = 1\n");
            call["session"] = json!(id);
            edit(&ctx, &args(call)).await.unwrap();
        }
        assert_eq!(ctx.session_count(), 2);
        assert!(!ctx.sessions.contains_key("a"));
        assert!(ctx.sessions.contains_key("b"));
        assert!(ctx.sessions.contains_key("c"));

        // reuse does not reorder or duplicate
        undo(&ctx, &args(json!({ "session": "b" }))).await.unwrap();
        assert_eq!(ctx.session_count(), 2);
        ctx.session(&args(json!({ "session": "d" })));
        assert!(!ctx.sessions.contains_key("b"));
        assert!(ctx.sessions.contains_key("c"));
    }

    #[tokio::test]
    async fn test_analyze_reports_structured_error() {
        let ctx = ToolContext::default();
        let cyclic = json!({
            "language": "python",
            "primaryFile": { "path": "a.py", "content": "import b\n" },
            "auxiliaryFiles": [{ "path": "b.py", "content": "import a\n" }]
        });
        let result = analyze(&ctx, &args(cyclic)).await.unwrap();
        assert_eq!(result["isError"], true);
        let report: Value = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(report["kind"], "CyclicDependency");
    }
}
