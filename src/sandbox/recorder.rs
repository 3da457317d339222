// Trace state shared between the interpreter thread and its owner

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as Json;

use super::{EventKind, Trace, TraceFault, TraceStatus, TraceStep, VariableSnapshot};

#[derive(Debug, Default)]
struct State {
    steps: Vec<TraceStep>,
    variables: BTreeMap<String, Vec<VariableSnapshot>>,
    output: Vec<String>,
    /// Text written since the last newline.
    pending: String,
    truncated: bool,
}

/// Append-only trace under construction. The interpreter writes through
/// one clone while the owner can snapshot another at any point, so a
/// trace abandoned on timeout still yields everything recorded so far.
#[derive(Debug, Clone)]
pub(crate) struct Recorder {
    state: Arc<Mutex<State>>,
    max_output_lines: usize,
}

impl Recorder {
    pub fn new(max_output_lines: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_output_lines,
        }
    }

    pub fn step_count(&self) -> usize {
        self.state.lock().steps.len()
    }

    pub fn last_step(&self) -> Option<usize> {
        self.state.lock().steps.last().map(|s| s.index)
    }

    pub fn push_step(&self, file: &str, line: u32, event: EventKind, function: &str, detail: Option<String>) -> usize {
        let mut state = self.state.lock();
        let index = state.steps.len();
        state.steps.push(TraceStep {
            index,
            file_id: file.to_string(),
            line,
            event,
            function: function.to_string(),
            detail,
        });
        index
    }

    pub fn push_snapshot(&self, name: &str, step_index: usize, value: Json, scope_id: &str) {
        let mut state = self.state.lock();
        state.variables.entry(name.to_string()).or_default().push(VariableSnapshot {
            name: name.to_string(),
            step_index,
            value,
            scope_id: scope_id.to_string(),
        });
    }

    /// Append program output, splitting it into lines.
    pub fn write(&self, text: &str) {
        let mut state = self.state.lock();
        for ch in text.chars() {
            if ch == '\n' {
                let line = std::mem::take(&mut state.pending);
                self.push_line(&mut state, line);
            } else {
                state.pending.push(ch);
            }
        }
    }

    fn push_line(&self, state: &mut State, line: String) {
        if state.output.len() < self.max_output_lines {
            state.output.push(line);
        } else if !state.truncated {
            state.truncated = true;
            state.output.push("... output truncated".to_string());
        }
    }

    pub fn snapshot(&self, status: TraceStatus, fault: Option<TraceFault>) -> Trace {
        let state = self.state.lock();
        let mut output = state.output.clone();
        if !state.pending.is_empty() && !state.truncated && output.len() < self.max_output_lines {
            output.push(state.pending.clone());
        }
        Trace {
            status,
            steps: state.steps.clone(),
            variables: state.variables.clone(),
            output,
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_split_into_lines() {
        let recorder = Recorder::new(10);
        recorder.write("a");
        recorder.write("b\nc\n");
        recorder.write("tail");
        let trace = recorder.snapshot(TraceStatus::Completed, None);
        assert_eq!(trace.output, vec!["ab", "c", "tail"]);
    }

    #[test]
    fn test_output_capped() {
        let recorder = Recorder::new(2);
        recorder.write("1\n2\n3\n4\n");
        let trace = recorder.snapshot(TraceStatus::Completed, None);
        assert_eq!(trace.output, vec!["1", "2", "... output truncated"]);
    }

    #[test]
    fn test_steps_indexed_in_order() {
        let recorder = Recorder::new(10);
        let first = recorder.push_step("a.py", 1, EventKind::Assignment, "<module>", None);
        let second = recorder.push_step("a.py", 2, EventKind::Branch, "<module>", Some("true".into()));
        assert_eq!((first, second), (0, 1));
        recorder.push_snapshot("x", first, Json::from(1), "<module>#0");
        let trace = recorder.snapshot(TraceStatus::Running, None);
        assert!(trace.is_contiguous());
        assert_eq!(trace.history("x").len(), 1);
    }
}
