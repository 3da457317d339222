use anyhow::Result;
use tracing::info;

use crate::cli::report_error;
use crate::cli::sources::{OutputFormat, SourceArgs};
use crate::config::Config;
use crate::error::{FlowError, TraceError};
use crate::pipeline::{trace_json, Pipeline};
use crate::sandbox::Trace;

/// Run the code in the sandbox and print the trace. A trace that stopped
/// early is still printed before the command fails.
pub async fn trace(sources: SourceArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let input = sources.load(config)?;
    let pipeline = Pipeline::new(config);

    let result = match pipeline.trace(&input).await {
        Ok(trace) => Ok(trace),
        Err(FlowError::Trace(e)) => Err(e),
        Err(e) => return Err(report_error(e, format)),
    };
    print_trace(&result, format)?;

    match result {
        Ok(trace) => {
            info!("Trace completed with {} steps", trace.steps.len());
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{}", e)),
    }
}

pub fn print_trace(result: &Result<Trace, TraceError>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&trace_json(result))?),
        OutputFormat::Text => match result {
            Ok(trace) => print!("{}", render(trace)),
            Err(e) => {
                if let Some(partial) = e.partial_trace() {
                    print!("{}", render(partial));
                }
                println!("\n{}", e);
            }
        },
    }
    Ok(())
}

pub fn render(trace: &Trace) -> String {
    let mut out = String::new();
    out.push_str(&format!("Status: {:?} ({} steps)\n", trace.status, trace.steps.len()));

    out.push_str("\nSteps:\n");
    for step in &trace.steps {
        let detail = step.detail.as_deref().map(|d| format!(" {}", d)).unwrap_or_default();
        out.push_str(&format!(
            "  #{:<4} {}:{:<4} {:<10} {}{}\n",
            step.index,
            step.file_id,
            step.line,
            format!("{:?}", step.event).to_lowercase(),
            step.function,
            detail
        ));
    }

    if !trace.variables.is_empty() {
        out.push_str("\nVariables:\n");
        for (name, history) in &trace.variables {
            let values: Vec<String> = history
                .iter()
                .map(|snapshot| format!("#{}={}", snapshot.step_index, snapshot.value))
                .collect();
            out.push_str(&format!("  {}: {}\n", name, values.join(", ")));
        }
    }

    if !trace.output.is_empty() {
        out.push_str("\nOutput:\n");
        for line in &trace.output {
            out.push_str(&format!("  {}\n", line));
        }
    }

    if let Some(fault) = &trace.fault {
        out.push_str(&format!("\nFault at {}:{}: {}\n", fault.file, fault.line, fault.message));
    }
    out
}
