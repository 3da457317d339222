use anyhow::Result;
use tracing::info;

use crate::cli::report_error;
use crate::cli::sources::{OutputFormat, SourceArgs};
use crate::config::Config;
use crate::graph::{EdgeKind, NodeKind};
use crate::pipeline::{Analysis, Pipeline};

/// Resolve, parse and print the flow graph.
pub fn analyze(sources: SourceArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let input = sources.load(config)?;
    let pipeline = Pipeline::new(config);
    let analysis = pipeline.analyze(&input).map_err(|e| report_error(e, format))?;
    info!("Analysis of {} complete", analysis.unit.primary);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        OutputFormat::Text => print!("{}", render(&analysis)),
    }
    Ok(())
}

pub fn render(analysis: &Analysis) -> String {
    let mut out = String::new();
    let graph = &analysis.graph;

    out.push_str(&format!("Files ({}):\n", analysis.unit.files.len()));
    for file in &analysis.unit.files {
        out.push_str(&format!("  {}\n", file.path));
    }

    let functions: Vec<_> = graph.nodes_of_kind(NodeKind::Function).collect();
    out.push_str(&format!("\nFunctions ({}):\n", functions.len()));
    for node in functions {
        out.push_str(&format!("  {}:{} - {}\n", node.file, node.line, node.id));
    }

    let calls: Vec<_> = graph.edges_of_kind(EdgeKind::Call).collect();
    out.push_str(&format!("\nCalls ({}):\n", calls.len()));
    for edge in calls {
        out.push_str(&format!("  {} -> {}\n", edge.source_node_id, edge.target_node_id));
    }

    let flows: Vec<_> = graph.edges_of_kind(EdgeKind::VariableFlow).collect();
    if !flows.is_empty() {
        out.push_str(&format!("\nVariable flows ({}):\n", flows.len()));
        for edge in flows {
            out.push_str(&format!("  {}: {}\n", edge.source_node_id, edge.label));
        }
    }

    if !analysis.unresolved.is_empty() {
        out.push_str(&format!("\nUnresolved references ({}):\n", analysis.unresolved.len()));
        for reference in &analysis.unresolved {
            out.push_str(&format!(
                "  {}:{} - {}\n",
                reference.referencing_file, reference.line, reference.reference
            ));
        }
    }

    if !analysis.parse_errors.is_empty() {
        out.push_str(&format!("\nParse errors ({}):\n", analysis.parse_errors.len()));
        for error in &analysis.parse_errors {
            out.push_str(&format!("  {}\n", error));
        }
    }
    out
}
