// CLI command implementations

pub mod analyze;
pub mod languages;
pub mod resolve;
pub mod serve;
pub mod sources;
pub mod trace;
pub mod watch;

use crate::error::FlowError;
use sources::OutputFormat;

/// Print a pipeline error the way the chosen format expects and turn it
/// into the command's failure.
pub fn report_error(error: FlowError, format: OutputFormat) -> anyhow::Error {
    let report = error.report();
    if format == OutputFormat::Json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("Failed to serialize error report: {}", e),
        }
    }
    anyhow::anyhow!("{}: {}", report.kind, report.message)
}
