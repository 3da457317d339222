use anyhow::Result;
use serde_json::json;

use crate::cli::report_error;
use crate::cli::sources::{OutputFormat, SourceArgs};
use crate::config::Config;
use crate::pipeline::Pipeline;

/// Print the resolved file order and reference graph.
pub fn resolve(sources: SourceArgs, format: OutputFormat, config: &Config) -> Result<()> {
    let input = sources.load(config)?;
    let unit = Pipeline::new(config)
        .resolve(&input)
        .map_err(|e| report_error(e, format))?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "language": unit.language,
                "primary": unit.primary,
                "order": unit.paths().collect::<Vec<_>>(),
                "dependencies": unit.dependencies,
                "unresolved": unit.unresolved,
                "fingerprint": unit.fingerprint,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Language: {}", unit.language.display_name());
            println!("Fingerprint: {}", unit.fingerprint);
            println!("\nOrder:");
            for (i, path) in unit.paths().enumerate() {
                let deps: Vec<&str> = unit
                    .dependencies
                    .get(path)
                    .map(|deps| deps.iter().map(String::as_str).collect())
                    .unwrap_or_default();
                if deps.is_empty() {
                    println!("  {}. {}", i + 1, path);
                } else {
                    println!("  {}. {} (depends on {})", i + 1, path, deps.join(", "));
                }
            }
            if !unit.unresolved.is_empty() {
                println!("\nUnresolved:");
                for reference in &unit.unresolved {
                    println!("  {}:{} - {}", reference.referencing_file, reference.line, reference.reference);
                }
            }
        }
    }
    Ok(())
}
