use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::analyze;
use crate::cli::sources::{OutputFormat, SourceArgs};
use crate::cli::trace::print_trace;
use crate::config::Config;
use crate::pipeline::watcher::SourceWatcher;
use crate::pipeline::Pipeline;
use crate::session::{SessionOutcome, TraceSession};

/// Re-run analysis and tracing whenever a source file under the watched
/// directory changes. A change that lands while a trace is still running
/// cancels that trace.
pub async fn watch(sources: SourceArgs, config: &Config) -> Result<()> {
    let language = sources.language()?;
    let watch_dir = sources.base_dir();
    let pipeline = Pipeline::new(config);
    let session = Arc::new(TraceSession::new());

    run_once(&sources, config, &pipeline, &session);

    let watcher = SourceWatcher::new(
        watch_dir.clone(),
        language,
        Duration::from_millis(config.watch.debounce_ms),
    );
    println!("Watching {} (Ctrl+C to stop)", watch_dir.display());

    watcher
        .watch(|changed: Vec<PathBuf>| {
            info!("{} files changed", changed.len());
            run_once(&sources, config, &pipeline, &session);
            async {}
        })
        .await
}

fn run_once(sources: &SourceArgs, config: &Config, pipeline: &Pipeline, session: &Arc<TraceSession>) {
    let input = match sources.load(config) {
        Ok(input) => input,
        Err(e) => {
            warn!("Could not load sources: {:#}", e);
            return;
        }
    };

    match pipeline.analyze(&input) {
        Ok(analysis) => print!("{}", analyze::render(&analysis)),
        Err(e) => {
            println!("{}", e);
            return;
        }
    }

    let pipeline = pipeline.clone();
    let session = Arc::clone(session);
    tokio::spawn(async move {
        match pipeline.trace_in_session(&session, &input).await {
            Ok(SessionOutcome::Finished(result)) => {
                if let Err(e) = print_trace(&result, OutputFormat::Text) {
                    error!("Failed to print trace: {}", e);
                }
            }
            Ok(SessionOutcome::Superseded) => info!("Trace superseded by a newer change"),
            Err(e) => println!("{}", e),
        }
    });
}
