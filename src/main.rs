use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use flowtrace::cli;
use flowtrace::cli::sources::{OutputFormat, SourceArgs};
use flowtrace::config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "flowtrace")]
#[command(version)]
#[command(about = "Resolve multi-file sources, build flow graphs and trace sandboxed execution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .flowtrace.toml
    #[arg(short, long, global = true, default_value = ".")]
    project: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, parse and print the flow graph
    Analyze {
        #[command(flatten)]
        sources: SourceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the resolved file order and references
    Resolve {
        #[command(flatten)]
        sources: SourceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the code in the sandbox and print the execution trace
    Trace {
        #[command(flatten)]
        sources: SourceArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Override the step limit
        #[arg(long)]
        max_steps: Option<usize>,

        /// Override the timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Re-run analyze and trace whenever a source file changes
    Watch {
        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Start the stdio JSON-RPC (MCP) server
    Serve,

    /// List supported languages
    Languages,
}

/// Logs go to stderr so `serve` keeps stdout for protocol messages.
fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_project_dir(&cli.project);

    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("flowtrace v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Analyze { sources, format } => {
            cli::analyze::analyze(sources, format, &config)?;
        }

        Commands::Resolve { sources, format } => {
            cli::resolve::resolve(sources, format, &config)?;
        }

        Commands::Trace {
            sources,
            format,
            max_steps,
            timeout_ms,
        } => {
            if let Some(max_steps) = max_steps {
                config.sandbox.max_steps = max_steps;
            }
            if let Some(timeout_ms) = timeout_ms {
                config.sandbox.timeout_ms = timeout_ms;
            }
            cli::trace::trace(sources, format, &config).await?;
        }

        Commands::Watch { sources } => {
            cli::watch::watch(sources, &config).await?;
        }

        Commands::Serve => {
            cli::serve::serve(&cli.project, &config).await?;
        }

        Commands::Languages => {
            cli::languages::list_languages(&config);
        }
    }

    Ok(())
}
