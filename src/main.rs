mod inputs;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dagrun_core::config::EngineConfig;
use dagrun_engine::{ensure_valid, validate, write_ndjson, RunOptions, Scheduler};
use dagrun_nodes::NodeRegistry;

#[derive(Parser)]
#[command(name = "dagrun", version, about = "Run workflow graphs as a stream of step events")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "dagrun.toml", env = "DAGRUN_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a graph and print its events as NDJSON
    Run {
        /// Graph document (JSON)
        graph: PathBuf,
        /// Run input: inline JSON, or @file
        #[arg(long)]
        input: Option<String>,
        /// JSON object of secret name -> value
        #[arg(long)]
        secrets: Option<PathBuf>,
        /// Soft wall-clock budget for the run
        #[arg(long)]
        max_runtime_ms: Option<u64>,
        /// Base delay between retry attempts
        #[arg(long)]
        backoff_base_ms: Option<u64>,
        /// Extra host allowed for network calls (suffix match)
        #[arg(long = "allow-host")]
        allow_host: Vec<String>,
        /// Skip graph validation before running
        #[arg(long)]
        no_validate: bool,
    },
    /// Check a graph without running it
    Validate {
        /// Graph document (JSON)
        graph: PathBuf,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Events go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dagrun=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "dagrun", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = EngineConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { graph } => {
            let doc = inputs::read_graph(&graph)?;
            let issues = validate(&doc);
            if issues.is_empty() {
                println!("{}: ok ({} nodes, {} edges)", graph.display(), doc.nodes.len(), doc.edges.len());
            } else {
                for issue in &issues {
                    println!("{}: {}", graph.display(), issue);
                }
                std::process::exit(1);
            }
        }
        Commands::Run {
            graph,
            input,
            secrets,
            max_runtime_ms,
            backoff_base_ms,
            allow_host,
            no_validate,
        } => {
            let doc = inputs::read_graph(&graph)?;
            if no_validate {
                warn!("Graph validation skipped");
            } else {
                ensure_valid(&doc)?;
            }

            if let Some(ms) = max_runtime_ms {
                config.run.max_runtime_ms = ms;
            }
            if let Some(ms) = backoff_base_ms {
                config.run.backoff_base_ms = ms;
            }
            config.egress.policy.allow_hosts(allow_host);

            let input = inputs::parse_input(input.as_deref())?;
            let secrets = inputs::load_secrets(secrets.as_deref(), std::env::vars_os())?;
            let registry = NodeRegistry::from_config(&config)?;
            let options = RunOptions::from(&config.run);

            // Stop dequeuing on Ctrl-C; the node in flight finishes
            let cancel = options.cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Cancelling run...");
                cancel.cancel();
            });

            let events = Scheduler::new(Arc::new(registry)).run(
                doc,
                input,
                Arc::new(secrets),
                options,
            );
            let mut stdout = tokio::io::stdout();
            let end = write_ndjson(events, &mut stdout).await?;

            if !end.is_some_and(|e| e.ok) {
                std::process::exit(1);
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}
