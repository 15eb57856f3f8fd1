//! HexClaw daemon launcher.
//!
//! `hexclaw run` is the long-running mode; the admin subcommands are
//! one-shot utilities over the same state store.

use anyhow::Result;
use clap::{Parser, Subcommand};
use hexclaw::App;
use hexclaw_artifacts::suggest_next;
use hexclaw_logging::{init_logging, LogConfig};
use hexclaw_protocol::HexClawConfig;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "hexclaw", about = "Autonomous security orchestration daemon")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon (default)
    Run {
        /// Drain the queue once and exit (for cron / CI)
        #[arg(long)]
        once: bool,

        /// Skip external tool HTTP; synthesise success results
        #[arg(long)]
        dry_run: bool,

        /// Seed the queue before running, e.g. recon_osint:example.com
        #[arg(long, value_name = "SKILL:TARGET")]
        enqueue: Option<String>,
    },

    /// Print the token ledger summary
    Stats,

    /// Print inference cache statistics
    CacheStats,

    /// Aggregate one job's artifacts
    Aggregate { job_id: String },

    /// Rule-based next-step suggestions for a job
    Suggest { job_id: String },

    /// Poll threat feeds once and print/deliver matching alerts
    Monitor {
        /// Log matches instead of delivering them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "hexclaw",
        verbose: cli.verbose,
    }) {
        eprintln!("Failed to initialize logging: {:#}", err);
        return ExitCode::FAILURE;
    }

    let config = match HexClawConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: HexClawConfig) -> Result<()> {
    let app = App::build(config).await?;

    match cli.command.unwrap_or(Commands::Run {
        once: false,
        dry_run: false,
        enqueue: None,
    }) {
        Commands::Run {
            once,
            dry_run,
            enqueue,
        } => app.run_daemon(once, dry_run, enqueue.as_deref()).await,

        Commands::Stats => {
            let summary = app.db.ledger_summary().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        Commands::CacheStats => {
            println!("{}", serde_json::to_string_pretty(&app.cache.stats())?);
            Ok(())
        }

        Commands::Aggregate { job_id } => {
            let aggregate = app.artifacts.aggregate(&job_id)?;
            println!("{}", serde_json::to_string_pretty(&aggregate)?);
            Ok(())
        }

        Commands::Suggest { job_id } => {
            let aggregate = app.artifacts.aggregate(&job_id)?;
            for (index, step) in suggest_next(&aggregate).iter().enumerate() {
                println!("[P{}] {}. {}", step.priority, index + 1, step.action);
                println!("      {}", step.reason);
            }
            Ok(())
        }

        Commands::Monitor { dry_run } => {
            use hexclaw_monitor::{DedupeStore, Monitor};
            use std::sync::Arc;
            use std::time::Duration;

            let mut monitor = Monitor::new(
                Arc::clone(&app.transport),
                Some(Arc::clone(&app.router)),
                Some(app.db.clone()),
                app.config.rss_feeds.clone(),
                Duration::from_secs(app.config.monitor_interval_sec),
                app.config.alert_min_severity,
                DedupeStore::new(None),
            );
            if dry_run {
                monitor = monitor.dry_run();
            }
            let sent = monitor.run_once().await;
            println!("Sent {} alert(s)", sent.len());
            println!("{}", serde_json::to_string_pretty(&monitor.stats())?);
            Ok(())
        }
    }
}
