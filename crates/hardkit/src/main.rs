//! hardkit - audit, harden and roll back operating system security policy.

mod console;
mod shell;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::RunOutputs;
use hardkit_common::Platform;
use hardkit_engine::{default_config, CleanupPolicy, Orchestrator, ReportFormat};
use hardkit_schema::{CatalogConfig, ExecutionMode, Level, RunStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Catalog picked up from the working directory when `--config` is absent.
const LOCAL_CONFIG: &str = "hardkit.yaml";

#[derive(Parser)]
#[command(name = "hardkit")]
#[command(
    author,
    version,
    about = "Run policy modules to audit, harden and roll back host security settings"
)]
struct Cli {
    /// Catalog file (defaults to ./hardkit.yaml, then the built-in catalog)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target platform (linux, windows); defaults to the running OS
    #[arg(long, global = true)]
    os: Option<Platform>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List the modules a level runs
    Modules {
        #[arg(long, short, default_value = "L1")]
        level: Level,
    },

    /// Check compliance without changing anything
    Audit(RunArgs),

    /// Apply policies and capture rollback entries
    Harden(RunArgs),

    /// Inspect and apply rollback entries
    Rollback {
        #[command(subcommand)]
        command: RollbackCommands,
    },

    /// Start an interactive shell
    Shell {
        /// Directory for reports written from the shell
        #[arg(long, default_value = ".")]
        report_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Policy level; lower levels are included
    #[arg(long, short, default_value = "L1")]
    level: Level,

    /// Write a report after the run (text, json, html)
    #[arg(long)]
    report: Option<ReportFormat>,

    /// Directory for the report
    #[arg(long, default_value = ".")]
    report_dir: PathBuf,

    /// Write the execution audit trail as JSONL
    #[arg(long)]
    audit_log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum RollbackCommands {
    /// List pending entries, most recent first
    List,

    /// Restore one entry; it is deleted only if the rollback succeeds
    Apply {
        /// Ledger file name, e.g. 20240115-093000_PasswordHistory.json
        entry: String,
    },

    /// Delete entries
    Cleanup {
        /// Only delete entries older than this many days
        #[arg(long, conflicts_with = "all")]
        older_than_days: Option<u32>,

        /// Delete every entry
        #[arg(long)]
        all: bool,
    },
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }
}

fn load_config(explicit: Option<&Path>) -> anyhow::Result<CatalogConfig> {
    if let Some(path) = explicit {
        return CatalogConfig::load(path).with_context(|| format!("loading {:?}", path));
    }

    let local = Path::new(LOCAL_CONFIG);
    if local.is_file() {
        debug!("Using catalog {:?}", local);
        return Ok(CatalogConfig::load(local)?);
    }

    debug!("Using built-in catalog");
    Ok(default_config()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let platform = match cli.os {
        Some(platform) => platform,
        None => Platform::current()?,
    };
    let config = load_config(cli.config.as_deref())?;
    let orchestrator = Orchestrator::new(config, platform)?;
    let json = cli.json;

    match cli.command {
        Commands::Modules { level } => console::print_modules(&orchestrator, level, json),

        Commands::Audit(args) => run(&orchestrator, ExecutionMode::Audit, args, json).await?,

        Commands::Harden(args) => run(&orchestrator, ExecutionMode::Harden, args, json).await?,

        Commands::Rollback { command } => match command {
            RollbackCommands::List => {
                console::print_rollbacks(&orchestrator.list_rollbacks()?, json)
            }
            RollbackCommands::Apply { entry } => {
                let outcome = console::apply_rollback(&orchestrator, &entry, json).await?;
                if !outcome.consumed {
                    std::process::exit(1);
                }
            }
            RollbackCommands::Cleanup {
                older_than_days,
                all,
            } => {
                let policy = match (older_than_days, all) {
                    (Some(days), _) => CleanupPolicy::OlderThanDays(days),
                    (None, true) => CleanupPolicy::All,
                    (None, false) => {
                        anyhow::bail!("choose --all or --older-than-days <n>")
                    }
                };
                let removed = orchestrator.cleanup_rollbacks(policy)?;
                console::print_removed(&removed, json);
            }
        },

        Commands::Shell { report_dir } => {
            shell::Shell::new(&orchestrator, report_dir, json).run().await?
        }
    }

    Ok(())
}

async fn run(
    orchestrator: &Orchestrator,
    mode: ExecutionMode,
    args: RunArgs,
    json: bool,
) -> anyhow::Result<()> {
    let run = console::run_profile(orchestrator, args.level, mode, json).await?;

    let outputs = RunOutputs {
        report: args.report,
        report_dir: args.report_dir,
        audit_log: args.audit_log,
    };
    console::write_outputs(orchestrator, &run, &outputs)?;
    let elapsed = run.completed_at.unwrap_or_else(chrono::Utc::now) - run.started_at;
    info!(
        "Run {} finished in {}ms: {}",
        run.id,
        elapsed.num_milliseconds(),
        run.status
    );

    if run.status == RunStatus::Cancelled {
        std::process::exit(130);
    }
    Ok(())
}
