//! Terminal front end shared by the CLI subcommands and the shell.

use anyhow::Context;
use hardkit_engine::{
    summarize, CancellationToken, ComplianceSummary, FileReportGenerator, Orchestrator,
    ReportFormat, RollbackOutcome, RunEvent,
};
use hardkit_schema::{AuditLog, ExecutionMode, Level, ProfileRun};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What to write after a run finishes.
#[derive(Debug, Clone, Default)]
pub struct RunOutputs {
    pub report: Option<ReportFormat>,
    pub report_dir: PathBuf,
    pub audit_log: Option<PathBuf>,
}

/// Run a profile, printing events as they arrive. Ctrl-C cancels the run.
pub async fn run_profile(
    orchestrator: &Orchestrator,
    level: Level,
    mode: ExecutionMode,
    json: bool,
) -> anyhow::Result<ProfileRun> {
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(&cancel);

    let (tx, mut rx) = mpsc::channel::<RunEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let result = orchestrator.run_profile(level, mode, &cancel, &tx).await;
    drop(tx);
    let _ = printer.await;
    interrupt.abort();

    Ok(result?)
}

fn spawn_interrupt_handler(cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            cancel.cancel();
        }
    })
}

/// Write the report and audit log a run was asked for.
pub fn write_outputs(
    orchestrator: &Orchestrator,
    run: &ProfileRun,
    outputs: &RunOutputs,
) -> anyhow::Result<()> {
    if let Some(format) = outputs.report {
        let generator = FileReportGenerator::new(&outputs.report_dir, format);
        let path = orchestrator.generate_report(run, &generator)?;
        println!("Report written to {}", path.display());
    }

    if let Some(path) = &outputs.audit_log {
        write_audit_log(run, path)?;
        info!("Audit log written to {:?}", path);
    }

    Ok(())
}

fn write_audit_log(run: &ProfileRun, path: &Path) -> anyhow::Result<()> {
    let log = AuditLog::from_entries(run.audit.clone());
    let mut content = log.to_jsonl();
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(path, content).with_context(|| format!("writing audit log {:?}", path))
}

pub fn print_event(event: &RunEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }

    match event {
        RunEvent::RunStarted {
            run_id,
            mode,
            level,
            total,
        } => println!("{} {} ({} modules), run {}", mode, level, total, run_id),
        RunEvent::ModuleStarted {
            index,
            total,
            module,
        } => println!("[{}/{}] {}", index, total, module),
        RunEvent::Record { record, .. } => println!(
            "    {:<13} {}: {}",
            record.status.as_str(),
            record.parameter,
            record.details
        ),
        RunEvent::ModuleFinished { status, .. } => {
            if !status.is_success() {
                println!("    -> {}", status);
            }
        }
        RunEvent::RunFinished {
            status, summary, ..
        } => {
            println!();
            print_summary(summary);
            println!("Run {}", status);
        }
    }
}

pub fn print_summary(summary: &ComplianceSummary) {
    println!(
        "Compliant: {}  Not compliant: {}  Other: {}  Total: {}  ({:.1}% compliant)",
        summary.compliant,
        summary.not_compliant,
        summary.errors,
        summary.total,
        summary.compliance_rate()
    );
}

/// Summary of the last run, for the shell.
pub fn print_run_summary(run: &ProfileRun, json: bool) {
    let summary = summarize(&run.records);
    if json {
        if let Ok(line) = serde_json::to_string(&summary) {
            println!("{}", line);
        }
    } else {
        println!("{} {} run {}: {}", run.mode, run.level, run.id, run.status);
        print_summary(&summary);
    }
}

pub fn print_rollbacks(entries: &[String], json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(entries) {
            println!("{}", line);
        }
    } else if entries.is_empty() {
        println!("No pending rollback entries");
    } else {
        for entry in entries {
            println!("{}", entry);
        }
    }
}

pub async fn apply_rollback(
    orchestrator: &Orchestrator,
    file_name: &str,
    json: bool,
) -> anyhow::Result<RollbackOutcome> {
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(&cancel);

    let (tx, mut rx) = mpsc::channel::<RunEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event, json);
        }
    });

    let result = orchestrator.consume_rollback(file_name, &cancel, &tx).await;
    drop(tx);
    let _ = printer.await;
    interrupt.abort();

    let outcome = result?;
    if outcome.consumed {
        println!("Rolled back {} with {}", outcome.entry, outcome.module);
    } else {
        println!(
            "Rollback of {} did not succeed ({}); the entry was kept",
            outcome.entry, outcome.execution.status
        );
    }
    Ok(outcome)
}

pub fn print_removed(removed: &[String], json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(removed) {
            println!("{}", line);
        }
    } else {
        println!("Removed {} rollback entries", removed.len());
        for name in removed {
            println!("  {}", name);
        }
    }
}

pub fn print_modules(orchestrator: &Orchestrator, level: Level, json: bool) {
    let modules = orchestrator.resolve_modules(level);
    if json {
        let list: Vec<_> = modules
            .iter()
            .map(|m| {
                serde_json::json!({
                    "name": m.name,
                    "level": m.level,
                    "path": m.path,
                    "present": m.exists(),
                })
            })
            .collect();
        if let Ok(line) = serde_json::to_string(&list) {
            println!("{}", line);
        }
        return;
    }

    println!(
        "{} modules for {} at {}:",
        modules.len(),
        orchestrator.platform(),
        level
    );
    for module in &modules {
        let marker = if module.exists() { "" } else { "  (missing)" };
        println!("  {}  {}{}", module.level, module.name, marker);
    }
}
