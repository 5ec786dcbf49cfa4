//! Interactive shell over the orchestrator API.

use crate::console::{self, RunOutputs};
use hardkit_engine::{CleanupPolicy, Orchestrator, ReportFormat};
use hardkit_schema::{ExecutionMode, Level, ProfileRun};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// One row of the command table: name, usage, description.
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "help",
        usage: "help",
        help: "List commands",
    },
    CommandSpec {
        name: "modules",
        usage: "modules [L1|L2|L3]",
        help: "Show the modules a level runs",
    },
    CommandSpec {
        name: "audit",
        usage: "audit [L1|L2|L3]",
        help: "Check compliance without changing anything",
    },
    CommandSpec {
        name: "harden",
        usage: "harden [L1|L2|L3]",
        help: "Apply the level's policies and capture rollback entries",
    },
    CommandSpec {
        name: "rollbacks",
        usage: "rollbacks",
        help: "List pending rollback entries, most recent first",
    },
    CommandSpec {
        name: "rollback",
        usage: "rollback <entry>",
        help: "Restore one rollback entry",
    },
    CommandSpec {
        name: "cleanup",
        usage: "cleanup all | cleanup <days>",
        help: "Delete all rollback entries, or those older than <days>",
    },
    CommandSpec {
        name: "summary",
        usage: "summary",
        help: "Summarize the last run",
    },
    CommandSpec {
        name: "report",
        usage: "report [text|json|html]",
        help: "Write a report for the last run",
    },
    CommandSpec {
        name: "exit",
        usage: "exit",
        help: "Leave the shell",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Help,
    Modules(Level),
    Run(ExecutionMode, Level),
    Rollbacks,
    Rollback(String),
    Cleanup(CleanupPolicy),
    Summary,
    Report(ReportFormat),
    Exit,
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ShellCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();
    let name = name.to_lowercase();

    let spec = COMMANDS
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| format!("unknown command '{}', try 'help'", name))?;

    let level = |args: &[&str]| -> Result<Level, String> {
        match args {
            [] => Ok(Level::L1),
            [level] => level.parse().map_err(|e: hardkit_common::Error| e.to_string()),
            _ => Err(format!("usage: {}", spec.usage)),
        }
    };

    let command = match spec.name {
        "help" => ShellCommand::Help,
        "modules" => ShellCommand::Modules(level(&args)?),
        "audit" => ShellCommand::Run(ExecutionMode::Audit, level(&args)?),
        "harden" => ShellCommand::Run(ExecutionMode::Harden, level(&args)?),
        "rollbacks" => ShellCommand::Rollbacks,
        "rollback" => match args.as_slice() {
            [entry] => ShellCommand::Rollback(entry.to_string()),
            _ => return Err(format!("usage: {}", spec.usage)),
        },
        "cleanup" => match args.as_slice() {
            ["all"] => ShellCommand::Cleanup(CleanupPolicy::All),
            [days] => days
                .parse()
                .map(|days| ShellCommand::Cleanup(CleanupPolicy::OlderThanDays(days)))
                .map_err(|_| format!("usage: {}", spec.usage))?,
            _ => return Err(format!("usage: {}", spec.usage)),
        },
        "summary" => ShellCommand::Summary,
        "report" => match args.as_slice() {
            [] => ShellCommand::Report(ReportFormat::Html),
            [format] => ShellCommand::Report(
                format
                    .parse()
                    .map_err(|e: hardkit_common::Error| e.to_string())?,
            ),
            _ => return Err(format!("usage: {}", spec.usage)),
        },
        _ => ShellCommand::Exit,
    };

    Ok(Some(command))
}

fn print_help() {
    for command in COMMANDS {
        println!("  {:<32} {}", command.usage, command.help);
    }
}

/// Shell session state.
pub struct Shell<'a> {
    orchestrator: &'a Orchestrator,
    report_dir: PathBuf,
    json: bool,
    last_run: Option<ProfileRun>,
}

impl<'a> Shell<'a> {
    pub fn new(orchestrator: &'a Orchestrator, report_dir: PathBuf, json: bool) -> Self {
        Self {
            orchestrator,
            report_dir,
            json,
            last_run: None,
        }
    }

    /// Read commands from stdin until `exit` or end of input.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        println!(
            "hardkit shell ({}). Type 'help' for commands.",
            self.orchestrator.platform()
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout.write_all(b"hardkit> ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                println!();
                break;
            };

            match parse(&line) {
                Ok(None) => {}
                Ok(Some(ShellCommand::Exit)) => break,
                Ok(Some(command)) => {
                    if let Err(e) = self.dispatch(command).await {
                        println!("error: {:#}", e);
                    }
                }
                Err(message) => println!("{}", message),
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, command: ShellCommand) -> anyhow::Result<()> {
        match command {
            ShellCommand::Help => print_help(),
            ShellCommand::Modules(level) => {
                console::print_modules(self.orchestrator, level, self.json)
            }
            ShellCommand::Run(mode, level) => {
                let run = console::run_profile(self.orchestrator, level, mode, self.json).await?;
                self.last_run = Some(run);
            }
            ShellCommand::Rollbacks => {
                console::print_rollbacks(&self.orchestrator.list_rollbacks()?, self.json)
            }
            ShellCommand::Rollback(entry) => {
                console::apply_rollback(self.orchestrator, &entry, self.json).await?;
            }
            ShellCommand::Cleanup(policy) => {
                let removed = self.orchestrator.cleanup_rollbacks(policy)?;
                console::print_removed(&removed, self.json);
            }
            ShellCommand::Summary => match &self.last_run {
                Some(run) => console::print_run_summary(run, self.json),
                None => println!("No run yet"),
            },
            ShellCommand::Report(format) => match &self.last_run {
                Some(run) => {
                    let outputs = RunOutputs {
                        report: Some(format),
                        report_dir: self.report_dir.clone(),
                        audit_log: None,
                    };
                    console::write_outputs(self.orchestrator, run, &outputs)?;
                }
                None => println!("No run to report on"),
            },
            ShellCommand::Exit => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_runs() {
        assert_eq!(
            parse("audit").unwrap(),
            Some(ShellCommand::Run(ExecutionMode::Audit, Level::L1))
        );
        assert_eq!(
            parse("  HARDEN l3 ").unwrap(),
            Some(ShellCommand::Run(ExecutionMode::Harden, Level::L3))
        );
        assert!(parse("audit L7").is_err());
        assert!(parse("audit L1 L2").is_err());
    }

    #[test]
    fn test_parse_rollback_commands() {
        assert_eq!(
            parse("rollback 20240101-000000_ssh.json").unwrap(),
            Some(ShellCommand::Rollback("20240101-000000_ssh.json".to_string()))
        );
        assert!(parse("rollback").is_err());
        assert_eq!(
            parse("cleanup all").unwrap(),
            Some(ShellCommand::Cleanup(CleanupPolicy::All))
        );
        assert_eq!(
            parse("cleanup 30").unwrap(),
            Some(ShellCommand::Cleanup(CleanupPolicy::OlderThanDays(30)))
        );
        assert!(parse("cleanup soon").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("exit").unwrap(), Some(ShellCommand::Exit));
        assert_eq!(
            parse("report json").unwrap(),
            Some(ShellCommand::Report(ReportFormat::Json))
        );
        assert!(parse("report pdf").is_err());
        assert!(parse("reboot").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn test_every_command_parses() {
        for command in COMMANDS {
            let line = match command.name {
                "rollback" => "rollback 20240101-000000_a.json",
                "cleanup" => "cleanup all",
                name => name,
            };
            assert!(parse(line).unwrap().is_some(), "{}", command.name);
        }
    }
}
