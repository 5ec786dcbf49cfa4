//! Module executor: runs one module as a child process and streams its output.

use crate::cancel::CancellationToken;
use crate::events::{ProgressSink, RunEvent};
use crate::platform::{runner_for, Invocation, ModuleRequest, PlatformRunner, LEDGER_DIR_ENV};
use crate::protocol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hardkit_common::{Error, Platform, Result};
use hardkit_schema::{ExecutionMode, ProcessStatus, ResultRecord};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything one module invocation produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Parsed and synthesized records, in emission order.
    pub records: Vec<ResultRecord>,
    pub status: ProcessStatus,
    /// Program that was (or would have been) spawned.
    pub program: String,
    pub args: Vec<String>,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// Whether the module ran to completion with exit code zero.
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }
}

/// Runs modules. Module-level faults come back as records, never as `Err`.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute one module. Records are emitted to `sink` as they are read.
    ///
    /// Fails only when the module cannot be invoked at all.
    async fn execute(
        &self,
        request: &ModuleRequest<'_>,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionOutcome>;
}

/// Executor settings.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Kill a module that runs longer than this.
    pub timeout: Option<Duration>,
    /// Passed to hardening modules through the environment.
    pub ledger_dir: Option<PathBuf>,
}

/// Local child-process executor.
pub struct ProcessExecutor {
    config: ExecutorConfig,
    runner: Box<dyn PlatformRunner>,
}

impl ProcessExecutor {
    /// Executor for modules of the given platform.
    pub fn new(platform: Platform, config: ExecutorConfig) -> Self {
        Self::with_runner(runner_for(platform), config)
    }

    pub fn with_runner(runner: Box<dyn PlatformRunner>, config: ExecutorConfig) -> Self {
        Self { config, runner }
    }
}

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Collects records for one invocation and forwards each to the sink.
struct RecordStream<'a> {
    module: &'a str,
    sink: &'a dyn ProgressSink,
    records: Vec<ResultRecord>,
}

impl<'a> RecordStream<'a> {
    async fn push(&mut self, record: ResultRecord) {
        self.sink
            .emit(RunEvent::Record {
                module: self.module.to_string(),
                record: record.clone(),
            })
            .await;
        self.records.push(record);
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        request: &ModuleRequest<'_>,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionOutcome> {
        let module = request.module;
        let started_at = Utc::now();

        if module.platform != self.runner.platform() {
            return Err(Error::UnsupportedPlatform(format!(
                "{} module {} on a {} runner",
                module.platform,
                module.name,
                self.runner.platform()
            )));
        }

        let mut stream = RecordStream {
            module: &module.name,
            sink,
            records: Vec::new(),
        };

        if !module.exists() {
            warn!("Module not found: {:?}", module.path);
            stream.push(ResultRecord::module_not_found(&module.name)).await;
            return Ok(ExecutionOutcome {
                records: stream.records,
                status: ProcessStatus::NotFound,
                program: module.path.to_string_lossy().to_string(),
                args: Vec::new(),
                stderr: String::new(),
                started_at,
                completed_at: Utc::now(),
            });
        }

        let invocation = self.runner.invocation(request)?;
        let program = invocation.program_display();
        let args = invocation.args_display();
        debug!("Spawning {} {:?}", program, args);

        let mut child = self.command(&invocation, request.mode).spawn().map_err(|e| Error::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let stderr_task: Option<JoinHandle<String>> = child.stderr.take().map(|mut stderr| {
            let name = module.name.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    warn!("Failed reading stderr of {}: {}", name, e);
                }
                String::from_utf8_lossy(&buf).to_string()
            })
        });

        let cancelled = cancel.cancelled();
        tokio::pin!(cancelled);
        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut interrupt = None;

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                tokio::select! {
                    read = reader.read_until(b'\n', &mut buf) => match read {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf).to_string();
                            buf.clear();
                            if let Some(record) = protocol::parse_line(&line) {
                                stream.push(record).await;
                            }
                        }
                        Err(e) => {
                            warn!("Failed reading output of {}: {}", module.name, e);
                            break;
                        }
                    },
                    _ = &mut cancelled => {
                        interrupt = Some(Interrupt::Cancelled);
                        break;
                    }
                    _ = &mut deadline => {
                        interrupt = Some(Interrupt::TimedOut);
                        break;
                    }
                }
            }
        }

        // Output is drained; the process may still be running.
        let exit = if interrupt.is_none() {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = &mut cancelled => {
                    interrupt = Some(Interrupt::Cancelled);
                    None
                }
                _ = &mut deadline => {
                    interrupt = Some(Interrupt::TimedOut);
                    None
                }
            }
        } else {
            None
        };

        let status = match (interrupt, exit) {
            (Some(interrupt), _) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", module.name, e);
                }
                if let Some(task) = &stderr_task {
                    task.abort();
                }
                match interrupt {
                    Interrupt::Cancelled => {
                        info!("Cancelled module {}", module.name);
                        stream.push(ResultRecord::cancelled(&module.name)).await;
                        ProcessStatus::Cancelled
                    }
                    Interrupt::TimedOut => {
                        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                        warn!("Module {} timed out after {}s", module.name, secs);
                        stream.push(ResultRecord::timed_out(&module.name, secs)).await;
                        ProcessStatus::TimedOut
                    }
                }
            }
            // A module that dies while the run is being cancelled was
            // interrupted, whatever signal got to it first.
            (None, Some(Ok(exit_status))) if !exit_status.success() && cancel.is_cancelled() => {
                info!("Module {} exited during cancellation", module.name);
                if let Some(task) = &stderr_task {
                    task.abort();
                }
                stream.push(ResultRecord::cancelled(&module.name)).await;
                ProcessStatus::Cancelled
            }
            (None, Some(Ok(exit_status))) => match exit_status.code() {
                Some(code) => ProcessStatus::Exited { code },
                None => ProcessStatus::Terminated,
            },
            (None, Some(Err(e))) => {
                warn!("Failed waiting for {}: {}", module.name, e);
                ProcessStatus::Terminated
            }
            (None, None) => ProcessStatus::Terminated,
        };

        let stderr = match stderr_task {
            Some(task) if !matches!(status, ProcessStatus::Cancelled | ProcessStatus::TimedOut) => {
                task.await.unwrap_or_default()
            }
            _ => String::new(),
        };

        if matches!(status, ProcessStatus::Terminated)
            || matches!(status, ProcessStatus::Exited { code } if code != 0)
        {
            warn!("Module {} failed ({})", module.name, status);
            stream
                .push(ResultRecord::module_failure(&module.name, &stderr))
                .await;
        }

        Ok(ExecutionOutcome {
            records: stream.records,
            status,
            program,
            args,
            stderr,
            started_at,
            completed_at: Utc::now(),
        })
    }
}

impl ProcessExecutor {
    fn command(&self, invocation: &Invocation, mode: ExecutionMode) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Modules get their own process group so a terminal interrupt
        // reaches only hardkit, which then cancels and kills them itself.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.as_std_mut().process_group(0);
        }
        #[cfg(windows)]
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);

        if mode == ExecutionMode::Harden {
            if let Some(dir) = &self.config.ledger_dir {
                command.env(LEDGER_DIR_ENV, dir);
            }
        }

        command
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::catalog::Module;
    use crate::events::{FnSink, NullSink};
    use hardkit_schema::{Level, ResultStatus};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> Module {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        Module {
            name: name.to_string(),
            platform: Platform::Linux,
            level: Level::L1,
            path,
        }
    }

    fn executor() -> ProcessExecutor {
        ProcessExecutor::new(Platform::Linux, ExecutorConfig::default())
    }

    async fn run(executor: &ProcessExecutor, module: &Module) -> ExecutionOutcome {
        executor
            .execute(
                &ModuleRequest::new(module, ExecutionMode::Audit, Level::L1),
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_three_records_exit_zero() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "three.sh",
            r#"echo '{"status":"Compliant","parameter":"A","details":"ok"}'
echo '{"status":"NotCompliant","parameter":"B","details":"bad"}'
echo '{"status":"Info","parameter":"C","details":"fyi"}'
"#,
        );

        let outcome = run(&executor(), &module).await;
        assert_eq!(outcome.status, ProcessStatus::Exited { code: 0 });
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records.iter().all(|r| !r.status.is_fault()));
        assert_eq!(outcome.records[1].parameter, "B");
    }

    #[tokio::test]
    async fn test_one_record_then_exit_one() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "fails.sh",
            r#"echo '{"status":"Compliant","parameter":"A","details":"ok"}'
echo 'registry key locked' >&2
exit 1
"#,
        );

        let outcome = run(&executor(), &module).await;
        assert_eq!(outcome.status, ProcessStatus::Exited { code: 1 });
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].status, ResultStatus::Compliant);
        assert_eq!(outcome.records[1].status, ResultStatus::Failure);
        assert_eq!(outcome.records[1].parameter, "Module Error: fails.sh");
        assert_eq!(outcome.records[1].details, "registry key locked");
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_stop_processing() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "noisy.sh",
            r#"echo 'not json'
echo '{"status":"Compliant","parameter":"A","details":"ok"}'
"#,
        );

        let outcome = run(&executor(), &module).await;
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].status, ResultStatus::Warning);
        assert_eq!(outcome.records[0].details, "not json");
        assert_eq!(outcome.records[1].status, ResultStatus::Compliant);
    }

    #[tokio::test]
    async fn test_silent_module_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let module = script(dir.path(), "quiet.sh", "exit 0\n");

        let outcome = run(&executor(), &module).await;
        assert!(outcome.succeeded());
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn test_missing_module_synthesizes_error() {
        let module = Module {
            name: "gone.sh".to_string(),
            platform: Platform::Linux,
            level: Level::L1,
            path: PathBuf::from("/nonexistent/hardkit/gone.sh"),
        };

        let outcome = run(&executor(), &module).await;
        assert_eq!(outcome.status, ProcessStatus::NotFound);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].status, ResultStatus::Error);
        assert_eq!(outcome.records[0].details, "module not found");
    }

    #[tokio::test]
    async fn test_arguments_reach_module() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "args.sh",
            r#"printf '{"status":"Info","parameter":"args","details":"%s %s"}\n' "$1" "$2""#,
        );

        let outcome = executor()
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Harden, Level::L3),
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap();
        assert_eq!(outcome.records[0].details, "Harden L3");
    }

    #[tokio::test]
    async fn test_records_are_streamed_before_exit() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "stream.sh",
            r#"echo '{"status":"Compliant","parameter":"first","details":""}'
sleep 0.2
echo '{"status":"Compliant","parameter":"second","details":""}'
"#,
        );

        let seen = Mutex::new(Vec::new());
        let sink = FnSink(|event: RunEvent| {
            if let RunEvent::Record { record, .. } = event {
                seen.lock().unwrap().push(record.parameter);
            }
        });
        let outcome = executor()
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Audit, Level::L1),
                &CancellationToken::new(),
                &sink,
            )
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "slow.sh",
            r#"echo '{"status":"Compliant","parameter":"A","details":""}'
exec sleep 30
"#,
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = executor()
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Audit, Level::L1),
                &cancel,
                &NullSink,
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(outcome.status, ProcessStatus::Cancelled);
        let last = outcome.records.last().unwrap();
        assert_eq!(last.status, ResultStatus::Error);
        assert_eq!(last.details, "cancelled");
    }

    #[tokio::test]
    async fn test_child_dying_during_cancel_is_cancelled() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "slow.sh",
            r#"printf '{"status":"Info","parameter":"pid","details":"%s"}\n' "$$"
exec sleep 30
"#,
        );

        // The child gets SIGINT and the token is cancelled at the same
        // moment, as with Ctrl-C in a terminal.
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let sink = FnSink(move |event: RunEvent| {
            if let RunEvent::Record { record, .. } = event {
                if record.parameter == "pid" {
                    std::process::Command::new("kill")
                        .args(["-INT", &record.details])
                        .status()
                        .unwrap();
                    trigger.cancel();
                }
            }
        });

        let outcome = executor()
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Audit, Level::L1),
                &cancel,
                &sink,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, ProcessStatus::Cancelled);
        assert!(outcome.records.iter().all(|r| r.status != ResultStatus::Failure));
        let last = outcome.records.last().unwrap();
        assert_eq!(last.status, ResultStatus::Error);
        assert_eq!(last.details, "cancelled");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_module_leads_its_own_process_group() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "group.sh",
            r#"printf '{"status":"Info","parameter":"group","details":"%s %s"}\n' "$$" "$(cut -d' ' -f5 /proc/$$/stat)""#,
        );

        let outcome = run(&executor(), &module).await;
        let ids: Vec<&str> = outcome.records[0].details.split(' ').collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = TempDir::new().unwrap();
        let module = script(dir.path(), "hang.sh", "exec sleep 30\n");

        let executor = ProcessExecutor::new(
            Platform::Linux,
            ExecutorConfig {
                timeout: Some(Duration::from_millis(300)),
                ledger_dir: None,
            },
        );
        let outcome = run(&executor, &module).await;
        assert_eq!(outcome.status, ProcessStatus::TimedOut);
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].details.starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_ledger_dir_exported_only_when_hardening() {
        let dir = TempDir::new().unwrap();
        let module = script(
            dir.path(),
            "env.sh",
            r#"printf '{"status":"Info","parameter":"ledger","details":"%s"}\n' "${HARDKIT_LEDGER_DIR:-unset}""#,
        );
        let executor = ProcessExecutor::new(
            Platform::Linux,
            ExecutorConfig {
                timeout: None,
                ledger_dir: Some(PathBuf::from("/srv/ledger")),
            },
        );

        let audit = run(&executor, &module).await;
        assert_eq!(audit.records[0].details, "unset");

        let harden = executor
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Harden, Level::L1),
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap();
        assert_eq!(harden.records[0].details, "/srv/ledger");
    }

    #[tokio::test]
    async fn test_platform_mismatch_fails_the_call() {
        let module = Module {
            name: "PasswordHistory.ps1".to_string(),
            platform: Platform::Windows,
            level: Level::L1,
            path: PathBuf::from("PasswordHistory.ps1"),
        };
        let err = executor()
            .execute(
                &ModuleRequest::new(&module, ExecutionMode::Audit, Level::L1),
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }
}
