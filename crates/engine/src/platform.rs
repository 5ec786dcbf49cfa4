//! Platform runners: translate a module request into a native invocation.
//!
//! Every invocation is a program plus a discrete argument vector handed
//! straight to process spawn. No shell string is ever assembled, so level
//! values and ledger file names cannot inject commands.

use crate::catalog::Module;
use hardkit_common::{Error, Platform, Result};
use hardkit_schema::{ExecutionMode, Level};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable telling a hardening module where ledger entries go.
pub const LEDGER_DIR_ENV: &str = "HARDKIT_LEDGER_DIR";

/// What to run: one module, one mode.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRequest<'a> {
    pub module: &'a Module,
    pub mode: ExecutionMode,
    pub level: Level,
    /// Ledger entry to restore; only meaningful for rollback.
    pub ledger_path: Option<&'a Path>,
}

impl<'a> ModuleRequest<'a> {
    pub fn new(module: &'a Module, mode: ExecutionMode, level: Level) -> Self {
        Self {
            module,
            mode,
            level,
            ledger_path: None,
        }
    }

    pub fn rollback(module: &'a Module, level: Level, ledger_path: &'a Path) -> Self {
        Self {
            module,
            mode: ExecutionMode::Rollback,
            level,
            ledger_path: Some(ledger_path),
        }
    }
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program name for logs and the audit trail.
    pub fn program_display(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    /// Arguments for logs and the audit trail.
    pub fn args_display(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }
}

/// Knows how a platform launches its modules.
pub trait PlatformRunner: Send + Sync {
    fn platform(&self) -> Platform;

    /// Build the invocation for a request.
    fn invocation(&self, request: &ModuleRequest<'_>) -> Result<Invocation>;
}

/// Runner for the platform a module is written for.
pub fn runner_for(platform: Platform) -> Box<dyn PlatformRunner> {
    match platform {
        Platform::Linux => Box::new(PosixRunner::new()),
        Platform::Windows => Box::new(WindowsRunner::new()),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Runner for Linux and other POSIX hosts.
///
/// Shell and Python modules go through their interpreter; anything else is
/// executed directly and must carry the executable bit.
/// Arguments: `<mode> <level>`, or `Rollback <ledger-path>`.
pub struct PosixRunner;

impl PosixRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PosixRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformRunner for PosixRunner {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn invocation(&self, request: &ModuleRequest<'_>) -> Result<Invocation> {
        let path = &request.module.path;

        let base = match extension_of(path).as_str() {
            "sh" => Invocation::new("sh").arg(path),
            "py" => Invocation::new("python3").arg(path),
            _ => {
                if !is_executable(path) {
                    return Err(Error::ModuleNotExecutable(path.clone()));
                }
                Invocation::new(path)
            }
        };

        let invocation = base.arg(request.mode.as_str());
        Ok(match (request.mode, request.ledger_path) {
            (ExecutionMode::Rollback, Some(ledger)) => invocation.arg(ledger),
            (ExecutionMode::Rollback, None) => invocation,
            _ => invocation.arg(request.level.as_str()),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Runner for Windows hosts.
///
/// PowerShell scripts run through `powershell.exe` (or `pwsh`) with named
/// parameters: `-Mode <mode> -Level <level>` or `-Mode Rollback -RollbackFile <path>`.
pub struct WindowsRunner {
    powershell: Option<PathBuf>,
}

impl WindowsRunner {
    pub fn new() -> Self {
        let powershell = ["powershell.exe", "powershell", "pwsh.exe", "pwsh"]
            .iter()
            .find_map(|name| which::which(name).ok());
        Self { powershell }
    }

    /// Use a specific PowerShell binary.
    pub fn with_powershell(powershell: PathBuf) -> Self {
        Self {
            powershell: Some(powershell),
        }
    }
}

impl Default for WindowsRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformRunner for WindowsRunner {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn invocation(&self, request: &ModuleRequest<'_>) -> Result<Invocation> {
        let path = &request.module.path;

        if extension_of(path) == "ps1" {
            let powershell = self.powershell.clone().ok_or_else(|| Error::Spawn {
                program: "powershell.exe".to_string(),
                reason: "no PowerShell found in PATH".to_string(),
            })?;

            let invocation = Invocation::new(powershell)
                .arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-ExecutionPolicy")
                .arg("Bypass")
                .arg("-File")
                .arg(path)
                .arg("-Mode")
                .arg(request.mode.as_str());

            return Ok(match (request.mode, request.ledger_path) {
                (ExecutionMode::Rollback, Some(ledger)) => {
                    invocation.arg("-RollbackFile").arg(ledger)
                }
                (ExecutionMode::Rollback, None) => invocation,
                _ => invocation.arg("-Level").arg(request.level.as_str()),
            });
        }

        let invocation = Invocation::new(path).arg(request.mode.as_str());
        Ok(match (request.mode, request.ledger_path) {
            (ExecutionMode::Rollback, Some(ledger)) => invocation.arg(ledger),
            (ExecutionMode::Rollback, None) => invocation,
            _ => invocation.arg(request.level.as_str()),
        })
    }
}
