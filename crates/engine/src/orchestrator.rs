//! Orchestrator API used by the CLI and the interactive shell.
//!
//! One orchestrator is bound to one platform and one immutable catalog. The
//! platform is checked against the catalog when the orchestrator is built, so
//! an unsupported platform fails at startup rather than mid-run.

use crate::cancel::CancellationToken;
use crate::catalog::{Module, ModuleCatalog};
use crate::events::ProgressSink;
use crate::executor::{Executor, ExecutorConfig, ProcessExecutor};
use crate::ledger::{CleanupPolicy, RollbackLedger, RollbackOutcome};
use crate::lock::HostLock;
use crate::report::ReportGenerator;
use crate::runner::ProfileRunner;
use hardkit_common::{Platform, Result};
use hardkit_schema::{CatalogConfig, ExecutionMode, Level, ProfileRun};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Catalog used when no configuration file is given.
pub const DEFAULT_CATALOG: &str = include_str!("../catalog/default.yaml");

/// Parse the built-in catalog. Relative paths stay relative to the working directory.
pub fn default_config() -> Result<CatalogConfig> {
    CatalogConfig::from_yaml(DEFAULT_CATALOG)
}

pub struct Orchestrator {
    platform: Platform,
    config: CatalogConfig,
    catalog: Arc<ModuleCatalog>,
    executor: Arc<dyn Executor>,
    ledger: RollbackLedger,
    runner: ProfileRunner,
}

impl Orchestrator {
    /// Orchestrator running modules as local child processes.
    pub fn new(config: CatalogConfig, platform: Platform) -> Result<Self> {
        let executor = ProcessExecutor::new(
            platform,
            ExecutorConfig {
                timeout: config.module_timeout_secs.map(Duration::from_secs),
                ledger_dir: Some(config.ledger_dir.clone()),
            },
        );
        Self::with_executor(config, platform, Arc::new(executor))
    }

    /// Orchestrator over the built-in catalog.
    pub fn from_default(platform: Platform) -> Result<Self> {
        Self::new(default_config()?, platform)
    }

    pub fn with_executor(
        config: CatalogConfig,
        platform: Platform,
        executor: Arc<dyn Executor>,
    ) -> Result<Self> {
        let catalog = ModuleCatalog::from_config(&config)?;
        catalog.ensure_supported(platform)?;
        let catalog = Arc::new(catalog);

        let ledger = RollbackLedger::new(config.ledger_dir.clone(), platform);
        let runner = ProfileRunner::new(
            platform,
            catalog.clone(),
            executor.clone(),
            ledger.clone(),
            config.lock_path(),
        );

        info!(
            "Orchestrator ready for {} (modules in {:?}, ledger in {:?})",
            platform,
            config.platform_dir(platform),
            config.ledger_dir
        );

        Ok(Self {
            platform,
            config,
            catalog,
            executor,
            ledger,
            runner,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn ledger_dir(&self) -> &Path {
        self.ledger.dir()
    }

    /// Modules a run at `level` would execute, in order.
    pub fn resolve_modules(&self, level: Level) -> Vec<Module> {
        self.catalog.resolve(self.platform, level)
    }

    /// Run a full audit or hardening profile.
    ///
    /// Fails with `RunInProgress` if another run holds the host lock.
    pub async fn run_profile(
        &self,
        level: Level,
        mode: ExecutionMode,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<ProfileRun> {
        self.runner.run(level, mode, cancel, sink).await
    }

    /// Pending ledger entries, most recent first.
    pub fn list_rollbacks(&self) -> Result<Vec<String>> {
        self.ledger.list()
    }

    /// Restore one ledger entry. The entry is deleted only if the rollback succeeded.
    pub async fn consume_rollback(
        &self,
        file_name: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<RollbackOutcome> {
        let _lock = HostLock::acquire(&self.config.lock_path(), &format!("rollback:{}", file_name))?;
        self.ledger
            .consume(&self.catalog, self.executor.as_ref(), file_name, cancel, sink)
            .await
    }

    /// Delete ledger entries. Returns the removed file names.
    pub fn cleanup_rollbacks(&self, policy: CleanupPolicy) -> Result<Vec<String>> {
        let _lock = HostLock::acquire(&self.config.lock_path(), "cleanup")?;
        self.ledger.cleanup(policy)
    }

    /// Hand a finished run's records to a report generator, in run order.
    pub fn generate_report(
        &self,
        run: &ProfileRun,
        generator: &dyn ReportGenerator,
    ) -> Result<PathBuf> {
        generator.generate(&run.records, run.platform, run.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardkit_common::Error;

    #[test]
    fn test_default_catalog_is_valid() {
        let config = default_config().unwrap();
        assert!(config.platforms.contains_key(&Platform::Linux));
        assert!(config.platforms.contains_key(&Platform::Windows));
        assert_eq!(config.module_timeout_secs, Some(300));
    }

    #[test]
    fn test_default_levels_are_supersets() {
        let orchestrator = Orchestrator::from_default(Platform::Linux).unwrap();
        let l1 = orchestrator.resolve_modules(Level::L1);
        let l2 = orchestrator.resolve_modules(Level::L2);
        let l3 = orchestrator.resolve_modules(Level::L3);
        assert!(!l1.is_empty());
        assert_eq!(&l2[..l1.len()], &l1[..]);
        assert_eq!(&l3[..l2.len()], &l2[..]);
        assert!(l3.len() > l2.len());
    }

    #[test]
    fn test_unsupported_platform_fails_at_startup() {
        let mut config = default_config().unwrap();
        config.platforms.remove(&Platform::Windows);
        let err = Orchestrator::new(config, Platform::Windows).err().unwrap();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }
}
