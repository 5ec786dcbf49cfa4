//! Rollback ledger: files capturing pre-change state, consumed at most once.
//!
//! An entry is a JSON file named `<YYYYMMDD-HHMMSS>_<ModuleBaseName>.json`
//! holding at least a `value` field. The file's existence is the only record
//! of whether it is still pending; a successful rollback deletes it.

use crate::cancel::CancellationToken;
use crate::catalog::{Module, ModuleCatalog};
use crate::events::ProgressSink;
use crate::executor::{ExecutionOutcome, Executor};
use crate::platform::ModuleRequest;
use hardkit_common::{Error, Platform, Result, Timestamp};
use hardkit_schema::{validate_ledger_entry, ResultRecord};
use regex::Regex;
use serde_json::{json, Value};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Extension of ledger files written and listed by hardkit.
pub const LEDGER_EXTENSION: &str = "json";

/// Upper bound on name collisions tolerated when capturing an entry.
const MAX_CAPTURE_ATTEMPTS: i64 = 3600;

fn ledger_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<stamp>\d{8}-\d{6})_(?P<module>.+)\.(?P<ext>[A-Za-z0-9]+)$")
            .expect("valid ledger name pattern")
    })
}

/// A parsed ledger file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerName {
    pub file_name: String,
    pub captured_at: Timestamp,
    pub module: String,
    pub extension: String,
}

impl LedgerName {
    /// Parse `<timestamp>_<ModuleBaseName>.<ext>`. Bare file names only.
    pub fn parse(file_name: &str) -> Result<Self> {
        let invalid = || Error::InvalidLedgerName(file_name.to_string());

        if file_name.contains(['/', '\\']) {
            return Err(invalid());
        }
        let caps = ledger_name_pattern().captures(file_name).ok_or_else(invalid)?;
        let captured_at = Timestamp::parse_ledger_stamp(&caps["stamp"]).ok_or_else(invalid)?;

        Ok(Self {
            file_name: file_name.to_string(),
            captured_at,
            module: caps["module"].to_string(),
            extension: caps["ext"].to_string(),
        })
    }

    /// Name for a new entry.
    pub fn format(captured_at: Timestamp, module_base_name: &str) -> String {
        format!(
            "{}_{}.{}",
            captured_at.to_ledger_stamp(),
            module_base_name,
            LEDGER_EXTENSION
        )
    }
}

/// Which entries `cleanup` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    All,
    OlderThanDays(u32),
}

/// Result of consuming one ledger entry.
#[derive(Debug, Clone)]
pub struct RollbackOutcome {
    pub entry: String,
    pub module: String,
    /// Whether the entry was deleted. False leaves it in place for a retry.
    pub consumed: bool,
    pub execution: ExecutionOutcome,
}

/// Ledger directory for one platform's modules.
#[derive(Debug, Clone)]
pub struct RollbackLedger {
    dir: PathBuf,
    platform: Platform,
}

impl RollbackLedger {
    pub fn new(dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            dir: dir.into(),
            platform,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, name: &LedgerName) -> PathBuf {
        self.dir.join(&name.file_name)
    }

    /// Pending entries, most recent first.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|name| name.file_name)
            .collect())
    }

    fn entries(&self) -> Result<Vec<LedgerName>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            match LedgerName::parse(&file_name) {
                Ok(name) if name.extension == LEDGER_EXTENSION => names.push(name),
                _ => debug!("Ignoring non-ledger file {:?}", file_name),
            }
        }

        names.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(names)
    }

    /// Map an entry's file name to the catalog module that restores it.
    pub fn resolve(&self, catalog: &ModuleCatalog, file_name: &str) -> Result<Module> {
        let name = LedgerName::parse(file_name)?;
        catalog
            .find_by_base_name(self.platform, &name.module)
            .ok_or_else(|| Error::UnknownModule {
                module: name.module.clone(),
                platform: self.platform.to_string(),
            })
    }

    /// Read an entry and check it is a non-empty JSON object with a `value`.
    pub fn load(&self, file_name: &str) -> Result<Value> {
        let name = LedgerName::parse(file_name)?;
        let path = self.entry_path(&name);
        let invalid = |reason: String| Error::InvalidLedgerEntry {
            file: file_name.to_string(),
            reason,
        };

        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(invalid("no such entry".to_string()))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("entry is empty".to_string()));
        }

        let entry: Value = serde_json::from_slice(&content)
            .map_err(|e| invalid(format!("not valid JSON: {}", e)))?;
        let validation = validate_ledger_entry(&entry)?;
        if !validation.valid {
            return Err(invalid("missing value field".to_string()));
        }
        Ok(entry)
    }

    /// Run the rollback for one entry and delete it only if the module succeeded.
    ///
    /// Name, module and content are all checked before anything is spawned.
    pub async fn consume(
        &self,
        catalog: &ModuleCatalog,
        executor: &dyn Executor,
        file_name: &str,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<RollbackOutcome> {
        let module = self.resolve(catalog, file_name)?;
        self.load(file_name)?;

        let name = LedgerName::parse(file_name)?;
        let path = self.entry_path(&name);
        info!("Rolling back {} with {}", file_name, module.name);

        let request = ModuleRequest::rollback(&module, module.level, &path);
        let execution = executor.execute(&request, cancel, sink).await?;

        let succeeded =
            execution.succeeded() && !execution.records.iter().any(|r| r.status.is_fault());

        let consumed = if succeeded {
            std::fs::remove_file(&path)?;
            info!("Consumed ledger entry {}", file_name);
            true
        } else {
            warn!(
                "Rollback of {} did not succeed ({}); entry kept for retry",
                file_name, execution.status
            );
            false
        };

        Ok(RollbackOutcome {
            entry: file_name.to_string(),
            module: module.name,
            consumed,
            execution,
        })
    }

    /// Persist the pre-change `value` a hardening record carries.
    ///
    /// Returns the new entry's path, or `None` when the record has no value.
    pub fn capture(&self, module: &Module, record: &ResultRecord) -> Result<Option<PathBuf>> {
        let Some(value) = &record.value else {
            return Ok(None);
        };

        std::fs::create_dir_all(&self.dir)?;
        let now = Timestamp::now();
        let entry = json!({
            "value": value,
            "parameter": record.parameter,
            "module": module.name,
            "captured_at": now,
        });
        let body = serde_json::to_vec_pretty(&entry)?;

        for offset in 0..MAX_CAPTURE_ATTEMPTS {
            let file_name = LedgerName::format(now.plus_seconds(offset), module.base_name());
            let path = self.dir.join(&file_name);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    fill_entry(&path, &mut file, &body)?;
                    debug!("Captured rollback entry {:?}", path);
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Other(format!(
            "no free ledger name for {} in {:?}",
            module.name, self.dir
        )))
    }

    /// Remove entries according to the policy. Returns the removed file names.
    pub fn cleanup(&self, policy: CleanupPolicy) -> Result<Vec<String>> {
        let cutoff = match policy {
            CleanupPolicy::All => None,
            CleanupPolicy::OlderThanDays(days) => {
                Some(Timestamp::now().plus_seconds(-(i64::from(days) * 86_400)))
            }
        };

        let mut removed = Vec::new();
        for name in self.entries()? {
            if cutoff.map_or(true, |cutoff| name.captured_at < cutoff) {
                std::fs::remove_file(self.entry_path(&name))?;
                removed.push(name.file_name);
            }
        }
        info!("Removed {} ledger entries from {:?}", removed.len(), self.dir);
        Ok(removed)
    }
}

/// Write a freshly created entry. A failed write removes the file again so a
/// partial entry never shows up as pending.
fn fill_entry(path: &Path, file: &mut impl Write, body: &[u8]) -> Result<()> {
    if let Err(e) = file.write_all(body).and_then(|_| file.flush()) {
        if let Err(remove) = std::fs::remove_file(path) {
            warn!("Failed to remove partial ledger entry {:?}: {}", path, remove);
        }
        return Err(Error::Io(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use crate::executor::{ExecutorConfig, ProcessExecutor};
    use hardkit_schema::{CatalogConfig, Level, ResultStatus};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_ledger_name() {
        let name = LedgerName::parse("20240115-093000_PasswordHistory.json").unwrap();
        assert_eq!(name.module, "PasswordHistory");
        assert_eq!(name.extension, "json");
        assert_eq!(name.captured_at.to_ledger_stamp(), "20240115-093000");

        let name = LedgerName::parse("20240115-093000_ssh_root_login.json").unwrap();
        assert_eq!(name.module, "ssh_root_login");
    }

    #[test]
    fn test_invalid_ledger_names() {
        for bad in [
            "PasswordHistory.json",
            "20240115-093000PasswordHistory.json",
            "20240115-093000_PasswordHistory",
            "2024-01-15_PasswordHistory.json",
            "20241399-093000_PasswordHistory.json",
            "../20240115-093000_PasswordHistory.json",
        ] {
            let err = LedgerName::parse(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidLedgerName(_)), "{}", bad);
        }
    }

    fn catalog(scripts: &Path) -> ModuleCatalog {
        let mut table = BTreeMap::new();
        table.insert(Level::L1, vec!["restore.sh".to_string(), "broken.sh".to_string()]);
        ModuleCatalog::from_config(&CatalogConfig {
            scripts_dir: scripts.to_path_buf(),
            ledger_dir: scripts.join("rollback"),
            lock_path: None,
            module_timeout_secs: None,
            platforms: BTreeMap::from([(Platform::Linux, table)]),
        })
        .unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        catalog: ModuleCatalog,
        ledger: RollbackLedger,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let linux = dir.path().join("linux");
        std::fs::create_dir_all(&linux).unwrap();
        std::fs::write(
            linux.join("restore.sh"),
            "echo '{\"status\":\"Success\",\"parameter\":\"restored\",\"details\":\"'\"$2\"'\"}'\n",
        )
        .unwrap();
        std::fs::write(linux.join("broken.sh"), "echo 'cannot restore' >&2\nexit 3\n").unwrap();

        let ledger_dir = dir.path().join("rollback");
        std::fs::create_dir_all(&ledger_dir).unwrap();
        Fixture {
            catalog: catalog(dir.path()),
            ledger: RollbackLedger::new(ledger_dir, Platform::Linux),
            _dir: dir,
        }
    }

    fn write_entry(ledger: &RollbackLedger, file_name: &str, body: &str) -> PathBuf {
        let path = ledger.dir().join(file_name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_list_most_recent_first() {
        let f = fixture();
        write_entry(&f.ledger, "20240101-000000_restore.json", "{\"value\":1}");
        write_entry(&f.ledger, "20240301-000000_restore.json", "{\"value\":2}");
        write_entry(&f.ledger, "20240201-000000_broken.json", "{\"value\":3}");
        write_entry(&f.ledger, "notes.txt", "ignored");
        write_entry(&f.ledger, "20240401-000000_restore.bak", "ignored");

        assert_eq!(
            f.ledger.list().unwrap(),
            vec![
                "20240301-000000_restore.json",
                "20240201-000000_broken.json",
                "20240101-000000_restore.json"
            ]
        );
    }

    #[test]
    fn test_list_of_missing_dir_is_empty() {
        let ledger = RollbackLedger::new("/nonexistent/hardkit/rollback", Platform::Linux);
        assert!(ledger.list().unwrap().is_empty());
    }

    #[test]
    fn test_resolve_unknown_module() {
        let f = fixture();
        let err = f
            .ledger
            .resolve(&f.catalog, "20240101-000000_Firewall.json")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModule { ref module, .. } if module == "Firewall"));

        let module = f.ledger.resolve(&f.catalog, "20240101-000000_restore.json").unwrap();
        assert_eq!(module.name, "restore.sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_consume_empty_entry_spawns_nothing() {
        let f = fixture();
        let path = write_entry(&f.ledger, "20240101-000000_restore.json", "");
        let executor = ProcessExecutor::new(Platform::Linux, ExecutorConfig::default());

        let err = f
            .ledger
            .consume(
                &f.catalog,
                &executor,
                "20240101-000000_restore.json",
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLedgerEntry { .. }));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_consume_entry_without_value_is_invalid() {
        let f = fixture();
        let path = write_entry(&f.ledger, "20240101-000000_restore.json", "{\"parameter\":\"x\"}");
        let executor = ProcessExecutor::new(Platform::Linux, ExecutorConfig::default());

        let err = f
            .ledger
            .consume(
                &f.catalog,
                &executor,
                "20240101-000000_restore.json",
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLedgerEntry { ref reason, .. } if reason.contains("value")));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_consume_success_deletes_entry() {
        let f = fixture();
        let path = write_entry(&f.ledger, "20240101-000000_restore.json", "{\"value\":24}");
        let executor = ProcessExecutor::new(Platform::Linux, ExecutorConfig::default());

        let outcome = f
            .ledger
            .consume(
                &f.catalog,
                &executor,
                "20240101-000000_restore.json",
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap();
        assert!(outcome.consumed);
        assert!(!path.exists());
        assert_eq!(outcome.execution.records[0].status, ResultStatus::Success);
        assert_eq!(outcome.execution.records[0].details, path.to_string_lossy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_consume_failure_keeps_entry() {
        let f = fixture();
        let path = write_entry(&f.ledger, "20240101-000000_broken.json", "{\"value\":\"x\"}");
        let executor = ProcessExecutor::new(Platform::Linux, ExecutorConfig::default());

        let outcome = f
            .ledger
            .consume(
                &f.catalog,
                &executor,
                "20240101-000000_broken.json",
                &CancellationToken::new(),
                &NullSink,
            )
            .await
            .unwrap();
        assert!(!outcome.consumed);
        assert!(path.exists());
        assert_eq!(outcome.execution.records.last().unwrap().status, ResultStatus::Failure);
    }

    #[test]
    fn test_capture_writes_entry_named_after_module() {
        let f = fixture();
        let module = f.catalog.resolve(Platform::Linux, Level::L1)[0].clone();
        let record = ResultRecord::new("MaxAuthTries", ResultStatus::Success, "set to 4")
            .with_value(json!(6));

        let first = f.ledger.capture(&module, &record).unwrap().unwrap();
        let second = f.ledger.capture(&module, &record).unwrap().unwrap();
        assert_ne!(first, second);

        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_restore.json"));
        let entry = f.ledger.load(&name).unwrap();
        assert_eq!(entry["value"], json!(6));
        assert_eq!(entry["parameter"], json!("MaxAuthTries"));
        assert_eq!(f.ledger.list().unwrap().len(), 2);
    }

    #[test]
    fn test_capture_without_value_is_noop() {
        let f = fixture();
        let module = f.catalog.resolve(Platform::Linux, Level::L1)[0].clone();
        let record = ResultRecord::new("A", ResultStatus::Compliant, "");
        assert!(f.ledger.capture(&module, &record).unwrap().is_none());
        assert!(f.ledger.list().unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_policies() {
        let f = fixture();
        let recent = LedgerName::format(Timestamp::now(), "restore");
        write_entry(&f.ledger, &recent, "{\"value\":1}");
        write_entry(&f.ledger, "20200101-000000_restore.json", "{\"value\":2}");

        let removed = f.ledger.cleanup(CleanupPolicy::OlderThanDays(30)).unwrap();
        assert_eq!(removed, vec!["20200101-000000_restore.json"]);
        assert_eq!(f.ledger.list().unwrap(), vec![recent.clone()]);

        let removed = f.ledger.cleanup(CleanupPolicy::All).unwrap();
        assert_eq!(removed, vec![recent]);
        assert!(f.ledger.list().unwrap().is_empty());
    }

    struct BrokenDisk;

    impl Write for BrokenDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("20240115-093000_restore.json");
        std::fs::File::create(&path).unwrap();

        let err = fill_entry(&path, &mut BrokenDisk, b"{\"value\": 1}").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!path.exists());
    }
}
