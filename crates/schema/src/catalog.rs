//! Catalog configuration: which modules exist for which platform and level.

use crate::level::Level;
use crate::validation;
use hardkit_common::{Error, Platform, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Module names declared per level, in execution order.
pub type LevelTable = BTreeMap<Level, Vec<String>>;

/// Immutable configuration handed to the catalog and orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root of the module tree; modules live in `<scripts_dir>/<platform>/<name>`.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Directory holding rollback ledger entries.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Host lock file. Defaults to `hardkit.lock` in the system temp directory.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    /// Wall clock limit for a single module.
    #[serde(default)]
    pub module_timeout_secs: Option<u64>,
    pub platforms: BTreeMap<Platform, LevelTable>,
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("rollback")
}

impl CatalogConfig {
    /// Parse and validate a YAML catalog document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let document: serde_json::Value = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid catalog YAML: {}", e)))?;

        let result = validation::validate_catalog(&document)?;
        if !result.valid {
            let reasons: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            return Err(Error::SchemaValidation(reasons.join("; ")));
        }

        serde_json::from_value(document)
            .map_err(|e| Error::Config(format!("invalid catalog: {}", e)))
    }

    /// Load a catalog file. Relative directories resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {:?}: {}", path, e)))?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    /// Make relative paths relative to `base`.
    pub fn rebase(&mut self, base: &Path) {
        if self.scripts_dir.is_relative() {
            self.scripts_dir = base.join(&self.scripts_dir);
        }
        if self.ledger_dir.is_relative() {
            self.ledger_dir = base.join(&self.ledger_dir);
        }
        if let Some(lock) = &self.lock_path {
            if lock.is_relative() {
                self.lock_path = Some(base.join(lock));
            }
        }
    }

    /// The host lock path, falling back to the system temp directory.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("hardkit.lock"))
    }

    /// Directory holding the modules for a platform.
    pub fn platform_dir(&self, platform: Platform) -> PathBuf {
        self.scripts_dir.join(platform.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
scripts_dir: mods
ledger_dir: /var/lib/hardkit/rollback
module_timeout_secs: 60
platforms:
  linux:
    L1: [password_history.sh, ssh_root_login.sh]
    L2: [auditd.sh]
  windows:
    L1: [PasswordHistory.ps1]
"#;

    #[test]
    fn test_parse_catalog() {
        let config = CatalogConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.scripts_dir, PathBuf::from("mods"));
        assert_eq!(config.module_timeout_secs, Some(60));
        assert_eq!(
            config.platforms[&Platform::Linux][&Level::L1],
            vec!["password_history.sh".to_string(), "ssh_root_login.sh".to_string()]
        );
        assert!(config.platforms[&Platform::Windows].get(&Level::L2).is_none());
    }

    #[test]
    fn test_rebase_relative_dirs() {
        let mut config = CatalogConfig::from_yaml(SAMPLE).unwrap();
        config.rebase(Path::new("/opt/hardkit"));
        assert_eq!(config.scripts_dir, PathBuf::from("/opt/hardkit/mods"));
        assert_eq!(config.ledger_dir, PathBuf::from("/var/lib/hardkit/rollback"));
        assert_eq!(
            config.platform_dir(Platform::Windows),
            PathBuf::from("/opt/hardkit/mods/windows")
        );
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let yaml = "platforms:\n  solaris:\n    L1: [a.sh]\n";
        let err = CatalogConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::SchemaValidation(_)), "{:?}", err);
    }

    #[test]
    fn test_unknown_level_rejected() {
        let yaml = "platforms:\n  linux:\n    L9: [a.sh]\n";
        assert!(CatalogConfig::from_yaml(yaml).is_err());
    }
}
