//! Module catalog: resolves (platform, level) to an ordered module list.
//!
//! The catalog is built once from a [`CatalogConfig`] and never changes.
//! Resolution is pure: no filesystem access happens here, so a module that
//! is missing on disk still resolves and is reported later by the executor.

use hardkit_common::{Error, Platform, Result};
use hardkit_schema::{CatalogConfig, Level};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// An executable policy module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// File name as declared in the catalog, e.g. `PasswordHistory.ps1`.
    pub name: String,
    pub platform: Platform,
    /// Lowest level that declares this module.
    pub level: Level,
    pub path: PathBuf,
}

impl Module {
    /// Name without extension, as used in rollback ledger file names.
    pub fn base_name(&self) -> &str {
        base_name_of(&self.name)
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

fn base_name_of(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Static mapping from (platform, level) to modules.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    /// Per platform, the cumulative deduplicated list for each level.
    resolved: BTreeMap<Platform, BTreeMap<Level, Vec<Module>>>,
}

impl ModuleCatalog {
    /// Build the catalog from configuration.
    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let mut resolved = BTreeMap::new();

        for (platform, table) in &config.platforms {
            let dir = config.platform_dir(*platform);
            let mut seen: HashSet<&str> = HashSet::new();
            // Ledger entries name modules by base name, so it must be unique.
            let mut base_names: HashMap<&str, &str> = HashMap::new();
            let mut cumulative: Vec<Module> = Vec::new();
            let mut by_level = BTreeMap::new();

            for level in Level::ALL {
                for name in table.get(&level).into_iter().flatten() {
                    if name.contains(['/', '\\']) || name.trim().is_empty() {
                        return Err(Error::Config(format!(
                            "invalid module name {:?} for {}",
                            name, platform
                        )));
                    }
                    if let Some(other) = base_names.insert(base_name_of(name), name.as_str()) {
                        if other != name.as_str() {
                            return Err(Error::Config(format!(
                                "modules {} and {} share the base name {:?} on {}",
                                other,
                                name,
                                base_name_of(name),
                                platform
                            )));
                        }
                    }
                    if seen.insert(name.as_str()) {
                        cumulative.push(Module {
                            name: name.clone(),
                            platform: *platform,
                            level,
                            path: dir.join(name),
                        });
                    }
                }
                by_level.insert(level, cumulative.clone());
            }

            resolved.insert(*platform, by_level);
        }

        Ok(Self { resolved })
    }

    /// Fail unless the platform has a module table.
    pub fn ensure_supported(&self, platform: Platform) -> Result<()> {
        if self.resolved.contains_key(&platform) {
            Ok(())
        } else {
            Err(Error::UnsupportedPlatform(platform.to_string()))
        }
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.resolved.keys().copied()
    }

    /// Every module of `level` or below, ascending by level, declaration
    /// order within a level, no duplicates.
    pub fn resolve(&self, platform: Platform, level: Level) -> Vec<Module> {
        self.resolved
            .get(&platform)
            .and_then(|levels| levels.get(&level))
            .cloned()
            .unwrap_or_default()
    }

    /// Find the module whose base name matches, for the given platform.
    pub fn find_by_base_name(&self, platform: Platform, base_name: &str) -> Option<Module> {
        self.resolve(platform, Level::L3)
            .into_iter()
            .find(|m| m.base_name() == base_name)
    }
}
