use crate::config::SkiffConfig;
use crate::console;
use crate::install::InstallFlags;
use crate::lockfile::{LockedEntry, Lockfile, pattern_name, pattern_range};
use crate::registry::RegistryKind;
use crate::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const INTEGRITY_FILENAME: &str = ".skiff-integrity";

/// What a successful install looked like. A later run matches when its
/// patterns, lockfile and flags produce the same signature and the listed
/// folders still exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IntegritySignature {
    system: String,
    flags: Vec<String>,
    top_level_patterns: Vec<String>,
    lockfile: BTreeMap<String, String>,
    modules_folders: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IntegrityCheckResult {
    pub integrity_matches: bool,
    pub integrity_file_missing: bool,
    pub missing_patterns: Vec<String>,
}

pub struct IntegrityChecker<'a> {
    config: &'a SkiffConfig,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(config: &'a SkiffConfig) -> Self {
        IntegrityChecker { config }
    }

    /// The integrity file of the install, wherever a registry folder holds
    /// one.
    fn locate_integrity_file(&self) -> Option<PathBuf> {
        for registry in RegistryKind::ALL {
            let candidate = self.config.modules_dir(registry).join(INTEGRITY_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    pub fn check(
        &self,
        patterns: &[String],
        lockfile: &Lockfile,
        flags: &InstallFlags,
    ) -> IntegrityCheckResult {
        let missing_patterns: Vec<String> = patterns
            .iter()
            .filter(|pattern| {
                lockfile.get_locked(pattern).is_none()
                    && (pattern_range(pattern).is_some()
                        || lockfile
                            .get_locked_ignoring_version(pattern_name(pattern))
                            .is_none())
            })
            .cloned()
            .collect();

        let Some(path) = self.locate_integrity_file() else {
            return IntegrityCheckResult {
                integrity_matches: false,
                integrity_file_missing: true,
                missing_patterns,
            };
        };

        let stored: Option<IntegritySignature> = fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok());

        let Some(stored) = stored else {
            console::verbose("integrity file is unreadable, treating as missing");
            return IntegrityCheckResult {
                integrity_matches: false,
                integrity_file_missing: true,
                missing_patterns,
            };
        };

        let lockfile_image: BTreeMap<String, String> = lockfile
            .cache
            .iter()
            .map(|(pattern, entry)| (pattern.clone(), entry.resolved.clone()))
            .collect();

        let mut expected_patterns: Vec<String> = patterns.to_vec();
        expected_patterns.sort();

        let matches = stored.system == system_signature()
            && stored.flags == flags.integrity_flag_names()
            && stored.top_level_patterns == expected_patterns
            && stored.lockfile == lockfile_image
            && stored
                .modules_folders
                .iter()
                .all(|folder| self.config.cwd.join(folder).is_dir())
            && (!flags.check_files
                || stored
                    .files
                    .iter()
                    .all(|file| self.config.cwd.join(file).exists()));

        if !matches {
            console::verbose("integrity signature does not match the current request");
        }

        IntegrityCheckResult {
            integrity_matches: matches,
            integrity_file_missing: false,
            missing_patterns,
        }
    }

    pub fn save(
        &self,
        patterns: &[String],
        lockfile_image: &BTreeMap<String, LockedEntry>,
        flags: &InstallFlags,
        used_registries: &BTreeSet<RegistryKind>,
    ) -> Result<()> {
        let mut top_level_patterns: Vec<String> = patterns.to_vec();
        top_level_patterns.sort();

        let lockfile: BTreeMap<String, String> = lockfile_image
            .iter()
            .map(|(pattern, entry)| (pattern.clone(), entry.resolved.clone()))
            .collect();

        let mut modules_folders = Vec::new();
        let mut target_registry = RegistryKind::Npm;

        for registry in RegistryKind::ALL {
            if used_registries.contains(&registry) {
                if modules_folders.is_empty() {
                    target_registry = registry;
                }
                modules_folders.push(registry.folder().to_string());
            }
        }

        if modules_folders.is_empty() {
            modules_folders.push(RegistryKind::Npm.folder().to_string());
        }

        let folder = self.config.modules_dir(target_registry);

        fs::create_dir_all(&folder).map_err(|source| SkiffError::WriteFile {
            path: folder.clone(),
            source,
        })?;

        let files = if flags.check_files {
            collect_relative_files(&folder, &self.config.cwd)
        } else {
            Vec::new()
        };

        let signature = IntegritySignature {
            system: system_signature(),
            flags: flags.integrity_flag_names(),
            top_level_patterns,
            lockfile,
            modules_folders,
            files,
        };

        let path = folder.join(INTEGRITY_FILENAME);
        let data =
            serde_json::to_string_pretty(&signature).map_err(|err| SkiffError::SerializeJson {
                path: path.clone(),
                reason: err.to_string(),
            })?;

        fs::write(&path, data).map_err(|source| SkiffError::WriteFile { path, source })
    }

    /// Removed before linking mutates the tree, so a crash mid-install
    /// leaves the install visibly incomplete.
    pub fn remove_integrity_file(&self) -> Result<()> {
        for registry in RegistryKind::ALL {
            let path = self.config.modules_dir(registry).join(INTEGRITY_FILENAME);
            if path.is_file() {
                fs::remove_file(&path).map_err(|source| SkiffError::WriteFile { path, source })?;
            }
        }
        Ok(())
    }
}

fn system_signature() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn collect_relative_files(folder: &Path, cwd: &Path) -> Vec<String> {
    let mut files = Vec::new();
    collect_files_into(folder, cwd, &mut files);
    files.sort();
    files
}

fn collect_files_into(dir: &Path, cwd: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();

        if path.is_dir() {
            collect_files_into(&path, cwd, out);
        } else if let Ok(relative) = path.strip_prefix(cwd) {
            let name = relative.to_string_lossy().to_string();
            if !name.ends_with(INTEGRITY_FILENAME) {
                out.push(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryKind;

    fn flags() -> InstallFlags {
        InstallFlags::default()
    }

    fn image_with(pattern: &str, resolved: &str) -> BTreeMap<String, LockedEntry> {
        let mut image = BTreeMap::new();
        image.insert(
            pattern.to_string(),
            LockedEntry {
                version: "1.0.0".to_string(),
                resolved: resolved.to_string(),
                integrity: None,
                registry: RegistryKind::Npm,
                dependencies: BTreeMap::new(),
                optional_dependencies: BTreeMap::new(),
            },
        );
        image
    }

    #[test]
    fn missing_file_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());
        let checker = IntegrityChecker::new(&config);

        let lockfile = Lockfile::default();
        let result = checker.check(&["a@^1.0.0".to_string()], &lockfile, &flags());

        assert!(result.integrity_file_missing);
        assert!(!result.integrity_matches);
        assert_eq!(result.missing_patterns, vec!["a@^1.0.0".to_string()]);
    }

    #[test]
    fn save_then_check_matches() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());
        let checker = IntegrityChecker::new(&config);

        let patterns = vec!["a@^1.0.0".to_string()];
        let image = image_with("a@^1.0.0", "https://registry.example/a/-/a-1.0.0.tgz");

        let mut used = BTreeSet::new();
        used.insert(RegistryKind::Npm);

        checker.save(&patterns, &image, &flags(), &used).unwrap();

        let mut lockfile = Lockfile::default();
        lockfile.cache = image;

        let result = checker.check(&patterns, &lockfile, &flags());
        assert!(!result.integrity_file_missing);
        assert!(result.integrity_matches);
        assert!(result.missing_patterns.is_empty());
    }

    #[test]
    fn changed_lockfile_breaks_the_match() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());
        let checker = IntegrityChecker::new(&config);

        let patterns = vec!["a@^1.0.0".to_string()];
        let image = image_with("a@^1.0.0", "https://registry.example/a/-/a-1.0.0.tgz");

        let mut used = BTreeSet::new();
        used.insert(RegistryKind::Npm);

        checker.save(&patterns, &image, &flags(), &used).unwrap();

        let mut lockfile = Lockfile::default();
        lockfile.cache = image_with("a@^1.0.0", "https://registry.example/a/-/a-1.1.0.tgz");

        let result = checker.check(&patterns, &lockfile, &flags());
        assert!(!result.integrity_matches);
    }

    #[test]
    fn remove_deletes_the_witness() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());
        let checker = IntegrityChecker::new(&config);

        let patterns = vec!["a@^1.0.0".to_string()];
        let image = image_with("a@^1.0.0", "https://registry.example/a/-/a-1.0.0.tgz");
        let mut used = BTreeSet::new();
        used.insert(RegistryKind::Npm);

        checker.save(&patterns, &image, &flags(), &used).unwrap();
        assert!(dir.path().join("node_modules").join(INTEGRITY_FILENAME).is_file());

        checker.remove_integrity_file().unwrap();
        assert!(!dir.path().join("node_modules").join(INTEGRITY_FILENAME).exists());
    }
}
