use crate::registry::RegistryKind;
use crate::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const LOCKFILE_FILENAME: &str = "skiff-lock.yaml";

/// One locked pattern: the fully resolved coordinates a future install can
/// reuse without consulting the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedEntry {
    pub version: String,
    pub resolved: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    pub registry: RegistryKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockfileDocument {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, LockedEntry>,
}

const LOCKFILE_VERSION: u32 = 1;

/// The lockfile as loaded at startup. `cache` is empty when no file was
/// present; `crlf` remembers the newline style so a rewrite preserves it.
#[derive(Debug, Clone, Default)]
pub struct Lockfile {
    pub path: PathBuf,
    pub cache: BTreeMap<String, LockedEntry>,
    file_exists: bool,
    crlf: bool,
}

impl Lockfile {
    pub fn read(cwd: &Path) -> Result<Self> {
        let path = cwd.join(LOCKFILE_FILENAME);

        if !path.is_file() {
            return Ok(Lockfile {
                path,
                ..Default::default()
            });
        }

        let data = fs::read_to_string(&path).map_err(|source| SkiffError::ReadFile {
            path: path.clone(),
            source,
        })?;

        let crlf = data.contains("\r\n");

        let document: LockfileDocument =
            serde_yaml::from_str(&data).map_err(|source| SkiffError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        Ok(Lockfile {
            path,
            cache: document.entries,
            file_exists: true,
            crlf,
        })
    }

    pub fn file_exists(&self) -> bool {
        self.file_exists
    }

    pub fn cache_is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn get_locked(&self, pattern: &str) -> Option<&LockedEntry> {
        self.cache.get(pattern)
    }

    /// Lookup by bare package name, accepting any locked pattern of that
    /// name. Used to decide whether a collected pattern can stay `name`
    /// instead of `name@range`.
    pub fn get_locked_ignoring_version(&self, name: &str) -> Option<&LockedEntry> {
        if let Some(entry) = self.cache.get(name) {
            return Some(entry);
        }

        self.cache
            .iter()
            .find(|(key, _)| pattern_name(key) == name)
            .map(|(_, entry)| entry)
    }

    /// Serialize a candidate image using this file's newline style.
    pub fn serialize(&self, image: &BTreeMap<String, LockedEntry>) -> Result<String> {
        let document = LockfileDocument {
            version: LOCKFILE_VERSION,
            entries: image.clone(),
        };

        let data = serde_yaml::to_string(&document).map_err(|source| SkiffError::LockfileWrite {
            path: self.path.clone(),
            source,
        })?;

        if self.crlf {
            Ok(data.replace('\n', "\r\n"))
        } else {
            Ok(data)
        }
    }

    pub fn write(&self, image: &BTreeMap<String, LockedEntry>) -> Result<()> {
        let data = self.serialize(image)?;

        fs::write(&self.path, data).map_err(|source| SkiffError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }
}

/// The package name of a pattern: `lodash@^4.0.0` → `lodash`,
/// `@scope/pkg@1.x` → `@scope/pkg`, a bare name stays itself.
pub fn pattern_name(pattern: &str) -> &str {
    if let Some(without_at) = pattern.strip_prefix('@') {
        match without_at.rfind('@') {
            Some(index) => &pattern[..index + 1],
            None => pattern,
        }
    } else {
        match pattern.rfind('@') {
            Some(index) => &pattern[..index],
            None => pattern,
        }
    }
}

/// The range part of a pattern, when it has one.
pub fn pattern_range(pattern: &str) -> Option<&str> {
    let name = pattern_name(pattern);
    if name.len() == pattern.len() {
        None
    } else {
        Some(&pattern[name.len() + 1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str) -> LockedEntry {
        LockedEntry {
            version: version.to_string(),
            resolved: format!("https://registry.example/pkg/-/pkg-{}.tgz", version),
            integrity: None,
            registry: RegistryKind::Npm,
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
        }
    }

    #[test]
    fn pattern_name_handles_scopes() {
        assert_eq!(pattern_name("lodash@^4.0.0"), "lodash");
        assert_eq!(pattern_name("lodash"), "lodash");
        assert_eq!(pattern_name("@scope/pkg@1.x"), "@scope/pkg");
        assert_eq!(pattern_name("@scope/pkg"), "@scope/pkg");
    }

    #[test]
    fn pattern_range_splits_after_name() {
        assert_eq!(pattern_range("lodash@^4.0.0"), Some("^4.0.0"));
        assert_eq!(pattern_range("@scope/pkg@1.x"), Some("1.x"));
        assert_eq!(pattern_range("lodash"), None);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lockfile = Lockfile::read(dir.path()).unwrap();
        assert!(!lockfile.file_exists());
        assert!(lockfile.cache_is_empty());
    }

    #[test]
    fn round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();

        let mut image = BTreeMap::new();
        image.insert("a@^1.0.0".to_string(), entry("1.2.0"));

        let lockfile = Lockfile::read(dir.path()).unwrap();
        lockfile.write(&image).unwrap();

        let reloaded = Lockfile::read(dir.path()).unwrap();
        assert!(reloaded.file_exists());
        assert_eq!(reloaded.get_locked("a@^1.0.0").unwrap().version, "1.2.0");
    }

    #[test]
    fn lookup_ignoring_version_matches_any_range() {
        let mut lockfile = Lockfile::default();
        lockfile.cache.insert("a@^1.0.0".to_string(), entry("1.2.0"));

        assert!(lockfile.get_locked_ignoring_version("a").is_some());
        assert!(lockfile.get_locked_ignoring_version("b").is_none());
    }

    #[test]
    fn crlf_style_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_FILENAME);

        let mut image = BTreeMap::new();
        image.insert("a@^1.0.0".to_string(), entry("1.2.0"));

        let fresh = Lockfile::read(dir.path()).unwrap();
        let unix = fresh.serialize(&image).unwrap();
        fs::write(&path, unix.replace('\n', "\r\n")).unwrap();

        let reloaded = Lockfile::read(dir.path()).unwrap();
        let rewritten = reloaded.serialize(&image).unwrap();
        assert!(rewritten.contains("\r\n"));
    }
}
