use crate::config::SkiffConfig;
use crate::registry::RegistryKind;
use crate::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// A root manifest as found in the working directory. Unknown fields are
/// kept in `extra` so a rewrite does not drop them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolutions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flat: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCategory {
    Runtime,
    Dev,
    Optional,
}

impl DependencyCategory {
    pub fn manifest_key(&self) -> &'static str {
        match self {
            DependencyCategory::Runtime => "dependencies",
            DependencyCategory::Dev => "devDependencies",
            DependencyCategory::Optional => "optionalDependencies",
        }
    }
}

impl RootManifest {
    pub fn category(&self, category: DependencyCategory) -> &BTreeMap<String, String> {
        match category {
            DependencyCategory::Runtime => &self.dependencies,
            DependencyCategory::Dev => &self.dev_dependencies,
            DependencyCategory::Optional => &self.optional_dependencies,
        }
    }

    pub fn category_mut(&mut self, category: DependencyCategory) -> &mut BTreeMap<String, String> {
        match category {
            DependencyCategory::Runtime => &mut self.dependencies,
            DependencyCategory::Dev => &mut self.dev_dependencies,
            DependencyCategory::Optional => &mut self.optional_dependencies,
        }
    }
}

pub fn read_manifest(path: &PathBuf) -> Result<RootManifest> {
    let data = fs::read_to_string(path).map_err(|source| SkiffError::ReadFile {
        path: path.clone(),
        source,
    })?;

    serde_json::from_str(&data).map_err(|source| SkiffError::ParseJson {
        path: path.clone(),
        source,
    })
}

/// One root manifest on disk, tagged with the registry it belongs to.
#[derive(Debug, Clone)]
pub struct ManifestFile {
    pub registry: RegistryKind,
    pub path: PathBuf,
    pub manifest: RootManifest,
}

impl ManifestFile {
    pub fn save(&self) -> Result<()> {
        let data =
            serde_json::to_string_pretty(&self.manifest).map_err(|err| SkiffError::SerializeJson {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;

        fs::write(&self.path, data).map_err(|source| SkiffError::WriteFile {
            path: self.path.clone(),
            source,
        })
    }
}

/// The root manifest consulted by an install: the first registry (in
/// enumeration order) whose manifest file exists wins, and later
/// registries are never read or written.
#[derive(Debug, Clone, Default)]
pub struct RootManifests {
    pub files: Vec<ManifestFile>,
}

impl RootManifests {
    pub fn read(config: &SkiffConfig) -> Result<Self> {
        let mut files = Vec::new();

        for registry in RegistryKind::ALL {
            let path = config.cwd.join(registry.manifest_filename());
            if !path.is_file() {
                continue;
            }

            let manifest = read_manifest(&path)?;
            files.push(ManifestFile {
                registry,
                path,
                manifest,
            });
            break;
        }

        Ok(RootManifests { files })
    }

    pub fn save(&self) -> Result<()> {
        for file in &self.files {
            file.save()?;
        }
        Ok(())
    }

    pub fn first(&self) -> Option<&ManifestFile> {
        self.files.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_categories() {
        let data = r#"{
            "name": "app",
            "dependencies": {"a": "^1.0.0"},
            "devDependencies": {"b": "^2.0.0"},
            "optionalDependencies": {"c": "^3.0.0"},
            "resolutions": {"d": "4.0.0"},
            "flat": true
        }"#;

        let manifest: RootManifest = serde_json::from_str(data).unwrap();
        assert_eq!(manifest.dependencies.get("a").unwrap(), "^1.0.0");
        assert_eq!(manifest.dev_dependencies.get("b").unwrap(), "^2.0.0");
        assert_eq!(manifest.optional_dependencies.get("c").unwrap(), "^3.0.0");
        assert_eq!(manifest.resolutions.get("d").unwrap(), "4.0.0");
        assert!(manifest.flat);
    }

    #[test]
    fn rewrite_keeps_unknown_fields() {
        let data = r#"{"name": "app", "license": "MIT", "dependencies": {"a": "^1.0.0"}}"#;
        let manifest: RootManifest = serde_json::from_str(data).unwrap();

        let rewritten = serde_json::to_string(&manifest).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(value["license"], "MIT");
    }

    #[test]
    fn only_the_first_registry_manifest_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();
        fs::write(dir.path().join("jsr.json"), r#"{"name": "other"}"#).unwrap();

        let config = SkiffConfig::load(dir.path());
        let manifests = RootManifests::read(&config).unwrap();

        assert_eq!(manifests.files.len(), 1);
        assert_eq!(manifests.files[0].registry, RegistryKind::Npm);
    }

    #[test]
    fn losing_manifests_are_never_parsed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();
        // broken, but the earlier registry won so this is never opened
        fs::write(dir.path().join("jsr.json"), "{ not json").unwrap();

        let config = SkiffConfig::load(dir.path());
        let manifests = RootManifests::read(&config).unwrap();

        assert_eq!(manifests.files.len(), 1);
        assert_eq!(
            manifests.files[0].manifest.name.as_deref(),
            Some("app")
        );
    }
}
