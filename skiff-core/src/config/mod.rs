use crate::console;
use crate::manifest::{RootManifest, RootManifests};
use crate::registry::RegistryKind;
use crate::scripts;
use crate::{Result, SkiffError};
use directories::ProjectDirs;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub mod rc;
pub use self::rc::*;

const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
const DEFAULT_JSR_REGISTRY: &str = "https://npm.jsr.io";
const DEFAULT_SELF_UPDATE_URL: &str = "https://get.skiffpkg.dev/latest-version";

#[derive(Debug, Clone)]
pub struct SkiffConfig {
    pub cwd: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub production: bool,
    pub registry_url: String,
    pub jsr_registry_url: String,
    pub auth_token: Option<String>,
    pub network_concurrency: usize,
    pub child_concurrency: usize,
    pub modules_folder: Option<PathBuf>,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    options: BTreeMap<String, String>,
}

impl SkiffConfig {
    pub fn load(cwd: &Path) -> Self {
        let dirs = ProjectDirs::from("dev", "skiffpkg", "skiff");

        let (cache_dir, data_dir) = if let Ok(home) = env::var("SKIFF_HOME") {
            let base = PathBuf::from(home);
            (base.join("cache"), base.join("data"))
        } else {
            match dirs {
                Some(dirs) => (
                    dirs.cache_dir().to_path_buf(),
                    dirs.data_local_dir().to_path_buf(),
                ),
                None => {
                    let fallback = cwd.join(".skiff");
                    (fallback.join("cache"), fallback.join("data"))
                }
            }
        };

        let options = rc::read_options(cwd);

        let registry_url = options
            .get("registry")
            .map(|value| rc::normalize_registry_url(value))
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());

        let jsr_registry_url = options
            .get("jsr-registry")
            .map(|value| rc::normalize_registry_url(value))
            .unwrap_or_else(|| DEFAULT_JSR_REGISTRY.to_string());

        let auth_token = options
            .get("auth-token")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let production = options
            .get("production")
            .map(|value| rc::option_is_truthy(value))
            .unwrap_or_else(|| {
                env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
            });

        let network_concurrency = options
            .get("network-concurrency")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|parsed| *parsed > 0)
            .unwrap_or(48);

        let child_concurrency = options
            .get("child-concurrency")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|parsed| *parsed > 0)
            .unwrap_or(5);

        let modules_folder = options
            .get("modules-folder")
            .map(|value| cwd.join(value));

        let verbose = options
            .get("verbose")
            .map(|value| rc::option_is_truthy(value))
            .unwrap_or(false);

        let log_file = options
            .get("log-file")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        SkiffConfig {
            cwd: cwd.to_path_buf(),
            cache_dir,
            data_dir,
            production,
            registry_url,
            jsr_registry_url,
            auth_token,
            network_concurrency,
            child_concurrency,
            modules_folder,
            verbose,
            log_file,
            options,
        }
    }

    pub fn get_option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn option_true(&self, name: &str) -> bool {
        self.get_option(name)
            .map(rc::option_is_truthy)
            .unwrap_or(false)
    }

    #[doc(hidden)]
    pub fn set_option(&mut self, name: &str, value: &str) {
        self.options.insert(name.to_string(), value.to_string());
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.cache_dir.join("packages")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.cache_dir.join("metadata")
    }

    /// The install folder for a registry, honoring the modules-folder
    /// override for the primary registry.
    pub fn modules_dir(&self, registry: RegistryKind) -> PathBuf {
        if registry == RegistryKind::Npm
            && let Some(folder) = &self.modules_folder
        {
            return folder.clone();
        }

        self.cwd.join(registry.folder())
    }

    pub fn offline_mirror_path(&self) -> Option<PathBuf> {
        let value = self.get_option("offline-mirror")?;
        let trimmed = value.trim();

        if trimmed.is_empty() || !rc::option_is_truthy(trimmed) {
            return None;
        }

        // a bare truthy value enables the default location
        if matches!(trimmed, "1" | "true" | "yes" | "on") {
            Some(self.cwd.join("skiff-offline"))
        } else {
            Some(self.cwd.join(trimmed))
        }
    }

    /// Delete every mirror tarball whose basename is not in `kept`.
    pub fn prune_offline_mirror(&self, kept: &BTreeSet<String>) -> Result<usize> {
        let Some(mirror) = self.offline_mirror_path() else {
            return Ok(0);
        };

        if !mirror.is_dir() {
            return Ok(0);
        }

        let entries = fs::read_dir(&mirror).map_err(|source| SkiffError::ReadFile {
            path: mirror.clone(),
            source,
        })?;

        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let basename = entry.file_name().to_string_lossy().to_string();
            if kept.contains(&basename) {
                continue;
            }

            console::verbose(&format!("pruning stale mirror tarball {}", basename));

            fs::remove_file(&path).map_err(|source| SkiffError::WriteFile {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }

        Ok(removed)
    }

    pub fn root_manifests(&self) -> Result<RootManifests> {
        RootManifests::read(self)
    }

    pub fn save_root_manifests(&self, manifests: &RootManifests) -> Result<()> {
        manifests.save()
    }

    /// Run the root project's script for a lifecycle phase, if it declares
    /// one. Returns whether a script ran.
    pub fn execute_lifecycle_script(&self, phase: &str) -> Result<bool> {
        let manifest = self.first_root_manifest()?;

        let Some(manifest) = manifest else {
            return Ok(false);
        };

        let Some(command) = manifest.scripts.get(phase) else {
            return Ok(false);
        };

        if command.is_empty() {
            return Ok(false);
        }

        console::verbose(&format!("running root lifecycle script {}", phase));
        scripts::run_shell_script(&self.cwd, &format!("root:{}", phase), command)?;

        Ok(true)
    }

    fn first_root_manifest(&self) -> Result<Option<RootManifest>> {
        for registry in RegistryKind::ALL {
            let path = self.cwd.join(registry.manifest_filename());
            if path.is_file() {
                return crate::manifest::read_manifest(&path).map(Some);
            }
        }

        Ok(None)
    }

    pub fn auth_token_for_url(&self, url: &str) -> Option<&str> {
        let token = self.auth_token.as_deref()?;

        if url.starts_with(&self.registry_url) || url.starts_with(&self.jsr_registry_url) {
            Some(token)
        } else {
            None
        }
    }

    pub fn self_update_url(&self) -> String {
        self.get_option("self-update-url")
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_SELF_UPDATE_URL.to_string())
    }

    pub fn last_update_check_path(&self) -> PathBuf {
        self.data_dir.join("last-update-check")
    }
}
