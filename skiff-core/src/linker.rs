use crate::config::SkiffConfig;
use crate::console;
use crate::fetcher;
use crate::registry::RegistryKind;
use crate::resolver::{PackageId, PackageResolver};
use crate::{Result, SkiffError};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Materializes the install folders from the package cache. Packages are
/// hoisted to the registry folder root; only a version conflict nests a
/// copy under its requester.
pub struct Linker<'a> {
    config: &'a SkiffConfig,
    link_duplicates: bool,
}

impl<'a> Linker<'a> {
    pub fn new(config: &'a SkiffConfig) -> Self {
        Linker {
            config,
            link_duplicates: false,
        }
    }

    pub fn init(
        &mut self,
        resolver: &PackageResolver<'_>,
        top_patterns: &[String],
        link_duplicates: bool,
    ) -> Result<usize> {
        self.link_duplicates = link_duplicates;

        let mut placed_count = 0;

        for registry in RegistryKind::ALL {
            if !resolver.used_registries().contains(&registry) {
                continue;
            }

            let folder = self.config.modules_dir(registry);

            if folder.exists() {
                fs::remove_dir_all(&folder).map_err(|source| SkiffError::WriteFile {
                    path: folder.clone(),
                    source,
                })?;
            }

            fs::create_dir_all(&folder).map_err(|source| SkiffError::WriteFile {
                path: folder.clone(),
                source,
            })?;

            let mut hoisted: BTreeMap<String, String> = BTreeMap::new();

            for pattern in top_patterns {
                let Some(manifest) = resolver.resolved_pattern(pattern) else {
                    continue;
                };

                let reference = resolver.reference(manifest.ref_index);
                if reference.ignore || reference.registry != registry {
                    continue;
                }

                let mut stack = BTreeSet::new();
                placed_count += self.place_package(
                    resolver,
                    &manifest.id,
                    &folder,
                    &folder,
                    &mut hoisted,
                    &mut stack,
                )?;
            }
        }

        console::verbose(&format!("linked {} packages", placed_count));

        Ok(placed_count)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_package(
        &self,
        resolver: &PackageResolver<'_>,
        id: &PackageId,
        folder_root: &Path,
        parent_dir: &Path,
        hoisted: &mut BTreeMap<String, String>,
        stack: &mut BTreeSet<PackageId>,
    ) -> Result<usize> {
        if stack.contains(id) {
            return Ok(0);
        }

        // hoist when the name is free or already holds this version
        let (dest, nested) = match hoisted.get(&id.name) {
            Some(version) if *version == id.version => return Ok(0),
            Some(_) => (parent_dir.join("node_modules").join(&id.name), true),
            None => (folder_root.join(&id.name), false),
        };

        if !nested {
            hoisted.insert(id.name.clone(), id.version.clone());
        } else if dest.exists() {
            // an earlier sibling already nested this conflict copy
            return Ok(0);
        }

        if !fetcher::is_cached(self.config, id) {
            return Err(SkiffError::CacheMissing {
                name: id.name.clone(),
                version: id.version.clone(),
            });
        }

        let cache_root = fetcher::package_root_dir(&fetcher::cache_dir(self.config, id));
        self.copy_payload(&cache_root, &dest)?;
        link_bins(&dest, folder_root)?;

        stack.insert(id.clone());
        let mut placed = 1;

        let manifest = resolver
            .all_info_for_package_name(&id.name)
            .into_iter()
            .find(|candidate| candidate.id == *id);

        if let Some(manifest) = manifest {
            let children: Vec<String> = manifest
                .dependencies
                .iter()
                .chain(manifest.optional_dependencies.iter())
                .map(|(name, range)| format!("{}@{}", name, range))
                .collect();

            for child_pattern in children {
                let Some(child) = resolver.resolved_pattern(&child_pattern) else {
                    continue;
                };

                if resolver.reference(child.ref_index).ignore {
                    continue;
                }

                placed += self.place_package(
                    resolver,
                    &child.id,
                    folder_root,
                    &dest,
                    hoisted,
                    stack,
                )?;
            }
        }

        stack.remove(id);

        Ok(placed)
    }

    fn copy_payload(&self, source: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest).map_err(|source_err| SkiffError::WriteFile {
            path: dest.to_path_buf(),
            source: source_err,
        })?;

        for entry in fs::read_dir(source).map_err(|source_err| SkiffError::ReadFile {
            path: source.to_path_buf(),
            source: source_err,
        })? {
            let entry = entry.map_err(|source_err| SkiffError::ReadFile {
                path: source.to_path_buf(),
                source: source_err,
            })?;

            if entry.file_name().to_string_lossy() == ".skiff-complete" {
                continue;
            }

            let file_type = entry.file_type().map_err(|source_err| SkiffError::ReadFile {
                path: entry.path(),
                source: source_err,
            })?;

            let from = entry.path();
            let to = dest.join(entry.file_name());

            if file_type.is_dir() {
                self.copy_payload(&from, &to)?;
            } else if self.link_duplicates {
                if fs::hard_link(&from, &to).is_err() {
                    fs::copy(&from, &to).map_err(|source_err| SkiffError::WriteFile {
                        path: to,
                        source: source_err,
                    })?;
                }
            } else {
                fs::copy(&from, &to).map_err(|source_err| SkiffError::WriteFile {
                    path: to,
                    source: source_err,
                })?;
            }
        }

        Ok(())
    }
}

fn link_bins(dest: &Path, folder_root: &Path) -> Result<()> {
    let manifest_path = dest.join("package.json");

    if !manifest_path.is_file() {
        return Ok(());
    }

    let data = fs::read_to_string(&manifest_path).map_err(|source| SkiffError::ReadFile {
        path: manifest_path.clone(),
        source,
    })?;

    let Ok(value) = serde_json::from_str::<Value>(&data) else {
        return Ok(());
    };

    let Some(bin) = value.get("bin") else {
        return Ok(());
    };

    let bin_dir = folder_root.join(".bin");

    match bin {
        Value::String(script) => {
            let name = value.get("name").and_then(Value::as_str).unwrap_or_default();
            create_bin_shim(&bin_dir, sanitize_bin_name(name), &dest.join(script))?;
        }
        Value::Object(map) => {
            for (entry_name, entry_value) in map {
                if let Some(script) = entry_value.as_str() {
                    create_bin_shim(&bin_dir, sanitize_bin_name(entry_name), &dest.join(script))?;
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn create_bin_shim(bin_dir: &Path, name: String, target: &PathBuf) -> Result<()> {
    if name.is_empty() || !target.is_file() {
        return Ok(());
    }

    fs::create_dir_all(bin_dir).map_err(|source| SkiffError::WriteFile {
        path: bin_dir.to_path_buf(),
        source,
    })?;

    let dest = bin_dir.join(&name);

    if dest.exists() {
        fs::remove_file(&dest).map_err(|source| SkiffError::WriteFile {
            path: dest.clone(),
            source,
        })?;
    }

    if symlink_file(target, &dest).is_err() {
        fs::copy(target, &dest).map_err(|source| SkiffError::WriteFile {
            path: dest.clone(),
            source,
        })?;
    }

    Ok(())
}

fn sanitize_bin_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or(name).to_string()
}

#[cfg(unix)]
fn symlink_file(from: &Path, to: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::symlink;
    symlink(from, to)
}

#[cfg(windows)]
fn symlink_file(from: &Path, to: &Path) -> std::io::Result<()> {
    use std::os::windows::fs::symlink_file;
    symlink_file(from, to)
}
