use crate::config::SkiffConfig;
use crate::console;
use crate::install::InstallFlags;
use crate::lockfile::{Lockfile, pattern_name};
use crate::manifest::{DependencyCategory, RootManifests};
use crate::resolver::{DependencyRequest, RequestHint, exotic_kind};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};

const CATEGORIES: [DependencyCategory; 3] = [
    DependencyCategory::Runtime,
    DependencyCategory::Dev,
    DependencyCategory::Optional,
];

/// Everything the request collector learned from the working directory.
#[derive(Debug, Default)]
pub struct CollectedRequests {
    pub requests: Vec<DependencyRequest>,
    /// every pattern that participates in resolution
    pub patterns: Vec<String>,
    /// the subset live in this invocation
    pub used_patterns: Vec<String>,
    /// `patterns` minus `used_patterns`
    pub ignore_patterns: Vec<String>,
    /// pattern → the manifest category it came from
    pub root_origins: BTreeMap<String, DependencyCategory>,
    /// package name → pinned version, aggregated across root manifests
    pub resolutions: BTreeMap<String, String>,
    pub manifests: RootManifests,
}

/// Walk the root manifests and emit dependency requests. Only the first
/// registry whose manifest exists contributes: in a directory with several
/// recognized manifests, the earliest-enumerated registry wins.
pub fn collect_requests(
    config: &SkiffConfig,
    lockfile: &Lockfile,
    flags: &mut InstallFlags,
    exclude_patterns: &[String],
    ignore_unused: bool,
) -> Result<CollectedRequests> {
    let mut collected = CollectedRequests::default();

    let exclude_names: BTreeSet<String> = exclude_patterns
        .iter()
        .filter(|pattern| exotic_kind(pattern).is_none())
        .map(|pattern| pattern_name(pattern).to_string())
        .collect();

    let manifests = config.root_manifests()?;

    if let Some(file) = manifests.first() {
        let manifest = &file.manifest;
        let registry = file.registry;

        for (name, version) in &manifest.resolutions {
            collected
                .resolutions
                .insert(name.clone(), version.clone());
        }

        for category in CATEGORIES {
            for (name, range) in manifest.category(category) {
                if exclude_names.contains(name) {
                    continue;
                }

                // a name the lockfile pins under its bare key stays bare;
                // anything else carries its range
                let pattern = if lockfile.get_locked(name).is_some() {
                    name.clone()
                } else {
                    format!("{}@{}", name, range)
                };

                let (hint, optional, used) = match category {
                    DependencyCategory::Runtime => (RequestHint::None, false, true),
                    DependencyCategory::Dev => (RequestHint::Dev, false, !config.production),
                    DependencyCategory::Optional => {
                        (RequestHint::Optional, true, !flags.ignore_optional)
                    }
                };

                if ignore_unused && !used {
                    continue;
                }

                collected.requests.push(DependencyRequest {
                    pattern: pattern.clone(),
                    registry,
                    hint,
                    optional,
                });

                collected.patterns.push(pattern.clone());

                if used {
                    collected.used_patterns.push(pattern.clone());
                } else {
                    collected.ignore_patterns.push(pattern.clone());
                }

                collected.root_origins.insert(pattern, category);
            }
        }

        if manifest.flat {
            flags.flat = true;
        }
    } else {
        console::verbose("no root manifest found in the working directory");
    }

    collected.manifests = manifests;

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::LockedEntry;
    use crate::registry::RegistryKind;
    use std::fs;

    fn write_manifest(dir: &std::path::Path, filename: &str, body: &str) {
        fs::write(dir.join(filename), body).unwrap();
    }

    fn collect(
        dir: &std::path::Path,
        lockfile: &Lockfile,
        flags: &mut InstallFlags,
    ) -> CollectedRequests {
        let config = SkiffConfig::load(dir);
        collect_requests(&config, lockfile, flags, &[], false).unwrap()
    }

    #[test]
    fn first_registry_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "package.json", r#"{"dependencies": {"a": "^1.0.0"}}"#);
        write_manifest(dir.path(), "jsr.json", r#"{"dependencies": {"b": "^2.0.0"}}"#);

        let lockfile = Lockfile::default();
        let mut flags = InstallFlags::default();
        let collected = collect(dir.path(), &lockfile, &mut flags);

        assert_eq!(collected.patterns, vec!["a@^1.0.0".to_string()]);
        assert!(collected
            .requests
            .iter()
            .all(|request| request.registry == RegistryKind::Npm));
    }

    #[test]
    fn bare_lock_keys_emit_bare_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"a": "^1.0.0", "b": "^2.0.0"}}"#,
        );

        let mut lockfile = Lockfile::default();
        lockfile.cache.insert(
            "a".to_string(),
            LockedEntry {
                version: "1.2.0".to_string(),
                resolved: "https://registry.example/a/-/a-1.2.0.tgz".to_string(),
                integrity: None,
                registry: RegistryKind::Npm,
                dependencies: BTreeMap::new(),
                optional_dependencies: BTreeMap::new(),
            },
        );

        let mut flags = InstallFlags::default();
        let collected = collect(dir.path(), &lockfile, &mut flags);

        assert_eq!(
            collected.patterns,
            vec!["a".to_string(), "b@^2.0.0".to_string()]
        );
    }

    #[test]
    fn ranged_lock_keys_keep_the_ranged_pattern() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "package.json", r#"{"dependencies": {"a": "^1.0.0"}}"#);

        let mut lockfile = Lockfile::default();
        lockfile.cache.insert(
            "a@^1.0.0".to_string(),
            LockedEntry {
                version: "1.2.0".to_string(),
                resolved: "https://registry.example/a/-/a-1.2.0.tgz".to_string(),
                integrity: None,
                registry: RegistryKind::Npm,
                dependencies: BTreeMap::new(),
                optional_dependencies: BTreeMap::new(),
            },
        );

        let mut flags = InstallFlags::default();
        let collected = collect(dir.path(), &lockfile, &mut flags);

        assert_eq!(collected.patterns, vec!["a@^1.0.0".to_string()]);
    }

    #[test]
    fn used_and_ignored_partition_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{
                "dependencies": {"a": "^1.0.0"},
                "optionalDependencies": {"c": "^3.0.0"}
            }"#,
        );

        let lockfile = Lockfile::default();
        let mut flags = InstallFlags {
            ignore_optional: true,
            ..Default::default()
        };
        let collected = collect(dir.path(), &lockfile, &mut flags);

        let mut union = collected.used_patterns.clone();
        union.extend(collected.ignore_patterns.clone());
        union.sort();

        let mut all = collected.patterns.clone();
        all.sort();

        assert_eq!(union, all);
        assert!(collected.used_patterns.contains(&"a@^1.0.0".to_string()));
        assert!(collected.ignore_patterns.contains(&"c@^3.0.0".to_string()));
    }

    #[test]
    fn dev_dependencies_are_dead_in_production() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{"devDependencies": {"d": "^1.0.0"}}"#,
        );
        fs::write(dir.path().join(".skiffrc"), "production=true\n").unwrap();

        let config = SkiffConfig::load(dir.path());
        let lockfile = Lockfile::default();
        let mut flags = InstallFlags::default();
        let collected = collect_requests(&config, &lockfile, &mut flags, &[], false).unwrap();

        assert_eq!(collected.ignore_patterns, vec!["d@^1.0.0".to_string()]);
        assert!(collected.used_patterns.is_empty());
    }

    #[test]
    fn ignore_unused_drops_dead_patterns_entirely() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{
                "dependencies": {"a": "^1.0.0"},
                "optionalDependencies": {"c": "^3.0.0"}
            }"#,
        );

        let config = SkiffConfig::load(dir.path());
        let lockfile = Lockfile::default();
        let mut flags = InstallFlags {
            ignore_optional: true,
            ..Default::default()
        };
        let collected = collect_requests(&config, &lockfile, &mut flags, &[], true).unwrap();

        assert_eq!(collected.patterns, vec!["a@^1.0.0".to_string()]);
        assert!(collected.ignore_patterns.is_empty());
    }

    #[test]
    fn exclude_names_skip_entries_but_exotic_excludes_do_not() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"a": "^1.0.0", "b": "^2.0.0"}}"#,
        );

        let config = SkiffConfig::load(dir.path());
        let lockfile = Lockfile::default();
        let mut flags = InstallFlags::default();

        let excludes = vec![
            "a@^1.0.0".to_string(),
            "b@git+ssh://host/b.git".to_string(),
        ];
        let collected =
            collect_requests(&config, &lockfile, &mut flags, &excludes, false).unwrap();

        // `a` is excluded by name; the exotic exclude for `b` is stripped
        // before name extraction, so `b` survives
        assert_eq!(collected.patterns, vec!["b@^2.0.0".to_string()]);
    }

    #[test]
    fn manifest_flat_attribute_raises_the_flag() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{"flat": true, "dependencies": {"a": "^1.0.0"}}"#,
        );

        let lockfile = Lockfile::default();
        let mut flags = InstallFlags::default();
        collect(dir.path(), &lockfile, &mut flags);

        assert!(flags.flat);
    }

    #[test]
    fn resolutions_are_aggregated() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            "package.json",
            r#"{"dependencies": {"a": "^1.0.0"}, "resolutions": {"b": "2.0.0"}}"#,
        );

        let lockfile = Lockfile::default();
        let mut flags = InstallFlags::default();
        let collected = collect(dir.path(), &lockfile, &mut flags);

        assert_eq!(
            collected.resolutions.get("b").map(String::as_str),
            Some("2.0.0")
        );
    }
}
