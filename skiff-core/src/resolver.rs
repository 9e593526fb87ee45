use crate::config::SkiffConfig;
use crate::lockfile::{Lockfile, LockedEntry, pattern_name, pattern_range};
use crate::registry::{self, RegistryKind, RequestManager};
use crate::version::select_version;
use crate::{Result, SkiffError, console};
use async_recursion::async_recursion;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

/// The requester recorded for patterns that come straight from a root
/// manifest.
pub const ROOT_REQUESTER: &str = "/";

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

/// How a dependency request was classified by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestHint {
    None,
    Dev,
    Optional,
}

#[derive(Clone, Debug)]
pub struct DependencyRequest {
    pub pattern: String,
    pub registry: RegistryKind,
    pub hint: RequestHint,
    pub optional: bool,
}

/// Pattern shapes the registry resolver cannot serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExoticKind {
    Git,
    File,
    Url,
}

/// Classify a pattern whose range points outside the registry. Bare names
/// and plain semver ranges return `None`.
pub fn exotic_kind(pattern: &str) -> Option<ExoticKind> {
    let range = pattern_range(pattern)?;

    if range.starts_with("git:") || range.starts_with("git+") {
        Some(ExoticKind::Git)
    } else if range.starts_with("file:") {
        Some(ExoticKind::File)
    } else if range.starts_with("http://") || range.starts_with("https://") {
        Some(ExoticKind::Url)
    } else {
        None
    }
}

/// Book-keeping shared by every pattern that resolved to one package.
/// References live in a vector owned by the resolver and are addressed by
/// index; a `ResolvedManifest` carries the index rather than a pointer.
#[derive(Clone, Debug)]
pub struct PackageReference {
    pub name: String,
    pub ignore: bool,
    pub optional: bool,
    pub requests: Vec<String>,
    pub patterns: Vec<String>,
    pub registry: RegistryKind,
}

impl PackageReference {
    fn new(name: &str, registry: RegistryKind) -> Self {
        PackageReference {
            name: name.to_string(),
            ignore: false,
            optional: true,
            requests: Vec::new(),
            patterns: Vec::new(),
            registry,
        }
    }

    fn add_request(&mut self, requester: &str, optional: bool) {
        if !self.requests.iter().any(|existing| existing == requester) {
            self.requests.push(requester.to_string());
        }
        // a package is only optional while every requester is
        if !optional {
            self.optional = false;
        }
    }

    fn add_pattern(&mut self, pattern: &str) {
        if !self.patterns.iter().any(|existing| existing == pattern) {
            self.patterns.push(pattern.to_string());
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedManifest {
    pub id: PackageId,
    pub tarball: String,
    pub integrity: Option<String>,
    pub dependencies: BTreeMap<String, String>,
    pub optional_dependencies: BTreeMap<String, String>,
    pub engines: BTreeMap<String, String>,
    pub os: Vec<String>,
    pub cpu: Vec<String>,
    pub scripts: BTreeMap<String, String>,
    pub ref_index: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ResolverState {
    patterns: BTreeMap<String, PackageId>,
    manifests: BTreeMap<PackageId, ResolvedManifest>,
    refs: Vec<PackageReference>,
    ref_index_by_id: BTreeMap<PackageId, usize>,
    used_registries: BTreeSet<RegistryKind>,
}

/// Resolves dependency requests into a closed package set. `init` walks the
/// graph concurrently; afterwards the resolver is a plain queryable store.
pub struct PackageResolver<'a> {
    config: &'a SkiffConfig,
    requests: &'a RequestManager,
    lockfile: &'a Lockfile,
    force: bool,
    pub flat: bool,
    state: ResolverState,
}

impl<'a> PackageResolver<'a> {
    pub fn new(
        config: &'a SkiffConfig,
        requests: &'a RequestManager,
        lockfile: &'a Lockfile,
        force: bool,
    ) -> Self {
        PackageResolver {
            config,
            requests,
            lockfile,
            force,
            flat: false,
            state: ResolverState::default(),
        }
    }

    pub async fn init(&mut self, requests: Vec<DependencyRequest>, flat: bool) -> Result<()> {
        self.flat = flat;

        let config = self.config;
        let request_manager = self.requests;
        let lockfile = self.lockfile;
        let force = self.force;

        let shared = Arc::new(Mutex::new(ResolverState::default()));
        let semaphore = Arc::new(Semaphore::new(config.network_concurrency));

        let mut tasks = Vec::with_capacity(requests.len());

        for request in requests {
            let shared = shared.clone();
            let semaphore = semaphore.clone();

            let task = async move {
                resolve_pattern(
                    config,
                    request_manager,
                    lockfile,
                    force,
                    shared,
                    semaphore,
                    request.pattern,
                    request.registry,
                    ROOT_REQUESTER.to_string(),
                    request.optional,
                )
                .await
            };

            tasks.push(task);
        }

        let results = join_all(tasks).await;
        for result in results {
            result?;
        }

        let mut guard = shared.lock().await;
        self.state = std::mem::take(&mut *guard);

        console::verbose(&format!(
            "resolution complete: {} patterns, {} packages",
            self.state.patterns.len(),
            self.state.manifests.len()
        ));

        Ok(())
    }

    pub fn patterns(&self) -> &BTreeMap<String, PackageId> {
        &self.state.patterns
    }

    pub fn used_registries(&self) -> &BTreeSet<RegistryKind> {
        &self.state.used_registries
    }

    pub fn manifests(&self) -> impl Iterator<Item = &ResolvedManifest> {
        self.state.manifests.values()
    }

    pub fn resolved_pattern(&self, pattern: &str) -> Option<&ResolvedManifest> {
        let id = self.state.patterns.get(pattern)?;
        self.state.manifests.get(id)
    }

    pub fn strict_resolved_pattern(&self, pattern: &str) -> Result<&ResolvedManifest> {
        self.resolved_pattern(pattern)
            .ok_or_else(|| SkiffError::PatternMissing {
                pattern: pattern.to_string(),
            })
    }

    pub fn reference(&self, index: usize) -> &PackageReference {
        &self.state.refs[index]
    }

    pub fn reference_mut(&mut self, index: usize) -> &mut PackageReference {
        &mut self.state.refs[index]
    }

    pub fn ref_for_pattern(&self, pattern: &str) -> Option<&PackageReference> {
        let manifest = self.resolved_pattern(pattern)?;
        Some(&self.state.refs[manifest.ref_index])
    }

    /// Every pattern grouped under its package name.
    pub fn patterns_by_package(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for pattern in self.state.patterns.keys() {
            map.entry(pattern_name(pattern).to_string())
                .or_default()
                .push(pattern.clone());
        }

        map
    }

    pub fn all_info_for_package_name(&self, name: &str) -> Vec<&ResolvedManifest> {
        self.state
            .manifests
            .values()
            .filter(|manifest| manifest.id.name == name)
            .collect()
    }

    /// Package names in breadth-first order starting from `patterns`:
    /// top-level names first, then their dependencies, level by level.
    pub fn dependency_names_level_order(&self, patterns: &[String]) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = patterns
            .iter()
            .map(|pattern| pattern_name(pattern).to_string())
            .collect();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }

            for manifest in self.all_info_for_package_name(&name) {
                for dep_name in manifest
                    .dependencies
                    .keys()
                    .chain(manifest.optional_dependencies.keys())
                {
                    if !seen.contains(dep_name) {
                        queue.push_back(dep_name.clone());
                    }
                }
            }

            order.push(name);
        }

        order
    }

    /// Point every pattern of `name` at the package with `version`.
    /// Returns one pattern that now resolves to the survivor.
    pub fn collapse_all_versions_of_package(&mut self, name: &str, version: &str) -> Result<String> {
        let target = PackageId {
            name: name.to_string(),
            version: version.to_string(),
        };

        if !self.state.manifests.contains_key(&target) {
            return Err(SkiffError::VersionConflict {
                name: name.to_string(),
                reason: format!("version {} is not among the resolved candidates", version),
            });
        }

        let target_ref = self.state.ref_index_by_id[&target];
        let patterns: Vec<String> = self
            .state
            .patterns
            .iter()
            .filter(|(pattern, _)| pattern_name(pattern) == name)
            .map(|(pattern, _)| pattern.clone())
            .collect();

        for pattern in &patterns {
            let previous = self.state.patterns.insert(pattern.clone(), target.clone());

            if let Some(previous_id) = previous
                && previous_id != target
            {
                let previous_ref = self.state.ref_index_by_id[&previous_id];
                self.state.refs[previous_ref]
                    .patterns
                    .retain(|existing| existing != pattern);
            }

            self.state.refs[target_ref].add_pattern(pattern);
        }

        patterns
            .into_iter()
            .next()
            .ok_or_else(|| SkiffError::VersionConflict {
                name: name.to_string(),
                reason: "no patterns to collapse".to_string(),
            })
    }

    pub fn update_manifest(&mut self, id: &PackageId, manifest: ResolvedManifest) {
        self.state.manifests.insert(id.clone(), manifest);
    }

    /// The lockfile image for the current pattern set.
    pub fn lockfile_image(&self) -> BTreeMap<String, LockedEntry> {
        let mut image = BTreeMap::new();

        for (pattern, id) in &self.state.patterns {
            let Some(manifest) = self.state.manifests.get(id) else {
                continue;
            };

            let reference = &self.state.refs[manifest.ref_index];

            image.insert(
                pattern.clone(),
                LockedEntry {
                    version: manifest.id.version.clone(),
                    resolved: manifest.tarball.clone(),
                    integrity: manifest.integrity.clone(),
                    registry: reference.registry,
                    dependencies: manifest.dependencies.clone(),
                    optional_dependencies: manifest.optional_dependencies.clone(),
                },
            );
        }

        image
    }

    #[cfg(test)]
    pub(crate) fn state_for_tests(&mut self) -> &mut ResolverState {
        &mut self.state
    }
}

#[cfg(test)]
impl ResolverState {
    /// Install a synthetic package for tests that never touch the network.
    pub(crate) fn insert_for_tests(
        &mut self,
        pattern: &str,
        name: &str,
        version: &str,
        dependencies: &[(&str, &str)],
        registry: RegistryKind,
    ) {
        let id = PackageId {
            name: name.to_string(),
            version: version.to_string(),
        };

        let ref_index = match self.ref_index_by_id.get(&id) {
            Some(index) => *index,
            None => {
                self.refs.push(PackageReference::new(name, registry));
                let index = self.refs.len() - 1;
                self.ref_index_by_id.insert(id.clone(), index);
                index
            }
        };

        self.refs[ref_index].add_pattern(pattern);

        let deps: BTreeMap<String, String> = dependencies
            .iter()
            .map(|(dep_name, range)| (dep_name.to_string(), range.to_string()))
            .collect();

        self.manifests.entry(id.clone()).or_insert(ResolvedManifest {
            id: id.clone(),
            tarball: format!(
                "https://registry.example/{}/-/{}-{}.tgz",
                name, name, version
            ),
            integrity: None,
            dependencies: deps,
            optional_dependencies: BTreeMap::new(),
            engines: BTreeMap::new(),
            os: Vec::new(),
            cpu: Vec::new(),
            scripts: BTreeMap::new(),
            ref_index,
        });

        self.patterns.insert(pattern.to_string(), id);
        self.used_registries.insert(registry);
    }
}

#[async_recursion]
#[allow(clippy::too_many_arguments)]
async fn resolve_pattern(
    config: &SkiffConfig,
    requests: &RequestManager,
    lockfile: &Lockfile,
    force: bool,
    state: Arc<Mutex<ResolverState>>,
    semaphore: Arc<Semaphore>,
    pattern: String,
    registry: RegistryKind,
    requester: String,
    optional: bool,
) -> Result<PackageId> {
    // already resolved: only record the new requester
    {
        let mut guard = state.lock().await;
        if let Some(id) = guard.patterns.get(&pattern).cloned() {
            let ref_index = guard.ref_index_by_id[&id];
            guard.refs[ref_index].add_request(&requester, optional);
            return Ok(id);
        }
    }

    let name = pattern_name(&pattern).to_string();
    let locked = lockfile
        .get_locked(&pattern)
        .or_else(|| {
            // a bare pattern may be pinned under a ranged key
            if pattern_range(&pattern).is_none() {
                lockfile.get_locked_ignoring_version(&name)
            } else {
                None
            }
        })
        .cloned();

    let (id, tarball, integrity, dependencies, optional_dependencies, engines, os, cpu, scripts) =
        match exotic_kind(&pattern) {
            Some(ExoticKind::Url) => {
                let url = pattern_range(&pattern).unwrap_or_default().to_string();
                let version = locked
                    .as_ref()
                    .map(|entry| entry.version.clone())
                    .unwrap_or_else(|| "0.0.0".to_string());

                let id = PackageId {
                    name: name.clone(),
                    version,
                };

                let dependencies = locked
                    .as_ref()
                    .map(|entry| entry.dependencies.clone())
                    .unwrap_or_default();

                (
                    id,
                    url,
                    locked.as_ref().and_then(|entry| entry.integrity.clone()),
                    dependencies,
                    BTreeMap::new(),
                    BTreeMap::new(),
                    Vec::new(),
                    Vec::new(),
                    BTreeMap::new(),
                )
            }

            Some(ExoticKind::Git) => {
                return Err(SkiffError::UnsupportedPattern {
                    pattern,
                    reason: "git dependencies are not supported".to_string(),
                });
            }

            Some(ExoticKind::File) => {
                return Err(SkiffError::UnsupportedPattern {
                    pattern,
                    reason: "file dependencies are not supported".to_string(),
                });
            }

            None => {
                if let Some(entry) = locked.as_ref().filter(|_| !force) {
                    // the lockfile pins this pattern: resolve offline
                    let id = PackageId {
                        name: name.clone(),
                        version: entry.version.clone(),
                    };

                    (
                        id,
                        entry.resolved.clone(),
                        entry.integrity.clone(),
                        entry.dependencies.clone(),
                        entry.optional_dependencies.clone(),
                        BTreeMap::new(),
                        Vec::new(),
                        Vec::new(),
                        BTreeMap::new(),
                    )
                } else {
                    let range = match pattern_range(&pattern) {
                        Some(range) => range.to_string(),
                        None => locked
                            .as_ref()
                            .map(|entry| entry.version.clone())
                            .unwrap_or_else(|| "latest".to_string()),
                    };

                    let metadata = {
                        let _permit = semaphore.acquire().await.unwrap();
                        registry::fetch_package(config, requests, registry, &name, force).await?
                    };

                    let meta = select_version(&name, &range, &metadata)?;

                    let id = PackageId {
                        name: name.clone(),
                        version: meta.version.clone(),
                    };

                    (
                        id,
                        meta.dist.tarball.clone(),
                        meta.dist.integrity.clone(),
                        meta.dependencies.clone(),
                        meta.optional_dependencies.clone(),
                        meta.engines.clone(),
                        meta.os.clone(),
                        meta.cpu.clone(),
                        meta.scripts.clone(),
                    )
                }
            }
        };

    // register the pattern, the reference, and a manifest placeholder
    {
        let mut guard = state.lock().await;

        let ref_index = match guard.ref_index_by_id.get(&id) {
            Some(index) => *index,
            None => {
                guard.refs.push(PackageReference::new(&name, registry));
                let index = guard.refs.len() - 1;
                guard.ref_index_by_id.insert(id.clone(), index);
                index
            }
        };

        guard.refs[ref_index].add_request(&requester, optional);
        guard.refs[ref_index].add_pattern(&pattern);
        guard.used_registries.insert(registry);
        guard.patterns.insert(pattern.clone(), id.clone());

        if guard.manifests.contains_key(&id) {
            // another pattern already resolved this package
            return Ok(id);
        }

        guard.manifests.insert(
            id.clone(),
            ResolvedManifest {
                id: id.clone(),
                tarball,
                integrity,
                dependencies: dependencies.clone(),
                optional_dependencies: optional_dependencies.clone(),
                engines,
                os,
                cpu,
                scripts,
                ref_index,
            },
        );
    }

    let mut dep_tasks = Vec::new();

    for (dep_name, dep_range) in &dependencies {
        let child_pattern = format!("{}@{}", dep_name, dep_range);
        let state = state.clone();
        let semaphore = semaphore.clone();
        let requester = pattern.clone();

        dep_tasks.push(async move {
            resolve_pattern(
                config, requests, lockfile, force, state, semaphore, child_pattern, registry,
                requester, optional,
            )
            .await
        });
    }

    let dep_results = join_all(dep_tasks).await;
    for result in dep_results {
        result?;
    }

    let mut optional_tasks = Vec::new();

    for (dep_name, dep_range) in &optional_dependencies {
        let child_pattern = format!("{}@{}", dep_name, dep_range);
        let state = state.clone();
        let semaphore = semaphore.clone();
        let requester = pattern.clone();
        let dep_name = dep_name.clone();

        optional_tasks.push(async move {
            if let Err(error) = resolve_pattern(
                config, requests, lockfile, force, state, semaphore, child_pattern, registry,
                requester, true,
            )
            .await
            {
                console::verbose(&format!(
                    "skipping optional dependency {}: {}",
                    dep_name, error
                ));
            }
        });
    }

    join_all(optional_tasks).await;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resolver<'a>(
        config: &'a SkiffConfig,
        requests: &'a RequestManager,
        lockfile: &'a Lockfile,
    ) -> PackageResolver<'a> {
        PackageResolver::new(config, requests, lockfile, false)
    }

    fn fixtures() -> (SkiffConfig, RequestManager, Lockfile) {
        let dir = std::env::temp_dir();
        (
            SkiffConfig::load(&dir),
            RequestManager::new(),
            Lockfile::default(),
        )
    }

    #[test]
    fn exotic_classification() {
        assert_eq!(exotic_kind("a@git+ssh://host/repo"), Some(ExoticKind::Git));
        assert_eq!(exotic_kind("a@git:host/repo"), Some(ExoticKind::Git));
        assert_eq!(exotic_kind("a@file:../local"), Some(ExoticKind::File));
        assert_eq!(
            exotic_kind("a@https://host/a-1.0.0.tgz"),
            Some(ExoticKind::Url)
        );
        assert_eq!(exotic_kind("a@^1.0.0"), None);
        assert_eq!(exotic_kind("a"), None);
    }

    #[test]
    fn level_order_walks_breadth_first() {
        let (config, requests, lockfile) = fixtures();
        let mut resolver = test_resolver(&config, &requests, &lockfile);

        {
            let state = resolver.state_for_tests();
            state.insert_for_tests("app-dep@^1.0.0", "app-dep", "1.0.0", &[("leaf", "^2.0.0")], RegistryKind::Npm);
            state.insert_for_tests("other@^1.0.0", "other", "1.1.0", &[], RegistryKind::Npm);
            state.insert_for_tests("leaf@^2.0.0", "leaf", "2.3.0", &[], RegistryKind::Npm);
        }

        let order = resolver.dependency_names_level_order(&[
            "app-dep@^1.0.0".to_string(),
            "other@^1.0.0".to_string(),
        ]);

        assert_eq!(order, vec!["app-dep", "other", "leaf"]);
    }

    #[test]
    fn collapse_repoints_all_patterns() {
        let (config, requests, lockfile) = fixtures();
        let mut resolver = test_resolver(&config, &requests, &lockfile);

        {
            let state = resolver.state_for_tests();
            state.insert_for_tests("b@^1.0.0", "b", "1.5.0", &[], RegistryKind::Npm);
            state.insert_for_tests("b@^2.0.0", "b", "2.0.0", &[], RegistryKind::Npm);
        }

        let collapsed = resolver.collapse_all_versions_of_package("b", "2.0.0").unwrap();
        assert!(collapsed.starts_with("b@"));

        for pattern in ["b@^1.0.0", "b@^2.0.0"] {
            let manifest = resolver.resolved_pattern(pattern).unwrap();
            assert_eq!(manifest.id.version, "2.0.0");
        }
    }

    #[test]
    fn collapse_to_unknown_version_fails() {
        let (config, requests, lockfile) = fixtures();
        let mut resolver = test_resolver(&config, &requests, &lockfile);

        resolver
            .state_for_tests()
            .insert_for_tests("b@^1.0.0", "b", "1.5.0", &[], RegistryKind::Npm);

        assert!(resolver.collapse_all_versions_of_package("b", "9.9.9").is_err());
    }

    #[test]
    fn lockfile_image_covers_every_pattern() {
        let (config, requests, lockfile) = fixtures();
        let mut resolver = test_resolver(&config, &requests, &lockfile);

        {
            let state = resolver.state_for_tests();
            state.insert_for_tests("a@^1.0.0", "a", "1.2.0", &[("b", "^2.0.0")], RegistryKind::Npm);
            state.insert_for_tests("b@^2.0.0", "b", "2.0.1", &[], RegistryKind::Npm);
        }

        let image = resolver.lockfile_image();
        assert_eq!(image.len(), 2);
        assert_eq!(image["a@^1.0.0"].version, "1.2.0");
        assert_eq!(
            image["a@^1.0.0"].dependencies.get("b").map(String::as_str),
            Some("^2.0.0")
        );
    }
}
