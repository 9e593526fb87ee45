use crate::clean;
use crate::compat::Compatibility;
use crate::config::SkiffConfig;
use crate::console;
use crate::fetcher::{PackageFetcher, tarball_basename};
use crate::integrity::IntegrityChecker;
use crate::linker::Linker;
use crate::lockfile::Lockfile;
use crate::manifest::{DependencyCategory, ManifestFile, RootManifest, RootManifests};
use crate::registry::{RegistryKind, RequestManager};
use crate::resolver::{DependencyRequest, PackageResolver, RequestHint};
use crate::scripts::ScriptRunner;
use crate::update_check::{self, UpgradeHint};
use crate::{Result, SkiffError};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

mod flags;
mod flatten;
mod requests;

pub use flags::InstallFlags;
pub use flatten::{
    Disambiguator, NonInteractiveDisambiguator, PresetDisambiguator, SelectDisambiguator,
    VersionOption, flatten,
};
pub use requests::{CollectedRequests, collect_requests};

const LEGACY_SHRINKWRAP: &str = "npm-shrinkwrap.json";

/// The install pipeline, in execution order. Modeling the steps as data
/// keeps progress reporting and bailout handling in one driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallStep {
    Resolve,
    FetchAndCompat,
    Link,
    Scripts,
    Har,
    Clean,
}

impl InstallStep {
    fn title(&self) -> &'static str {
        match self {
            InstallStep::Resolve => "Resolving packages...",
            InstallStep::FetchAndCompat => "Fetching packages...",
            InstallStep::Link => "Linking dependencies...",
            InstallStep::Scripts => "Building fresh packages...",
            InstallStep::Har => "Saving request log...",
            InstallStep::Clean => "Cleaning modules...",
        }
    }
}

#[derive(Debug, Default)]
pub struct InstallResult {
    pub top_level_patterns: Vec<String>,
    pub flattened_patterns: Vec<String>,
    /// top-level pattern → resolved version
    pub resolved_versions: BTreeMap<String, String>,
    pub package_count: usize,
    pub bailed_out: bool,
}

/// An add-mode request: `lodash@^4.0.0` or just `lodash`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSpec {
    pub name: String,
    pub range: Option<String>,
}

pub fn parse_spec(spec: &str) -> ParsedSpec {
    if let Some(without_at) = spec.strip_prefix('@') {
        if let Some(index) = without_at.rfind('@') {
            let name = format!("@{}", &without_at[..index]);
            let range = without_at[index + 1..].to_string();
            return ParsedSpec {
                name,
                range: (!range.is_empty()).then_some(range),
            };
        }

        return ParsedSpec {
            name: spec.to_string(),
            range: None,
        };
    }

    match spec.rfind('@') {
        Some(index) if index > 0 => {
            let range = spec[index + 1..].to_string();
            ParsedSpec {
                name: spec[..index].to_string(),
                range: (!range.is_empty()).then_some(range),
            }
        }
        _ => ParsedSpec {
            name: spec.to_string(),
            range: None,
        },
    }
}

/// The `skiff add` invocation equivalent to an `install` that was given
/// positional arguments, synthesized from the save-shape flags.
pub fn add_suggestion(specs: &[String], flags: &InstallFlags) -> String {
    let mut suggestion = String::from("skiff add");

    for spec in specs {
        suggestion.push(' ');
        suggestion.push_str(spec);
    }

    for (enabled, flag) in [
        (flags.save_dev, "--dev"),
        (flags.save_peer, "--peer"),
        (flags.save_optional, "--optional"),
        (flags.save_exact, "--exact"),
        (flags.save_tilde, "--tilde"),
    ] {
        if enabled {
            suggestion.push(' ');
            suggestion.push_str(flag);
        }
    }

    suggestion
}

pub fn positional_args_error(specs: &[String], flags: &InstallFlags) -> SkiffError {
    SkiffError::InstallPositionalArgs {
        suggestion: add_suggestion(specs, flags),
    }
}

/// Install everything the root manifests request, wrapped in the root
/// project's lifecycle scripts.
pub async fn install(
    config: &SkiffConfig,
    flags: InstallFlags,
    disambiguator: &dyn Disambiguator,
) -> Result<InstallResult> {
    let mut flags = flags.normalize(config);

    config.execute_lifecycle_script("preinstall")?;

    let result = install_body(config, &mut flags, disambiguator, &[]).await?;

    run_completion_phases(config)?;

    Ok(result)
}

/// Add new dependencies: resolve and install them together with the
/// existing tree, then record them in the root manifest with the requested
/// save shape.
pub async fn add(
    config: &SkiffConfig,
    flags: InstallFlags,
    specs: &[String],
    disambiguator: &dyn Disambiguator,
) -> Result<InstallResult> {
    let mut flags = flags.normalize(config);
    let parsed: Vec<ParsedSpec> = specs.iter().map(|spec| parse_spec(spec)).collect();

    config.execute_lifecycle_script("preinstall")?;

    let result = install_body(config, &mut flags, disambiguator, &parsed).await?;

    if !result.bailed_out {
        save_added_specs(config, &flags, &parsed, &result)?;
    }

    run_completion_phases(config)?;

    Ok(result)
}

fn run_completion_phases(config: &SkiffConfig) -> Result<()> {
    config.execute_lifecycle_script("install")?;
    config.execute_lifecycle_script("postinstall")?;

    if !config.production {
        config.execute_lifecycle_script("prepublish")?;
        config.execute_lifecycle_script("prepare")?;
    }

    Ok(())
}

/// Resolve, flatten and mark-ignore without touching the working
/// directory; `fetch` additionally materializes the cache and runs the
/// compatibility checks. For tools that want the graph, not an install.
pub async fn hydrate(
    config: &SkiffConfig,
    flags: InstallFlags,
    fetch: bool,
    disambiguator: &dyn Disambiguator,
) -> Result<Vec<String>> {
    let mut flags = flags.normalize(config);

    let lockfile = Lockfile::read(&config.cwd)?;
    let request_manager = RequestManager::new();

    let collected = collect_requests(config, &lockfile, &mut flags, &[], false)?;

    let mut resolver = PackageResolver::new(config, &request_manager, &lockfile, flags.force);
    resolver.init(collected.requests.clone(), flags.flat).await?;

    let mut resolutions = collected.resolutions.clone();
    let (flattened, _) = flatten(
        &mut resolver,
        &mut resolutions,
        disambiguator,
        collected.patterns.clone(),
    )?;

    mark_ignored(&mut resolver, &collected.ignore_patterns);

    if fetch {
        PackageFetcher::new(config, &request_manager)
            .init(&resolver)
            .await?;
        Compatibility::init(&mut resolver, flags.ignore_platform, flags.ignore_engines)?;
    }

    Ok(flattened)
}

async fn install_body(
    config: &SkiffConfig,
    flags: &mut InstallFlags,
    disambiguator: &dyn Disambiguator,
    extra: &[ParsedSpec],
) -> Result<InstallResult> {
    if config.cwd.join(LEGACY_SHRINKWRAP).is_file() {
        console::warn(&format!(
            "{} found. This file is not honored; skiff-lock.yaml is authoritative.",
            LEGACY_SHRINKWRAP
        ));
    }

    let lockfile = Lockfile::read(&config.cwd)?;
    let request_manager = RequestManager::new();
    let integrity = IntegrityChecker::new(config);

    let mut update_handle = spawn_update_check(config);

    let exclude: Vec<String> = extra.iter().map(|spec| spec.name.clone()).collect();
    let mut collected = collect_requests(config, &lockfile, flags, &exclude, false)?;

    let added_registry = collected
        .manifests
        .first()
        .map(|file| file.registry)
        .unwrap_or(RegistryKind::Npm);

    for spec in extra {
        let pattern = added_pattern(spec);
        let hint = if flags.save_dev {
            RequestHint::Dev
        } else if flags.save_optional {
            RequestHint::Optional
        } else {
            RequestHint::None
        };

        collected.requests.push(DependencyRequest {
            pattern: pattern.clone(),
            registry: added_registry,
            hint,
            optional: false,
        });
        collected.patterns.push(pattern.clone());
        collected.used_patterns.push(pattern);
    }

    let mut resolutions = collected.resolutions.clone();
    let mut resolver = PackageResolver::new(config, &request_manager, &lockfile, flags.force);

    let mut steps = vec![
        InstallStep::Resolve,
        InstallStep::FetchAndCompat,
        InstallStep::Link,
        InstallStep::Scripts,
    ];
    if flags.har {
        steps.push(InstallStep::Har);
    }
    if clean::clean_marker_exists(config) {
        steps.push(InstallStep::Clean);
    }

    let total = steps.len();
    let top_level_patterns = collected.patterns.clone();
    let mut flattened_patterns = Vec::new();
    let mut bailed_out = false;

    'pipeline: for (index, step) in steps.iter().enumerate() {
        console::step(index + 1, total, step.title());

        match step {
            InstallStep::Resolve => {
                resolver.init(collected.requests.clone(), flags.flat).await?;

                let (flattened, added) = flatten(
                    &mut resolver,
                    &mut resolutions,
                    disambiguator,
                    top_level_patterns.clone(),
                )?;
                flattened_patterns = flattened;

                if added {
                    persist_resolutions(config, &mut collected.manifests, &resolutions)?;
                }

                // deciding to skip only after flattening keeps flat-mode
                // disambiguation (and its persisted resolutions) ahead of
                // the shortcut
                if bailout(
                    config,
                    flags,
                    &lockfile,
                    &integrity,
                    &collected.used_patterns,
                    &resolver,
                )? {
                    bailed_out = true;
                    break 'pipeline;
                }
            }

            InstallStep::FetchAndCompat => {
                mark_ignored(&mut resolver, &collected.ignore_patterns);

                PackageFetcher::new(config, &request_manager)
                    .init(&resolver)
                    .await?;

                Compatibility::init(&mut resolver, flags.ignore_platform, flags.ignore_engines)?;
            }

            InstallStep::Link => {
                // gone before the tree mutates, rewritten only on success
                integrity.remove_integrity_file()?;

                Linker::new(config).init(&resolver, &flattened_patterns, flags.link_duplicates)?;
            }

            InstallStep::Scripts => {
                if flags.ignore_scripts {
                    console::warn("Lifecycle scripts were skipped (ignore-scripts is set).");
                } else {
                    ScriptRunner::new(config).init(&resolver, &flattened_patterns)?;
                }
            }

            InstallStep::Har => {
                let filename = har_filename();
                request_manager.save_har(&config.cwd.join(&filename))?;
                console::info(&format!("Saved request log to {}", filename));
            }

            InstallStep::Clean => {
                let summary = clean::clean(config)?;
                console::info(&format!(
                    "Cleaned {} entries ({})",
                    summary.removed_count,
                    clean::format_bytes(summary.removed_bytes)
                ));
            }
        }
    }

    if !bailed_out {
        save_lockfile_and_integrity(
            config,
            flags,
            &lockfile,
            &integrity,
            &resolver,
            &top_level_patterns,
        )?;
    }

    match (&mut update_handle).now_or_never() {
        Some(Ok(Some(hint))) => hint.print(),
        Some(_) => {}
        None => update_handle.abort(),
    }

    request_manager.clear();

    let resolved_versions: BTreeMap<String, String> = top_level_patterns
        .iter()
        .filter_map(|pattern| {
            resolver
                .resolved_pattern(pattern)
                .map(|manifest| (pattern.clone(), manifest.id.version.clone()))
        })
        .collect();

    let package_count = resolver
        .manifests()
        .filter(|manifest| !resolver.reference(manifest.ref_index).ignore)
        .count();

    Ok(InstallResult {
        top_level_patterns,
        flattened_patterns,
        resolved_versions,
        package_count,
        bailed_out,
    })
}

/// Decide whether the on-disk state already satisfies the request.
fn bailout(
    config: &SkiffConfig,
    flags: &InstallFlags,
    lockfile: &Lockfile,
    integrity: &IntegrityChecker<'_>,
    used_patterns: &[String],
    resolver: &PackageResolver<'_>,
) -> Result<bool> {
    if flags.skip_integrity_check || flags.force {
        return Ok(false);
    }

    if lockfile.cache_is_empty() {
        return Ok(false);
    }

    let check = integrity.check(used_patterns, lockfile, flags);

    if flags.frozen_lockfile && !check.missing_patterns.is_empty() {
        return Err(SkiffError::FrozenLockfile {
            reason: format!(
                "lockfile has no entry for {}",
                check.missing_patterns.join(", ")
            ),
        });
    }

    if check.integrity_matches && lockfile.file_exists() {
        console::success("Already up-to-date.");
        return Ok(true);
    }

    if used_patterns.is_empty() && !check.integrity_file_missing {
        for registry in RegistryKind::ALL {
            if config.cwd.join(registry.manifest_filename()).is_file() {
                let folder = config.modules_dir(registry);
                fs::create_dir_all(&folder).map_err(|source| SkiffError::WriteFile {
                    path: folder,
                    source,
                })?;
            }
        }

        save_lockfile_and_integrity(config, flags, lockfile, integrity, resolver, &[])?;
        console::success("Nothing to install.");
        return Ok(true);
    }

    Ok(false)
}

/// A top-level pattern is dead weight only when nothing but the root asked
/// for it; anything with a second requester must stay installed.
fn mark_ignored(resolver: &mut PackageResolver<'_>, ignore_patterns: &[String]) {
    for pattern in ignore_patterns {
        let Some(ref_index) = resolver
            .resolved_pattern(pattern)
            .map(|manifest| manifest.ref_index)
        else {
            continue;
        };

        let reference = resolver.reference_mut(ref_index);
        if reference.requests.len() == 1 {
            reference.ignore = true;
        }
    }
}

fn save_lockfile_and_integrity(
    config: &SkiffConfig,
    flags: &InstallFlags,
    lockfile: &Lockfile,
    integrity: &IntegrityChecker<'_>,
    resolver: &PackageResolver<'_>,
    patterns: &[String],
) -> Result<()> {
    if !flags.lockfile || flags.pure_lockfile {
        return Ok(());
    }

    let candidate = resolver.lockfile_image();

    if config.offline_mirror_path().is_some() {
        let kept: BTreeSet<String> = candidate
            .values()
            .map(|entry| tarball_basename(&entry.resolved))
            .collect();
        config.prune_offline_mirror(&kept)?;
    }

    integrity.save(patterns, &candidate, flags, resolver.used_registries())?;

    let lockfile_unchanged = candidate.iter().all(|(pattern, entry)| {
        lockfile
            .get_locked(pattern)
            .map(|existing| existing.resolved == entry.resolved)
            .unwrap_or(false)
    });

    if lockfile_unchanged && !patterns.is_empty() && !flags.force {
        console::verbose("lockfile is unchanged, skipping the rewrite");
        return Ok(());
    }

    lockfile.write(&candidate)?;
    console::success("Saved lockfile.");

    Ok(())
}

fn persist_resolutions(
    config: &SkiffConfig,
    manifests: &mut RootManifests,
    resolutions: &BTreeMap<String, String>,
) -> Result<()> {
    let Some(file) = manifests.files.first_mut() else {
        return Ok(());
    };

    for (name, version) in resolutions {
        file.manifest
            .resolutions
            .insert(name.clone(), version.clone());
    }

    config.save_root_manifests(manifests)
}

fn added_pattern(spec: &ParsedSpec) -> String {
    match &spec.range {
        Some(range) => format!("{}@{}", spec.name, range),
        None => format!("{}@latest", spec.name),
    }
}

fn save_added_specs(
    config: &SkiffConfig,
    flags: &InstallFlags,
    parsed: &[ParsedSpec],
    result: &InstallResult,
) -> Result<()> {
    if parsed.is_empty() {
        return Ok(());
    }

    let mut manifests = config.root_manifests()?;

    if manifests.files.is_empty() {
        manifests.files.push(ManifestFile {
            registry: RegistryKind::Npm,
            path: config.cwd.join(RegistryKind::Npm.manifest_filename()),
            manifest: RootManifest::default(),
        });
    }

    let file = manifests
        .files
        .first_mut()
        .expect("a manifest file was just ensured");

    for spec in parsed {
        let pattern = added_pattern(spec);

        let Some(version) = result.resolved_versions.get(&pattern) else {
            continue;
        };

        let range = spec
            .range
            .clone()
            .unwrap_or_else(|| skiff_range::save_range(version, flags.save_exact, flags.save_tilde));

        if flags.save_peer {
            file.manifest.peer_dependencies.insert(spec.name.clone(), range);
        } else {
            let category = if flags.save_dev {
                DependencyCategory::Dev
            } else if flags.save_optional {
                DependencyCategory::Optional
            } else {
                DependencyCategory::Runtime
            };

            file.manifest
                .category_mut(category)
                .insert(spec.name.clone(), range);
        }

        console::added(&spec.name, version, flags.save_dev);
    }

    manifests.save()
}

fn spawn_update_check(config: &SkiffConfig) -> tokio::task::JoinHandle<Option<UpgradeHint>> {
    let config = config.clone();

    tokio::spawn(async move {
        let requests = RequestManager::new();
        update_check::check_for_update(&config, &requests).await
    })
}

fn har_filename() -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
        .replace(':', "-");

    format!("skiff-install_{}.har", timestamp)
}
