use crate::console;
use crate::resolver::PackageResolver;
use crate::{Result, SkiffError};
use std::env;

pub fn current_os() -> &'static str {
    match env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

pub fn current_cpu() -> &'static str {
    match env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Empty lists match everything; a `!`-prefixed entry excludes.
pub fn platform_matches(list: &[String], current: &str) -> bool {
    if list.is_empty() {
        return true;
    }

    let mut any_positive = false;
    let mut matched = false;

    for entry in list {
        if let Some(excluded) = entry.strip_prefix('!') {
            if excluded == current {
                return false;
            }
        } else {
            any_positive = true;
            if entry == current {
                matched = true;
            }
        }
    }

    !any_positive || matched
}

pub fn is_platform_compatible(os: &[String], cpu: &[String]) -> bool {
    platform_matches(os, current_os()) && platform_matches(cpu, current_cpu())
}

/// Enforce platform and engine requirements across the resolved set.
/// Incompatible packages that only optional requesters pulled in are
/// marked ignored; a required incompatible package is fatal.
pub struct Compatibility;

impl Compatibility {
    pub fn init(
        resolver: &mut PackageResolver<'_>,
        ignore_platform: bool,
        ignore_engines: bool,
    ) -> Result<()> {
        let own_version = env!("CARGO_PKG_VERSION");

        let mut failures = Vec::new();

        for manifest in resolver.manifests() {
            let mut reason = None;

            if !ignore_platform && !is_platform_compatible(&manifest.os, &manifest.cpu) {
                reason = Some(format!(
                    "needs os {:?} cpu {:?}, running {}/{}",
                    manifest.os,
                    manifest.cpu,
                    current_os(),
                    current_cpu()
                ));
            }

            if reason.is_none()
                && !ignore_engines
                && let Some(range) = manifest.engines.get("skiff")
                && !skiff_range::satisfies(own_version, range)
            {
                reason = Some(format!(
                    "needs skiff {}, running {}",
                    range, own_version
                ));
            }

            if let Some(reason) = reason {
                failures.push((manifest.id.clone(), manifest.ref_index, reason));
            }
        }

        for (id, ref_index, reason) in failures {
            let reference = resolver.reference_mut(ref_index);

            if reference.optional {
                console::warn(&format!(
                    "{}@{} is incompatible with this platform and has been skipped ({})",
                    id.name, id.version, reason
                ));
                reference.ignore = true;
                continue;
            }

            return Err(SkiffError::Incompatible {
                name: id.name,
                version: id.version,
                reason,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_match() {
        assert!(platform_matches(&[], "linux"));
    }

    #[test]
    fn positive_entries_must_include_current() {
        let list = vec!["darwin".to_string(), "linux".to_string()];
        assert!(platform_matches(&list, "linux"));
        assert!(!platform_matches(&list, "win32"));
    }

    #[test]
    fn negated_entry_excludes() {
        let list = vec!["!win32".to_string()];
        assert!(platform_matches(&list, "linux"));
        assert!(!platform_matches(&list, "win32"));
    }
}
