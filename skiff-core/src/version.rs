use crate::registry::{RegistryPackage, RegistryVersion};
use crate::{Result, SkiffError};
use skiff_range::{RangeSet, Version};

/// Pick the version of `package` satisfying `range`: a dist-tag wins
/// outright, otherwise the highest matching version.
pub fn select_version(name: &str, range: &str, package: &RegistryPackage) -> Result<RegistryVersion> {
    let trimmed = range.trim();

    if let Some(tag_version) = package.dist_tags.get(trimmed)
        && let Some(meta) = package.versions.get(tag_version)
    {
        return Ok(meta.clone());
    }

    let ranges = parse_range_set(name, range)?;
    let mut selected: Option<(Version, &RegistryVersion)> = None;

    for (version_str, meta) in package.versions.iter() {
        let Ok(version) = Version::parse(version_str) else {
            continue;
        };

        if !ranges.matches(&version) {
            continue;
        }

        match &selected {
            Some((best, _)) if version <= *best => {}
            _ => selected = Some((version, meta)),
        }
    }

    match selected {
        Some((_, meta)) => Ok(meta.clone()),
        None => Err(SkiffError::ResolutionFailed {
            name: name.to_string(),
            range: range.to_string(),
            reason: "no published version matches the range".to_string(),
        }),
    }
}

pub fn parse_range_set(name: &str, original: &str) -> Result<RangeSet> {
    RangeSet::parse(original).map_err(|err| SkiffError::Semver {
        value: format!("{}@{}", name, original),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryDist;
    use std::collections::BTreeMap;

    fn version_meta(version: &str) -> RegistryVersion {
        RegistryVersion {
            version: version.to_string(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            engines: BTreeMap::new(),
            os: Vec::new(),
            cpu: Vec::new(),
            scripts: BTreeMap::new(),
            dist: RegistryDist {
                tarball: format!("https://registry.example/pkg/-/pkg-{}.tgz", version),
                integrity: None,
            },
        }
    }

    fn package(versions: &[&str]) -> RegistryPackage {
        let mut map = BTreeMap::new();
        for version in versions {
            map.insert(version.to_string(), version_meta(version));
        }
        RegistryPackage {
            versions: map,
            dist_tags: BTreeMap::new(),
        }
    }

    #[test]
    fn picks_highest_matching_version() {
        let pkg = package(&["1.0.0", "1.4.2", "2.0.0"]);
        let selected = select_version("pkg", "^1.0.0", &pkg).unwrap();
        assert_eq!(selected.version, "1.4.2");
    }

    #[test]
    fn dist_tag_wins() {
        let mut pkg = package(&["1.0.0", "2.0.0"]);
        pkg.dist_tags.insert("latest".to_string(), "1.0.0".to_string());

        let selected = select_version("pkg", "latest", &pkg).unwrap();
        assert_eq!(selected.version, "1.0.0");
    }

    #[test]
    fn unmatched_range_is_an_error() {
        let pkg = package(&["1.0.0"]);
        let result = select_version("pkg", "^3.0.0", &pkg);
        assert!(result.is_err());
    }
}
