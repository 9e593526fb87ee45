use crate::resolver::{PackageResolver, ROOT_REQUESTER};
use crate::{Result, SkiffError};
use dialoguer::Select;
use std::collections::BTreeMap;

/// One selectable version during flat-mode disambiguation.
#[derive(Debug, Clone)]
pub struct VersionOption {
    pub version: String,
    pub label: String,
}

/// The only user-input point in the installer: picking the surviving
/// version of a package that resolved to several.
pub trait Disambiguator {
    fn choose(&self, name: &str, options: &[VersionOption]) -> Result<String>;
}

/// Interactive picker on the terminal.
pub struct SelectDisambiguator;

impl Disambiguator for SelectDisambiguator {
    fn choose(&self, name: &str, options: &[VersionOption]) -> Result<String> {
        let labels: Vec<&str> = options.iter().map(|option| option.label.as_str()).collect();

        let index = Select::new()
            .with_prompt(format!("Please select the version of {} to use", name))
            .items(&labels)
            .default(0)
            .interact()
            .map_err(|err| SkiffError::VersionConflict {
                name: name.to_string(),
                reason: err.to_string(),
            })?;

        Ok(options[index].version.clone())
    }
}

/// Scripted answers, for tools and tests.
pub struct PresetDisambiguator {
    choices: BTreeMap<String, String>,
}

impl PresetDisambiguator {
    pub fn new(choices: BTreeMap<String, String>) -> Self {
        PresetDisambiguator { choices }
    }
}

impl Disambiguator for PresetDisambiguator {
    fn choose(&self, name: &str, _options: &[VersionOption]) -> Result<String> {
        self.choices
            .get(name)
            .cloned()
            .ok_or_else(|| SkiffError::VersionConflict {
                name: name.to_string(),
                reason: "no preset choice for this package".to_string(),
            })
    }
}

/// Fails fast; used where prompting is impossible.
pub struct NonInteractiveDisambiguator;

impl Disambiguator for NonInteractiveDisambiguator {
    fn choose(&self, name: &str, options: &[VersionOption]) -> Result<String> {
        let versions: Vec<&str> = options
            .iter()
            .map(|option| option.version.as_str())
            .collect();

        Err(SkiffError::VersionConflict {
            name: name.to_string(),
            reason: format!(
                "candidates {} need a resolutions entry or an interactive run",
                versions.join(", ")
            ),
        })
    }
}

/// Collapse every package to one version, walking names in level order.
/// Returns the flattened pattern list and whether any new resolution was
/// recorded (and so needs persisting into the root manifest).
pub fn flatten(
    resolver: &mut PackageResolver<'_>,
    resolutions: &mut BTreeMap<String, String>,
    disambiguator: &dyn Disambiguator,
    patterns: Vec<String>,
) -> Result<(Vec<String>, bool)> {
    if !resolver.flat {
        return Ok((patterns, false));
    }

    let patterns_by_package = resolver.patterns_by_package();
    let mut flattened = Vec::new();
    let mut added_resolutions = false;

    for name in resolver.dependency_names_level_order(&patterns) {
        let candidates: Vec<(String, Vec<String>)> = resolver
            .all_info_for_package_name(&name)
            .into_iter()
            .filter(|manifest| !resolver.reference(manifest.ref_index).ignore)
            .map(|manifest| {
                (
                    manifest.id.version.clone(),
                    resolver.reference(manifest.ref_index).requests.clone(),
                )
            })
            .collect();

        match candidates.len() {
            0 => continue,
            1 => {
                // all patterns resolve to the same entity; any one will do
                if let Some(list) = patterns_by_package.get(&name)
                    && let Some(first) = list.first()
                {
                    flattened.push(first.clone());
                }
                continue;
            }
            _ => {}
        }

        let version = match resolutions.get(&name) {
            Some(pinned) if candidates.iter().any(|(version, _)| version == pinned) => {
                pinned.clone()
            }
            _ => {
                let options: Vec<VersionOption> = candidates
                    .iter()
                    .map(|(version, requesters)| VersionOption {
                        version: version.clone(),
                        label: format!(
                            "used by {}, version {}",
                            describe_requesters(requesters),
                            version
                        ),
                    })
                    .collect();

                let chosen = disambiguator.choose(&name, &options)?;
                resolutions.insert(name.clone(), chosen.clone());
                added_resolutions = true;
                chosen
            }
        };

        flattened.push(resolver.collapse_all_versions_of_package(&name, &version)?);
    }

    Ok((flattened, added_resolutions))
}

fn describe_requesters(requesters: &[String]) -> String {
    let named: Vec<&str> = requesters
        .iter()
        .map(|requester| {
            if requester == ROOT_REQUESTER {
                "the root project"
            } else {
                requester.as_str()
            }
        })
        .collect();

    if named.is_empty() {
        "nothing".to_string()
    } else {
        named.join(", ")
    }
}
