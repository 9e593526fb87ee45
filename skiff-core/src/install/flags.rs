use crate::config::SkiffConfig;

/// Effective install flags: invocation flags folded with configuration.
/// The rest of the installer reads flags only through this record.
#[derive(Debug, Clone)]
pub struct InstallFlags {
    pub har: bool,
    pub ignore_platform: bool,
    pub ignore_engines: bool,
    pub ignore_scripts: bool,
    pub ignore_optional: bool,
    pub force: bool,
    pub flat: bool,
    pub link_duplicates: bool,
    pub check_files: bool,
    pub lockfile: bool,
    pub pure_lockfile: bool,
    pub frozen_lockfile: bool,
    pub skip_integrity_check: bool,

    // save shape, only meaningful in add mode
    pub save_dev: bool,
    pub save_peer: bool,
    pub save_optional: bool,
    pub save_exact: bool,
    pub save_tilde: bool,
}

impl Default for InstallFlags {
    fn default() -> Self {
        InstallFlags {
            har: false,
            ignore_platform: false,
            ignore_engines: false,
            ignore_scripts: false,
            ignore_optional: false,
            force: false,
            flat: false,
            link_duplicates: false,
            check_files: false,
            lockfile: true,
            pure_lockfile: false,
            frozen_lockfile: false,
            skip_integrity_check: false,
            save_dev: false,
            save_peer: false,
            save_optional: false,
            save_exact: false,
            save_tilde: false,
        }
    }
}

/// Config options that force their flag on. Flags never override these
/// downward.
const FORCING_OPTIONS: [(&str, fn(&mut InstallFlags)); 5] = [
    ("ignore-scripts", |flags| flags.ignore_scripts = true),
    ("ignore-platform", |flags| flags.ignore_platform = true),
    ("ignore-engines", |flags| flags.ignore_engines = true),
    ("ignore-optional", |flags| flags.ignore_optional = true),
    ("force", |flags| flags.force = true),
];

impl InstallFlags {
    /// Fold raw invocation flags with persisted configuration.
    pub fn normalize(mut self, config: &SkiffConfig) -> Self {
        for (option, apply) in FORCING_OPTIONS {
            if config.option_true(option) {
                apply(&mut self);
            }
        }

        self
    }

    /// The flag names recorded into the integrity witness: anything that
    /// changes what a correct installed tree looks like.
    pub fn integrity_flag_names(&self) -> Vec<String> {
        let mut names = Vec::new();

        if self.flat {
            names.push("flat".to_string());
        }
        if self.check_files {
            names.push("checkFiles".to_string());
        }
        if self.ignore_scripts {
            names.push("ignoreScripts".to_string());
        }
        if self.ignore_optional {
            names.push("ignoreOptional".to_string());
        }
        if self.link_duplicates {
            names.push("linkDuplicates".to_string());
        }

        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_lockfile_writes() {
        let flags = InstallFlags::default();
        assert!(flags.lockfile);
        assert!(!flags.force);
    }

    #[test]
    fn forcing_options_are_monotone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".skiffrc"),
            "ignore-scripts=true\nforce=1\nignore-optional=yes\n",
        )
        .unwrap();

        let config = SkiffConfig::load(dir.path());
        let flags = InstallFlags::default().normalize(&config);

        assert!(flags.ignore_scripts);
        assert!(flags.force);
        assert!(flags.ignore_optional);
        // untouched flags keep their raw value
        assert!(!flags.ignore_platform);
        assert!(!flags.ignore_engines);
    }

    #[test]
    fn raw_flags_survive_when_config_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());

        let flags = InstallFlags {
            ignore_scripts: true,
            ..Default::default()
        }
        .normalize(&config);

        assert!(flags.ignore_scripts);
    }

    #[test]
    fn integrity_names_track_truthy_flags() {
        let flags = InstallFlags {
            flat: true,
            ignore_scripts: true,
            ..Default::default()
        };

        assert_eq!(
            flags.integrity_flag_names(),
            vec!["flat".to_string(), "ignoreScripts".to_string()]
        );
    }
}
