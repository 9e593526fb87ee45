use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "skiff", about = "fast, reproducible package installs", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Default, Clone)]
pub struct InstallOptions {
    /// Save an HTTP request log next to the install
    #[arg(long)]
    pub har: bool,

    #[arg(long)]
    pub ignore_platform: bool,

    #[arg(long)]
    pub ignore_engines: bool,

    #[arg(long)]
    pub ignore_scripts: bool,

    #[arg(long)]
    pub ignore_optional: bool,

    /// Refetch and reinstall everything
    #[arg(long)]
    pub force: bool,

    /// One version per package name across the whole tree
    #[arg(long)]
    pub flat: bool,

    /// Hard-link repeated package payloads
    #[arg(long)]
    pub link_duplicates: bool,

    /// Record and verify the installed file list
    #[arg(long)]
    pub check_files: bool,

    /// Do not read or write the lockfile
    #[arg(long)]
    pub no_lockfile: bool,

    /// Use the lockfile but never write it
    #[arg(long)]
    pub pure_lockfile: bool,

    /// Fail if the lockfile needs any change
    #[arg(long)]
    pub frozen_lockfile: bool,

    #[arg(long)]
    pub skip_integrity_check: bool,

    /// Skip devDependencies
    #[arg(long)]
    pub production: bool,

    /// Never prompt; flat-mode conflicts must be pre-resolved
    #[arg(long)]
    pub non_interactive: bool,
}

/// Deprecated spellings of the save-shape flags, still accepted so old
/// scripts keep working.
#[derive(Args, Debug, Default, Clone)]
pub struct DeprecatedSaveFlags {
    #[arg(short = 'g', long = "global", hide = true)]
    pub global: bool,

    #[arg(short = 'S', long = "save", hide = true)]
    pub save: bool,

    #[arg(short = 'D', long = "save-dev", hide = true)]
    pub save_dev: bool,

    #[arg(short = 'P', long = "save-peer", hide = true)]
    pub save_peer: bool,

    #[arg(short = 'O', long = "save-optional", hide = true)]
    pub save_optional: bool,

    #[arg(short = 'E', long = "save-exact", hide = true)]
    pub save_exact: bool,

    #[arg(short = 'T', long = "save-tilde", hide = true)]
    pub save_tilde: bool,
}

impl DeprecatedSaveFlags {
    pub fn used(&self) -> Vec<&'static str> {
        [
            (self.global, "--global"),
            (self.save, "--save"),
            (self.save_dev, "--save-dev"),
            (self.save_peer, "--save-peer"),
            (self.save_optional, "--save-optional"),
            (self.save_exact, "--save-exact"),
            (self.save_tilde, "--save-tilde"),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, flag)| flag)
        .collect()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install every dependency the root manifest declares
    Install {
        /// Not allowed; `skiff add` records new dependencies
        packages: Vec<String>,

        #[command(flatten)]
        options: InstallOptions,

        #[command(flatten)]
        deprecated: DeprecatedSaveFlags,
    },

    /// Add dependencies and record them in the root manifest
    Add {
        #[arg(required = true)]
        packages: Vec<String>,

        /// Save under devDependencies
        #[arg(long)]
        dev: bool,

        /// Save under peerDependencies
        #[arg(long)]
        peer: bool,

        /// Save under optionalDependencies
        #[arg(long)]
        optional: bool,

        /// Pin the exact resolved version
        #[arg(long)]
        exact: bool,

        /// Save with a tilde range
        #[arg(long)]
        tilde: bool,

        #[command(flatten)]
        options: InstallOptions,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_accepts_deprecated_save_flags() {
        let cli = Cli::try_parse_from(["skiff", "install", "-D", "--save-exact"]).unwrap();

        match cli.command {
            Command::Install { deprecated, .. } => {
                assert_eq!(deprecated.used(), vec!["--save-dev", "--save-exact"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn install_captures_positionals_for_rejection() {
        let cli = Cli::try_parse_from(["skiff", "install", "foo", "--frozen-lockfile"]).unwrap();

        match cli.command {
            Command::Install {
                packages, options, ..
            } => {
                assert_eq!(packages, vec!["foo".to_string()]);
                assert!(options.frozen_lockfile);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn add_requires_packages() {
        assert!(Cli::try_parse_from(["skiff", "add"]).is_err());
    }
}
