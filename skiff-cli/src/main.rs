use anyhow::Result;
use clap::Parser;
use skiff_core::install::{
    self, Disambiguator, NonInteractiveDisambiguator, SelectDisambiguator,
};
use skiff_core::{InstallFlags, SkiffConfig, console};
use std::time::Instant;
use std::{env, process};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, InstallOptions};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        console::error(&format!("{error}"));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let args = Cli::parse();
    let cwd = env::current_dir()?;

    match args.command {
        Command::Install {
            packages,
            options,
            deprecated,
        } => {
            console::heading("install", env!("CARGO_PKG_VERSION"));

            for flag in deprecated.used() {
                console::warn(&format!("{} is deprecated; see `skiff add --help`", flag));
            }

            let mut config = load_config(&cwd, &options);
            config.production = config.production || options.production;

            let mut flags = build_flags(&options);
            flags.save_dev |= deprecated.save_dev;
            flags.save_peer |= deprecated.save_peer;
            flags.save_optional |= deprecated.save_optional;
            flags.save_exact |= deprecated.save_exact;
            flags.save_tilde |= deprecated.save_tilde;

            // install takes no positional arguments; rewrite to `add`
            if !packages.is_empty() {
                return Err(install::positional_args_error(&packages, &flags).into());
            }

            let disambiguator = pick_disambiguator(&options);
            let started = Instant::now();

            let result = install::install(&config, flags, disambiguator.as_ref()).await?;

            if !result.bailed_out {
                console::summary(result.package_count, started.elapsed().as_secs_f32());
            }
        }

        Command::Add {
            packages,
            dev,
            peer,
            optional,
            exact,
            tilde,
            options,
        } => {
            console::heading("add", env!("CARGO_PKG_VERSION"));

            let mut config = load_config(&cwd, &options);
            config.production = config.production || options.production;

            let mut flags = build_flags(&options);
            flags.save_dev = dev;
            flags.save_peer = peer;
            flags.save_optional = optional;
            flags.save_exact = exact;
            flags.save_tilde = tilde;

            let disambiguator = pick_disambiguator(&options);
            let started = Instant::now();

            let result = install::add(&config, flags, &packages, disambiguator.as_ref()).await?;

            if !result.bailed_out {
                console::summary(result.package_count, started.elapsed().as_secs_f32());
            }
        }
    }

    Ok(())
}

fn load_config(cwd: &std::path::Path, _options: &InstallOptions) -> SkiffConfig {
    let config = SkiffConfig::load(cwd);

    if let Some(log_file) = &config.log_file {
        let _ = console::init_logging(log_file);
    }

    config
}

fn build_flags(options: &InstallOptions) -> InstallFlags {
    InstallFlags {
        har: options.har,
        ignore_platform: options.ignore_platform,
        ignore_engines: options.ignore_engines,
        ignore_scripts: options.ignore_scripts,
        ignore_optional: options.ignore_optional,
        force: options.force,
        flat: options.flat,
        link_duplicates: options.link_duplicates,
        check_files: options.check_files,
        lockfile: !options.no_lockfile,
        pure_lockfile: options.pure_lockfile,
        frozen_lockfile: options.frozen_lockfile,
        skip_integrity_check: options.skip_integrity_check,
        ..Default::default()
    }
}

fn pick_disambiguator(options: &InstallOptions) -> Box<dyn Disambiguator> {
    if options.non_interactive || !console::stdout_is_tty() {
        Box::new(NonInteractiveDisambiguator)
    } else {
        Box::new(SelectDisambiguator)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
