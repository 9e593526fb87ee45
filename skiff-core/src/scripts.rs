use crate::config::SkiffConfig;
use crate::console;
use crate::registry::RegistryKind;
use crate::resolver::PackageResolver;
use crate::{Result, SkiffError};
use serde_json::Value;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use std::{env, fs};

const INSTALL_PHASES: [&str; 3] = ["preinstall", "install", "postinstall"];

/// Runs each installed package's build scripts, walking the freshly linked
/// folders.
pub struct ScriptRunner<'a> {
    config: &'a SkiffConfig,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(config: &'a SkiffConfig) -> Self {
        ScriptRunner { config }
    }

    pub fn init(&self, resolver: &PackageResolver<'_>, _top_patterns: &[String]) -> Result<usize> {
        let mut ran = 0;

        for registry in RegistryKind::ALL {
            if !resolver.used_registries().contains(&registry) {
                continue;
            }

            let folder = self.config.modules_dir(registry);
            if !folder.is_dir() {
                continue;
            }

            ran += walk_installed(&folder)?;
        }

        console::verbose(&format!("ran {} package scripts", ran));

        Ok(ran)
    }
}

fn walk_installed(dir: &Path) -> Result<usize> {
    let mut ran = 0;

    for entry in fs::read_dir(dir).map_err(|source| SkiffError::ReadFile {
        path: dir.to_path_buf(),
        source,
    })? {
        let entry = entry.map_err(|source| SkiffError::ReadFile {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| SkiffError::ReadFile {
            path: path.clone(),
            source,
        })?;

        if !file_type.is_dir() || entry.file_name() == OsStr::new(".bin") {
            continue;
        }

        let manifest_path = path.join("package.json");

        if manifest_path.is_file() {
            ran += run_package_phases(&path, &manifest_path)?;

            let nested = path.join("node_modules");
            if nested.is_dir() {
                ran += walk_installed(&nested)?;
            }
        } else {
            // scoped directory, one level deeper
            ran += walk_installed(&path)?;
        }
    }

    Ok(ran)
}

fn run_package_phases(pkg_root: &Path, manifest_path: &Path) -> Result<usize> {
    let data = fs::read_to_string(manifest_path).map_err(|source| SkiffError::ReadFile {
        path: manifest_path.to_path_buf(),
        source,
    })?;

    let value: Value = serde_json::from_str(&data).map_err(|source| SkiffError::ParseJson {
        path: manifest_path.to_path_buf(),
        source,
    })?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(Value::Object(scripts)) = value.get("scripts") else {
        return Ok(0);
    };

    let mut ran = 0;

    for phase in INSTALL_PHASES {
        let Some(Value::String(command)) = scripts.get(phase) else {
            continue;
        };

        if command.is_empty() {
            continue;
        }

        run_shell_script(pkg_root, &format!("{}:{}", name, phase), command)?;
        ran += 1;
    }

    Ok(ran)
}

/// Run a script through the platform shell with the package directory as
/// cwd.
pub fn run_shell_script(root: &Path, name: &str, script: &str) -> Result<()> {
    let mut command = make_shell_command(script);
    command.current_dir(root);

    if let Some(existing) = env::var_os("PATH") {
        command.env("PATH", existing);
    }

    let status = command.status().map_err(|error| SkiffError::ScriptRun {
        name: name.to_string(),
        reason: error.to_string(),
    })?;

    if !status.success() {
        let code = status.code().unwrap_or(1);
        return Err(SkiffError::ScriptFailed {
            name: name.to_string(),
            code,
        });
    }

    Ok(())
}

#[cfg(unix)]
fn make_shell_command(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[cfg(windows)]
fn make_shell_command(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(script);
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn failing_script_surfaces_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let error = run_shell_script(dir.path(), "pkg:install", "exit 3").unwrap_err();

        match error {
            SkiffError::ScriptFailed { name, code } => {
                assert_eq!(name, "pkg:install");
                assert_eq!(code, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn script_runs_in_package_directory() {
        let dir = tempfile::tempdir().unwrap();
        run_shell_script(dir.path(), "pkg:install", "touch ran.txt").unwrap();
        assert!(dir.path().join("ran.txt").is_file());
    }
}
