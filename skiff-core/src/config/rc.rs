use directories::BaseDirs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to nothing; a `$` that starts no variable is
/// kept literally.
pub fn expand_env_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        rest = &rest[dollar + 1..];

        if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(close) => {
                    out.push_str(&env::var(&braced[..close]).unwrap_or_default());
                    rest = &braced[close + 1..];
                }
                None => {
                    // unterminated brace, keep the text as written
                    out.push_str("${");
                    rest = braced;
                }
            }
            continue;
        }

        let name_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());

        if name_len == 0 {
            out.push('$');
        } else {
            out.push_str(&env::var(&rest[..name_len]).unwrap_or_default());
            rest = &rest[name_len..];
        }
    }

    out.push_str(rest);
    out
}

pub fn normalize_registry_url(value: &str) -> String {
    let mut url = if value.starts_with("//") {
        format!("https:{}", value)
    } else {
        value.to_string()
    };

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Options collected from rc files and the environment, lowest precedence
/// first: home rc, then every rc on the path from the filesystem root down
/// to cwd, then `SKIFF_*` environment variables.
pub fn read_options(cwd: &Path) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();

    if let Some(base) = BaseDirs::new() {
        apply_rc_file(&base.home_dir().join(".skiffrc"), &mut options);
    }

    let mut chain = Vec::new();
    let mut directory = Some(cwd.to_path_buf());
    while let Some(dir) = directory {
        chain.push(dir.clone());
        directory = dir.parent().map(Path::to_path_buf);
    }

    for dir in chain.iter().rev() {
        apply_rc_file(&dir.join(".skiffrc"), &mut options);
    }

    apply_env_options(&mut options);

    options
}

fn apply_rc_file(path: &Path, options: &mut BTreeMap<String, String>) {
    if !path.is_file() {
        return;
    }

    let Ok(data) = fs::read_to_string(path) else {
        return;
    };

    for line in data.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let Some(equals_index) = trimmed.find('=') else {
            continue;
        };

        let (key, value) = trimmed.split_at(equals_index);
        let key = key.trim().to_string();
        let value = expand_env_vars(value[1..].trim());

        if key.is_empty() {
            continue;
        }

        options.insert(key, value);
    }
}

/// `SKIFF_OFFLINE_MIRROR=...` is the option `offline-mirror`, and so on.
fn apply_env_options(options: &mut BTreeMap<String, String>) {
    for (key, value) in env::vars() {
        let Some(rest) = key.strip_prefix("SKIFF_") else {
            continue;
        };

        if rest.is_empty() || value.is_empty() {
            continue;
        }

        let option = rest.to_ascii_lowercase().replace('_', "-");
        options.insert(option, value);
    }
}

pub fn option_is_truthy(value: &str) -> bool {
    let trimmed = value.trim().to_ascii_lowercase();
    !matches!(trimmed.as_str(), "" | "0" | "false" | "no" | "n" | "off")
}

pub fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|base| base.home_dir().to_path_buf())
}
