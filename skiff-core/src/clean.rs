use crate::config::SkiffConfig;
use crate::console;
use crate::registry::RegistryKind;
use crate::{Result, SkiffError};
use std::fs;
use std::path::Path;

pub const CLEAN_FILENAME: &str = ".skiffclean";

#[derive(Debug, Default)]
pub struct CleanSummary {
    pub removed_count: usize,
    pub removed_bytes: u64,
}

/// Whether the working directory opts into post-install cleaning.
pub fn clean_marker_exists(config: &SkiffConfig) -> bool {
    config.cwd.join(CLEAN_FILENAME).is_file()
}

/// Strip entries matching the `.skiffclean` patterns out of every install
/// folder.
pub fn clean(config: &SkiffConfig) -> Result<CleanSummary> {
    let marker = config.cwd.join(CLEAN_FILENAME);

    let data = fs::read_to_string(&marker).map_err(|source| SkiffError::ReadFile {
        path: marker.clone(),
        source,
    })?;

    let patterns = parse_patterns(&data);

    let mut summary = CleanSummary::default();

    if patterns.is_empty() {
        return Ok(summary);
    }

    for registry in RegistryKind::ALL {
        let folder = config.modules_dir(registry);
        if folder.is_dir() {
            clean_directory(&folder, &patterns, &mut summary)?;
        }
    }

    console::verbose(&format!(
        "clean removed {} entries ({})",
        summary.removed_count,
        format_bytes(summary.removed_bytes)
    ));

    Ok(summary)
}

pub fn parse_patterns(data: &str) -> Vec<String> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn clean_directory(dir: &Path, patterns: &[String], summary: &mut CleanSummary) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|source| SkiffError::ReadFile {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if patterns.iter().any(|pattern| pattern_matches(pattern, &name)) {
            let bytes = entry_size(&path);

            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|source| SkiffError::WriteFile {
                    path: path.clone(),
                    source,
                })?;
            } else {
                fs::remove_file(&path).map_err(|source| SkiffError::WriteFile {
                    path: path.clone(),
                    source,
                })?;
            }

            summary.removed_count += 1;
            summary.removed_bytes += bytes;
            continue;
        }

        if path.is_dir() {
            clean_directory(&path, patterns, summary)?;
        }
    }

    Ok(())
}

/// Name matching with a single `*` wildcard at either end: `*.md`,
/// `test*`, or an exact name.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        pattern == name
    }
}

fn entry_size(path: &Path) -> u64 {
    if path.is_file() {
        return path.metadata().map(|metadata| metadata.len()).unwrap_or(0);
    }

    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };

    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry_size(&entry.path()))
        .sum()
}

pub fn format_bytes(bytes: u64) -> String {
    const SCALES: [(u64, &str); 3] = [(1 << 30, "GB"), (1 << 20, "MB"), (1 << 10, "KB")];

    for (scale, unit) in SCALES {
        if bytes >= scale {
            return format!("{:.2} {}", bytes as f64 / scale as f64, unit);
        }
    }

    format!("{} bytes", bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_marker_skipping_comments() {
        let data = "# docs\n*.md\n\n__tests__\n";
        assert_eq!(parse_patterns(data), vec!["*.md", "__tests__"]);
    }

    #[test]
    fn wildcard_matching() {
        assert!(pattern_matches("*.md", "README.md"));
        assert!(pattern_matches("test*", "tests"));
        assert!(pattern_matches("LICENSE", "LICENSE"));
        assert!(!pattern_matches("*.md", "README.txt"));
    }

    #[test]
    fn clean_removes_matches_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let config = SkiffConfig::load(dir.path());

        let pkg = dir.path().join("node_modules").join("a");
        fs::create_dir_all(pkg.join("__tests__")).unwrap();
        fs::write(pkg.join("README.md"), b"docs").unwrap();
        fs::write(pkg.join("index.js"), b"code").unwrap();
        fs::write(pkg.join("__tests__").join("a.test.js"), b"test").unwrap();

        fs::write(dir.path().join(CLEAN_FILENAME), "*.md\n__tests__\n").unwrap();

        let summary = clean(&config).unwrap();
        assert_eq!(summary.removed_count, 2);
        assert!(pkg.join("index.js").is_file());
        assert!(!pkg.join("README.md").exists());
        assert!(!pkg.join("__tests__").exists());
    }
}
