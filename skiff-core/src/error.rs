use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkiffError {
    #[error("Failed to read file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("Failed to write file {path:?}: {source}")]
    WriteFile { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse JSON in {path:?}: {source}")]
    ParseJson { path: PathBuf, source: serde_json::Error },

    #[error("Failed to serialize JSON for {path:?}: {reason}")]
    SerializeJson { path: PathBuf, reason: String },

    #[error("Failed to parse YAML in {path:?}: {source}")]
    ParseYaml { path: PathBuf, source: serde_yaml::Error },

    #[error("Failed to serialize lockfile for {path:?}: {source}")]
    LockfileWrite { path: PathBuf, source: serde_yaml::Error },

    #[error("Root manifest not found at {path:?}")]
    ManifestMissing { path: PathBuf },

    #[error("Invalid manifest in {path:?}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("Request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Failed to unpack archive into {path:?}: {source}")]
    Archive { path: PathBuf, source: std::io::Error },

    #[error("Could not resolve {name}@{range}: {reason}")]
    ResolutionFailed {
        name: String,
        range: String,
        reason: String,
    },

    #[error("Invalid semver {value}: {reason}")]
    Semver { value: String, reason: String },

    #[error("Cannot install {pattern}: {reason}")]
    UnsupportedPattern { pattern: String, reason: String },

    #[error("Your lockfile needs to be updated, but updating was disabled: {reason}")]
    FrozenLockfile { reason: String },

    #[error("skiff install takes no arguments. Did you mean `{suggestion}`?")]
    InstallPositionalArgs { suggestion: String },

    #[error("No resolved package for pattern {pattern}")]
    PatternMissing { pattern: String },

    #[error("Package {name}@{version} is missing from the cache")]
    CacheMissing { name: String, version: String },

    #[error("Could not start script {name}: {reason}")]
    ScriptRun { name: String, reason: String },

    #[error("Script {name} exited with code {code}")]
    ScriptFailed { name: String, code: i32 },

    #[error("Multiple versions of {name} and no way to pick one: {reason}")]
    VersionConflict { name: String, reason: String },

    #[error("Package {name}@{version} is not compatible with this platform ({reason})")]
    Incompatible {
        name: String,
        version: String,
        reason: String,
    },
}
