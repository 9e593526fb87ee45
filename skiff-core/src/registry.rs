use crate::config::SkiffConfig;
use crate::console;
use crate::{Result, SkiffError};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A package source. Each registry owns a root manifest filename and an
/// install folder; the order of `ALL` is the enumeration order used when
/// looking for a root manifest in the working directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Npm,
    Jsr,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 2] = [RegistryKind::Npm, RegistryKind::Jsr];

    pub fn name(&self) -> &'static str {
        match self {
            RegistryKind::Npm => "npm",
            RegistryKind::Jsr => "jsr",
        }
    }

    pub fn manifest_filename(&self) -> &'static str {
        match self {
            RegistryKind::Npm => "package.json",
            RegistryKind::Jsr => "jsr.json",
        }
    }

    pub fn folder(&self) -> &'static str {
        match self {
            RegistryKind::Npm => "node_modules",
            RegistryKind::Jsr => "jsr_modules",
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistryPackage {
    #[serde(default)]
    pub versions: BTreeMap<String, RegistryVersion>,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistryVersion {
    pub version: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "optionalDependencies")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub engines: BTreeMap<String, String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub cpu: Vec<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    pub dist: RegistryDist,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegistryDist {
    pub tarball: String,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// One completed HTTP exchange, kept for the request-log archive.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub started: OffsetDateTime,
    pub duration_ms: u128,
}

/// Shared HTTP client that remembers every request it made. The install
/// pipeline's HAR step serializes the log; `clear` drops it once the
/// install is over.
#[derive(Debug)]
pub struct RequestManager {
    client: Client,
    log: Mutex<Vec<RequestRecord>>,
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManager {
    pub fn new() -> Self {
        RequestManager {
            client: Client::new(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        config: &SkiffConfig,
        url: &str,
    ) -> Result<T> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = config.auth_token_for_url(url) {
            request = request.header("authorization", format!("Bearer {}", token));
        }

        let started = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let response = request.send().await.map_err(|source| SkiffError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        self.record("GET", url, status, started, clock.elapsed().as_millis());

        let response = response
            .error_for_status()
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })?;

        response.json().await.map_err(|source| SkiffError::Http {
            url: url.to_string(),
            source,
        })
    }

    pub async fn get_bytes(&self, config: &SkiffConfig, url: &str) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);

        if let Some(token) = config.auth_token_for_url(url) {
            request = request.header("authorization", format!("Bearer {}", token));
        }

        let started = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let response = request.send().await.map_err(|source| SkiffError::Http {
            url: url.to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        self.record("GET", url, status, started, clock.elapsed().as_millis());

        let bytes = response
            .error_for_status()
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })?
            .bytes()
            .await
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })?;

        Ok(bytes.to_vec())
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let started = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status().as_u16();
        self.record("GET", url, status, started, clock.elapsed().as_millis());

        response
            .error_for_status()
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })?
            .text()
            .await
            .map_err(|source| SkiffError::Http {
                url: url.to_string(),
                source,
            })
    }

    fn record(
        &self,
        method: &str,
        url: &str,
        status: u16,
        started: OffsetDateTime,
        duration_ms: u128,
    ) {
        if let Ok(mut log) = self.log.lock() {
            log.push(RequestRecord {
                method: method.to_string(),
                url: url.to_string(),
                status,
                started,
                duration_ms,
            });
        }
    }

    /// Write the request log as a HAR 1.2 document.
    pub fn save_har(&self, path: &Path) -> Result<()> {
        let entries: Vec<serde_json::Value> = {
            let log = self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            log.iter()
                .map(|record| {
                    let started = record
                        .started
                        .format(&Rfc3339)
                        .unwrap_or_else(|_| String::new());
                    serde_json::json!({
                        "startedDateTime": started,
                        "time": record.duration_ms,
                        "request": {
                            "method": record.method,
                            "url": record.url,
                            "httpVersion": "HTTP/1.1",
                            "headers": [],
                            "queryString": [],
                            "headersSize": -1,
                            "bodySize": -1,
                        },
                        "response": {
                            "status": record.status,
                            "statusText": "",
                            "httpVersion": "HTTP/1.1",
                            "headers": [],
                            "content": {"size": -1, "mimeType": ""},
                            "redirectURL": "",
                            "headersSize": -1,
                            "bodySize": -1,
                        },
                        "cache": {},
                        "timings": {"send": 0, "wait": record.duration_ms, "receive": 0},
                    })
                })
                .collect()
        };

        let document = serde_json::json!({
            "log": {
                "version": "1.2",
                "creator": {
                    "name": "skiff",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "entries": entries,
            }
        });

        let data =
            serde_json::to_string_pretty(&document).map_err(|err| SkiffError::SerializeJson {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        fs::write(path, data).map_err(|source| SkiffError::WriteFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn clear(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    pub fn request_count(&self) -> usize {
        self.log
            .lock()
            .map(|log| log.len())
            .unwrap_or(0)
    }
}

fn sanitize_package_name(name: &str) -> String {
    name.replace('/', "__")
}

fn metadata_cache_path(config: &SkiffConfig, name: &str) -> PathBuf {
    config
        .metadata_dir()
        .join(sanitize_package_name(name))
        .join("index.json")
}

fn load_cached_metadata(config: &SkiffConfig, name: &str) -> Option<RegistryPackage> {
    let cache_path = metadata_cache_path(config, name);

    let data = fs::read_to_string(&cache_path).ok()?;
    let package = serde_json::from_str::<RegistryPackage>(&data).ok()?;

    if console::is_logging_enabled() {
        console::verbose(&format!(
            "using cached metadata for {} from {}",
            name,
            cache_path.display()
        ));
    }

    Some(package)
}

fn save_cached_metadata(config: &SkiffConfig, name: &str, package: &RegistryPackage) {
    let cache_path = metadata_cache_path(config, name);

    if let Some(parent) = cache_path.parent()
        && fs::create_dir_all(parent).is_err()
    {
        return;
    }

    if let Ok(data) = serde_json::to_string(package) {
        let _ = fs::write(&cache_path, data);
    }
}

/// Fetch version metadata for `name`, preferring the on-disk cache unless
/// `force` asks for a refetch.
pub async fn fetch_package(
    config: &SkiffConfig,
    requests: &RequestManager,
    kind: RegistryKind,
    name: &str,
    force: bool,
) -> Result<RegistryPackage> {
    if !force && let Some(cached) = load_cached_metadata(config, name) {
        return Ok(cached);
    }

    let url = metadata_url(config, kind, name);

    if console::is_logging_enabled() {
        console::verbose(&format!("fetching metadata for {} from {}", name, url));
    }

    let package: RegistryPackage = requests.get_json(config, &url).await?;
    save_cached_metadata(config, name, &package);

    Ok(package)
}

pub fn metadata_url(config: &SkiffConfig, kind: RegistryKind, name: &str) -> String {
    let base = match kind {
        RegistryKind::Npm => config.registry_url.as_str(),
        // jsr serves npm-shaped metadata from its compatibility endpoint
        RegistryKind::Jsr => config.jsr_registry_url.as_str(),
    };

    let encoded = name.replace('/', "%2f");
    format!("{}/{}", base.trim_end_matches('/'), encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_enumeration_order_is_stable() {
        assert_eq!(RegistryKind::ALL[0], RegistryKind::Npm);
        assert_eq!(RegistryKind::ALL[1], RegistryKind::Jsr);
    }

    #[test]
    fn folders_and_manifests_per_registry() {
        assert_eq!(RegistryKind::Npm.manifest_filename(), "package.json");
        assert_eq!(RegistryKind::Npm.folder(), "node_modules");
        assert_eq!(RegistryKind::Jsr.manifest_filename(), "jsr.json");
        assert_eq!(RegistryKind::Jsr.folder(), "jsr_modules");
    }

    #[test]
    fn har_document_shape() {
        let manager = RequestManager::new();
        manager.record(
            "GET",
            "https://registry.example/pkg",
            200,
            OffsetDateTime::UNIX_EPOCH,
            42,
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.har");
        manager.save_har(&path).unwrap();

        let data = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["log"]["version"], "1.2");
        assert_eq!(value["log"]["entries"][0]["response"]["status"], 200);
        assert_eq!(
            value["log"]["entries"][0]["request"]["url"],
            "https://registry.example/pkg"
        );
    }
}
