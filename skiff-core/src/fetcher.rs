use crate::config::SkiffConfig;
use crate::console;
use crate::registry::RequestManager;
use crate::resolver::{PackageId, PackageResolver, ResolvedManifest};
use crate::{Result, SkiffError};
use flate2::read::GzDecoder;
use futures::future::join_all;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tar::Archive;
use tokio::sync::Semaphore;

const COMPLETE_MARKER: &str = ".skiff-complete";

/// Materializes every resolved package into the package cache, reading
/// through the offline mirror when one is configured.
pub struct PackageFetcher<'a> {
    config: &'a SkiffConfig,
    requests: &'a RequestManager,
}

impl<'a> PackageFetcher<'a> {
    pub fn new(config: &'a SkiffConfig, requests: &'a RequestManager) -> Self {
        PackageFetcher { config, requests }
    }

    pub async fn init(&self, resolver: &PackageResolver<'_>) -> Result<usize> {
        let manifests: Vec<&ResolvedManifest> = resolver
            .manifests()
            .filter(|manifest| !resolver.reference(manifest.ref_index).ignore)
            .collect();

        let total = manifests.len();
        let progress = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.network_concurrency));

        let mut tasks = Vec::with_capacity(total);

        for manifest in manifests {
            let progress = progress.clone();
            let semaphore = semaphore.clone();

            tasks.push(async move {
                let _permit = semaphore.acquire().await.unwrap();

                let current = progress.fetch_add(1, Ordering::Relaxed) + 1;
                console::progress(&manifest.id.name, current, total);

                self.ensure_package(manifest).await
            });
        }

        let results = join_all(tasks).await;
        console::clear_line();

        for result in results {
            result?;
        }

        Ok(total)
    }

    async fn ensure_package(&self, manifest: &ResolvedManifest) -> Result<PathBuf> {
        let pkg_dir = cache_dir(self.config, &manifest.id);
        let marker = pkg_dir.join(COMPLETE_MARKER);

        if marker.is_file() {
            console::verbose(&format!(
                "cache hit: {}@{}",
                manifest.id.name, manifest.id.version
            ));
            return Ok(package_root_dir(&pkg_dir));
        }

        fs::create_dir_all(&pkg_dir).map_err(|source| SkiffError::WriteFile {
            path: pkg_dir.clone(),
            source,
        })?;

        let url = strip_hash(&manifest.tarball);
        let basename = tarball_basename(&manifest.tarball);

        let bytes = match self.read_from_mirror(&basename)? {
            Some(bytes) => bytes,
            None => {
                console::verbose(&format!(
                    "cache miss: {}@{}; downloading {}",
                    manifest.id.name, manifest.id.version, url
                ));

                let bytes = self.requests.get_bytes(self.config, url).await?;
                self.write_to_mirror(&basename, &bytes)?;
                bytes
            }
        };

        unpack_tarball(&pkg_dir, bytes)?;

        fs::write(&marker, []).map_err(|source| SkiffError::WriteFile {
            path: marker.clone(),
            source,
        })?;

        Ok(package_root_dir(&pkg_dir))
    }

    fn read_from_mirror(&self, basename: &str) -> Result<Option<Vec<u8>>> {
        let Some(mirror) = self.config.offline_mirror_path() else {
            return Ok(None);
        };

        let path = mirror.join(basename);
        if !path.is_file() {
            return Ok(None);
        }

        console::verbose(&format!("mirror hit: {}", basename));

        let bytes = fs::read(&path).map_err(|source| SkiffError::ReadFile { path, source })?;
        Ok(Some(bytes))
    }

    fn write_to_mirror(&self, basename: &str, bytes: &[u8]) -> Result<()> {
        let Some(mirror) = self.config.offline_mirror_path() else {
            return Ok(());
        };

        fs::create_dir_all(&mirror).map_err(|source| SkiffError::WriteFile {
            path: mirror.clone(),
            source,
        })?;

        let path = mirror.join(basename);
        fs::write(&path, bytes).map_err(|source| SkiffError::WriteFile { path, source })
    }
}

/// Cache directory for one package version.
pub fn cache_dir(config: &SkiffConfig, id: &PackageId) -> PathBuf {
    config
        .packages_dir()
        .join(id.name.replace('/', "_"))
        .join(&id.version)
}

/// Whether the cache already holds a completed unpack of `id`.
pub fn is_cached(config: &SkiffConfig, id: &PackageId) -> bool {
    cache_dir(config, id).join(COMPLETE_MARKER).is_file()
}

/// npm tarballs unpack under a `package/` prefix; fall back to the
/// directory itself when the archive had none.
pub fn package_root_dir(pkg_dir: &PathBuf) -> PathBuf {
    let candidate = pkg_dir.join("package");
    if candidate.is_dir() {
        candidate
    } else {
        pkg_dir.clone()
    }
}

/// `https://host/a/-/a-1.0.0.tgz#abc123` → `https://host/a/-/a-1.0.0.tgz`
pub fn strip_hash(resolved: &str) -> &str {
    match resolved.find('#') {
        Some(index) => &resolved[..index],
        None => resolved,
    }
}

/// The mirror filename for a resolved tarball URL.
pub fn tarball_basename(resolved: &str) -> String {
    let url = strip_hash(resolved);
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn unpack_tarball(pkg_dir: &PathBuf, data: Vec<u8>) -> Result<()> {
    let cursor = Cursor::new(data);
    let decoder = GzDecoder::new(cursor);
    let mut archive = Archive::new(decoder);

    archive.unpack(pkg_dir).map_err(|source| SkiffError::Archive {
        path: pkg_dir.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_hash_suffix() {
        assert_eq!(
            strip_hash("https://host/a/-/a-1.0.0.tgz#deadbeef"),
            "https://host/a/-/a-1.0.0.tgz"
        );
        assert_eq!(strip_hash("https://host/a.tgz"), "https://host/a.tgz");
    }

    #[test]
    fn basename_of_resolved_url() {
        assert_eq!(
            tarball_basename("https://host/a/-/a-1.0.0.tgz#deadbeef"),
            "a-1.0.0.tgz"
        );
        assert_eq!(tarball_basename("x-1.tgz"), "x-1.tgz");
    }
}
