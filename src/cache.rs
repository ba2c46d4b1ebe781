//! # Granule Cache
//!
//! Granules are cached on disk under `<root>/<field_name>/<station>/<file_name>`.
//! A file present at that path counts as cached; its content is not checked.

use crate::storage::{DownloadError, Downloader};
use log::debug;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to inspect cache path '{0}'")]
    Inspect(PathBuf, #[source] std::io::Error),

    #[error("Failed to create cache directory '{0}'")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("Download of {url} failed")]
    Download {
        url: String,
        #[source]
        source: DownloadError,
    },

    #[error("Downloader wrote '{found}' instead of '{expected}'")]
    UnexpectedPath { expected: PathBuf, found: PathBuf },
}

pub type CacheResult<T> = Result<T, CacheError>;

/// How a granule became available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The file was already present
    Hit(PathBuf),
    /// The file was fetched by the downloader
    Downloaded(PathBuf),
}

impl CacheOutcome {
    pub fn path(&self) -> &Path {
        match self {
            CacheOutcome::Hit(path) | CacheOutcome::Downloaded(path) => path,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit(_))
    }
}

/// Deterministic local location of granules for one field.
#[derive(Debug, Clone)]
pub struct GranuleCache {
    root: PathBuf,
    field_name: String,
}

impl GranuleCache {
    pub fn new(root: impl Into<PathBuf>, field_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            field_name: field_name.into(),
        }
    }

    /// Directory holding the granules of one station.
    pub fn station_dir(&self, location: &str) -> PathBuf {
        self.root.join(&self.field_name).join(location)
    }

    /// Full cache path of a granule.
    pub fn path_for(&self, location: &str, file_name: &str) -> PathBuf {
        self.station_dir(location).join(file_name)
    }

    async fn exists(path: &Path) -> CacheResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Inspect(path.to_path_buf(), e)),
        }
    }

    /// Returns the cached granule, downloading it first when absent.
    ///
    /// The downloader is called at most once, with `url` and the station
    /// directory as destination. It must write [`path_for`](Self::path_for).
    pub async fn ensure_local(
        &self,
        location: &str,
        file_name: &str,
        url: &str,
        downloader: &dyn Downloader,
    ) -> CacheResult<CacheOutcome> {
        self.ensure_local_with(location, file_name, url, downloader, || {})
            .await
    }

    /// Like [`ensure_local`](Self::ensure_local), calling `on_download` right
    /// before a download starts.
    pub async fn ensure_local_with<F>(
        &self,
        location: &str,
        file_name: &str,
        url: &str,
        downloader: &dyn Downloader,
        on_download: F,
    ) -> CacheResult<CacheOutcome>
    where
        F: FnOnce(),
    {
        let path = self.path_for(location, file_name);
        if Self::exists(&path).await? {
            debug!("Cache hit: {}", path.display());
            return Ok(CacheOutcome::Hit(path));
        }

        let dir = self.station_dir(location);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::CreateDir(dir.clone(), e))?;

        on_download();
        let written = downloader
            .fetch(url, &dir)
            .await
            .map_err(|source| CacheError::Download {
                url: url.to_string(),
                source,
            })?;
        if written != path {
            return Err(CacheError::UnexpectedPath {
                expected: path,
                found: written,
            });
        }

        Ok(CacheOutcome::Downloaded(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DownloadResult, local_file_name};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every call and writes a small placeholder file.
    #[derive(Default)]
    struct RecordingDownloader {
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    #[async_trait::async_trait]
    impl Downloader for RecordingDownloader {
        async fn fetch(&self, url: &str, destination: &Path) -> DownloadResult<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), destination.to_path_buf()));
            let target = destination.join(local_file_name(url)?);
            tokio::fs::write(&target, b"granule").await?;
            Ok(target)
        }
    }

    struct FailingDownloader;

    /// Writes under a name of its own choosing.
    struct RenamingDownloader;

    #[async_trait::async_trait]
    impl Downloader for RenamingDownloader {
        async fn fetch(&self, _url: &str, destination: &Path) -> DownloadResult<PathBuf> {
            let target = destination.join("renamed.nc4");
            tokio::fs::write(&target, b"granule").await?;
            Ok(target)
        }
    }

    #[async_trait::async_trait]
    impl Downloader for FailingDownloader {
        async fn fetch(&self, url: &str, _destination: &Path) -> DownloadResult<PathBuf> {
            Err(DownloadError::InvalidUrl(url.to_string()))
        }
    }

    const URL: &str = "https://host/opendap/2015/06/MERRA2_400.x.20150601.nc4.nc4?T2M[0:1:23]";
    const FILE: &str = "MERRA2_400.x.20150601.nc4";

    #[test]
    fn test_cache_layout() {
        let cache = GranuleCache::new("/data", "temperature_MERRA");
        assert_eq!(
            cache.path_for("Boulder", FILE),
            PathBuf::from("/data/temperature_MERRA/Boulder").join(FILE)
        );
    }

    #[tokio::test]
    async fn test_miss_downloads_exactly_once() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");
        let downloader = RecordingDownloader::default();

        let outcome = cache.ensure_local("X", FILE, URL, &downloader).await?;
        assert_eq!(outcome, CacheOutcome::Downloaded(cache.path_for("X", FILE)));
        assert!(outcome.path().exists());

        let calls = downloader.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, URL);
        assert_eq!(calls[0].1, cache.station_dir("X"));
        Ok(())
    }

    #[tokio::test]
    async fn test_hit_skips_download() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");
        std::fs::create_dir_all(cache.station_dir("X"))?;
        std::fs::write(cache.path_for("X", FILE), b"cached")?;

        let downloader = RecordingDownloader::default();
        let outcome = cache.ensure_local("X", FILE, URL, &downloader).await?;

        assert!(outcome.is_hit());
        assert!(downloader.calls.lock().unwrap().is_empty());
        assert_eq!(std::fs::read(outcome.path())?, b"cached");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");
        let downloader = RecordingDownloader::default();

        assert!(!cache.ensure_local("X", FILE, URL, &downloader).await?.is_hit());
        assert!(cache.ensure_local("X", FILE, URL, &downloader).await?.is_hit());
        assert_eq!(downloader.calls.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_failure_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");

        let result = cache.ensure_local("X", FILE, URL, &FailingDownloader).await;
        assert!(matches!(result, Err(CacheError::Download { .. })));
        assert!(!cache.path_for("X", FILE).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_unexpected_download_path_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");

        let result = cache.ensure_local("X", FILE, URL, &RenamingDownloader).await;
        match result {
            Err(CacheError::UnexpectedPath { expected, found }) => {
                assert_eq!(expected, cache.path_for("X", FILE));
                assert_eq!(found, cache.station_dir("X").join("renamed.nc4"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_download_notice_precedes_fetch_on_miss_only() -> Result<(), Box<dyn std::error::Error>> {
        let root = TempDir::new()?;
        let cache = GranuleCache::new(root.path(), "temperature_MERRA");
        let downloader = RecordingDownloader::default();
        let calls_at_notice = Mutex::new(Vec::new());

        cache
            .ensure_local_with("X", FILE, URL, &downloader, || {
                calls_at_notice.lock().unwrap().push(downloader.calls.lock().unwrap().len());
            })
            .await?;
        cache
            .ensure_local_with("X", FILE, URL, &downloader, || {
                calls_at_notice.lock().unwrap().push(downloader.calls.lock().unwrap().len());
            })
            .await?;

        assert_eq!(calls_at_notice.into_inner().unwrap(), vec![0]);
        assert_eq!(downloader.calls.lock().unwrap().len(), 1);
        Ok(())
    }
}
