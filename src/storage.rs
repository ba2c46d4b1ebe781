//! # Download Backend Module
//!
//! This module provides the interface used to fetch remote granules into the
//! local cache, and the HTTP implementation that talks to the GES DISC OPeNDAP
//! server.
//!
//! ## Features
//!
//! - **Pluggable backend**: the batch driver only sees the [`Downloader`] trait,
//!   so tests substitute a recording mock
//! - **Earthdata Login**: redirects are followed by hand. Basic auth is only
//!   sent to the origin and to the login service over https. Session cookies
//!   carry the login everywhere else
//! - **Bounded parallelism**: [`HttpDownloader::fetch_all`] runs at most
//!   `connections` transfers at once
//! - **Atomic writes**: bodies land in a temporary file that is renamed into
//!   place once complete
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use merra2station::config::Credentials;
//! use merra2station::storage::{Downloader, HttpDownloader};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::from_env_file(".env")?;
//!     let downloader = HttpDownloader::new(credentials, 5, Duration::from_secs(300))?;
//!     let path = downloader
//!         .fetch("https://example.org/granule.nc4.nc4?T2M[0:1:23][0:1:0][0:1:0]", Path::new("downloads"))
//!         .await?;
//!     println!("saved to {}", path.display());
//!     Ok(())
//! }
//! ```

use crate::config::Credentials;
use futures::StreamExt;
use log::debug;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode, Url};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound on redirect hops during the login handshake.
pub const MAX_REDIRECTS: usize = 10;

/// Host of the NASA Earthdata Login service.
pub const EARTHDATA_LOGIN_HOST: &str = "urs.earthdata.nasa.gov";

/// Errors that can occur while downloading a granule
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Network request failed for {0}")]
    Request(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("Redirect from {0} has no usable Location header")]
    InvalidRedirect(String),

    #[error("Too many redirects while fetching {0}")]
    TooManyRedirects(String),

    #[error("Cannot derive a file name from URL: {0}")]
    InvalidUrl(String),

    #[error("Background write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for download operations
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Capability to fetch one URL into a destination directory.
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url` into `destination`, returning the path of the written file.
    ///
    /// The file name is derived from the URL with [`local_file_name`].
    async fn fetch(&self, url: &str, destination: &Path) -> DownloadResult<PathBuf>;
}

/// Derives the local file name for an OPeNDAP URL.
///
/// The query string is dropped and the response-format suffix the server
/// expects (`<granule>.nc4.nc4`) is removed, leaving the granule name.
pub fn local_file_name(url: &str) -> DownloadResult<String> {
    let path = url.split('?').next().unwrap_or(url);
    let segment = path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;

    let name = match segment.strip_suffix(".nc4") {
        Some(stem) if stem.ends_with(".nc4") => stem,
        _ => segment,
    };
    Ok(name.to_string())
}

/// Whether a request to `target` may carry the Earthdata credentials.
///
/// Only the origin of the first request (same scheme, host and port) and the
/// login service over https qualify.
pub fn sends_credentials(origin: &Url, target: &Url) -> bool {
    let same_origin = origin.scheme() == target.scheme()
        && origin.host_str() == target.host_str()
        && origin.port_or_known_default() == target.port_or_known_default();
    let login_service =
        target.scheme() == "https" && target.host_str() == Some(EARTHDATA_LOGIN_HOST);
    same_origin || login_service
}

/// HTTP downloader authenticating against NASA Earthdata Login.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    credentials: Credentials,
    connections: usize,
}

impl HttpDownloader {
    pub fn new(
        credentials: Credentials,
        connections: usize,
        timeout: Duration,
    ) -> DownloadResult<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(DownloadError::Client)?;

        Ok(HttpDownloader {
            client,
            credentials,
            connections: connections.max(1),
        })
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Issues a GET, following redirects through the login service.
    async fn get_authenticated(&self, url: &str) -> DownloadResult<Response> {
        let origin = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        let mut current = origin.clone();

        for _ in 0..MAX_REDIRECTS {
            let mut request = self.client.get(current.clone());
            if sends_credentials(&origin, &current) {
                request = request.basic_auth(&self.credentials.username, Some(&self.credentials.key));
            } else {
                debug!("Withholding credentials from {}", current);
            }
            let response = request
                .send()
                .await
                .map_err(|e| DownloadError::Request(current.to_string(), e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| DownloadError::InvalidRedirect(current.to_string()))?;
                let next = current
                    .join(location)
                    .map_err(|_| DownloadError::InvalidRedirect(current.to_string()))?;
                debug!("Following redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(DownloadError::HttpStatus {
                    url: url.to_string(),
                    status,
                });
            }
            return Ok(response);
        }

        Err(DownloadError::TooManyRedirects(url.to_string()))
    }

    /// Downloads several URLs into `destination` with at most
    /// `connections` transfers in flight. Results come back in completion order.
    pub async fn fetch_all(
        &self,
        urls: &[String],
        destination: &Path,
    ) -> Vec<DownloadResult<PathBuf>> {
        futures::stream::iter(urls)
            .map(|url| self.fetch(url, destination))
            .buffer_unordered(self.connections)
            .collect()
            .await
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, destination: &Path) -> DownloadResult<PathBuf> {
        let name = local_file_name(url)?;
        tokio::fs::create_dir_all(destination).await?;

        let response = self.get_authenticated(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Request(url.to_string(), e))?;

        let target = destination.join(&name);
        let size = body.len();
        let dir = destination.to_path_buf();
        let written = target.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp_file = tempfile::NamedTempFile::new_in(&dir)?;
            temp_file.write_all(&body)?;
            temp_file.persist(&written).map_err(|e| e.error)?;
            Ok(())
        })
        .await??;

        debug!("Wrote {} bytes to {}", size, target.display());
        Ok(target)
    }
}


#[cfg(test)]
mod http_tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 server answering every request with `handler(path)`.
    struct TestServer {
        addr: SocketAddr,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        async fn spawn<F>(handler: F) -> Self
        where
            F: Fn(&str) -> String + Send + Sync + 'static,
        {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(Mutex::new(Vec::new()));
            let recorded = requests.clone();
            let handler = Arc::new(handler);

            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    let handler = handler.clone();
                    let recorded = recorded.clone();
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => head.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&head).to_string();
                        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                        recorded.lock().unwrap().push(head);

                        let response = handler(&path);
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            TestServer { addr, requests }
        }

        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn has_basic_auth(request: &str) -> bool {
        request.to_ascii_lowercase().contains("authorization: basic")
    }

    fn redirect(location: &str) -> String {
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            location
        )
    }

    fn respond(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    fn downloader() -> HttpDownloader {
        HttpDownloader::new(Credentials::new("user", "secret"), 2, Duration::from_secs(10)).unwrap()
    }

    const GRANULE: &str = "/opendap/2015/06/MERRA2_400.x.20150601.nc4.nc4?T2M";

    #[test]
    fn test_credentials_scope() {
        let origin = Url::parse("https://goldsmr4.gesdisc.eosdis.nasa.gov/opendap/a.nc4").unwrap();
        let check = |target: &str| sends_credentials(&origin, &Url::parse(target).unwrap());

        assert!(check("https://goldsmr4.gesdisc.eosdis.nasa.gov/data/b.nc4"));
        assert!(check("https://urs.earthdata.nasa.gov/oauth/authorize?client_id=x"));
        assert!(!check("http://urs.earthdata.nasa.gov/oauth/authorize"));
        assert!(!check("http://goldsmr4.gesdisc.eosdis.nasa.gov/opendap/a.nc4"));
        assert!(!check("https://goldsmr4.gesdisc.eosdis.nasa.gov:8443/opendap/a.nc4"));
        assert!(!check("https://elsewhere.example.com/collect"));
    }

    #[tokio::test]
    async fn test_fetch_follows_same_origin_redirect() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::spawn(|path| {
            if path.starts_with("/opendap/") {
                redirect("/data/granule")
            } else {
                respond("200 OK", "netcdf-bytes")
            }
        })
        .await;
        let dir = tempfile::tempdir()?;

        let path = downloader().fetch(&server.url(GRANULE), dir.path()).await?;

        assert_eq!(path, dir.path().join("MERRA2_400.x.20150601.nc4"));
        assert_eq!(std::fs::read(&path)?, b"netcdf-bytes");
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| has_basic_auth(r)));
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_origin_redirect_withholds_credentials() -> Result<(), Box<dyn std::error::Error>> {
        let other = TestServer::spawn(|_| respond("200 OK", "payload")).await;
        let elsewhere = format!("http://localhost:{}/collect", other.addr.port());
        let origin = TestServer::spawn(move |_| redirect(&elsewhere)).await;
        let dir = tempfile::tempdir()?;

        downloader().fetch(&origin.url(GRANULE), dir.path()).await?;

        assert!(has_basic_auth(&origin.requests()[0]));
        let forwarded = other.requests();
        assert_eq!(forwarded.len(), 1);
        assert!(!has_basic_auth(&forwarded[0]));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_reported() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::spawn(|_| respond("404 Not Found", "missing")).await;
        let dir = tempfile::tempdir()?;

        let result = downloader().fetch(&server.url(GRANULE), dir.path()).await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status, .. }) if status == StatusCode::NOT_FOUND
        ));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_redirect_loop_is_cut_off() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::spawn(|_| redirect("/again")).await;
        let dir = tempfile::tempdir()?;

        let result = downloader().fetch(&server.url(GRANULE), dir.path()).await;

        assert!(matches!(result, Err(DownloadError::TooManyRedirects(_))));
        assert_eq!(server.requests().len(), MAX_REDIRECTS);
        Ok(())
    }

    #[tokio::test]
    async fn test_redirect_without_location() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::spawn(|_| {
            "HTTP/1.1 302 Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        })
        .await;
        let dir = tempfile::tempdir()?;

        let result = downloader().fetch(&server.url(GRANULE), dir.path()).await;
        assert!(matches!(result, Err(DownloadError::InvalidRedirect(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_all_downloads_every_url() -> Result<(), Box<dyn std::error::Error>> {
        let server = TestServer::spawn(|path| respond("200 OK", path)).await;
        let dir = tempfile::tempdir()?;
        let urls = vec![
            server.url("/opendap/MERRA2_400.x.20150601.nc4.nc4?T2M"),
            server.url("/opendap/MERRA2_400.x.20150602.nc4.nc4?T2M"),
            server.url("/opendap/MERRA2_400.x.20150603.nc4.nc4?T2M"),
        ];

        let results = downloader().fetch_all(&urls, dir.path()).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
        for day in ["20150601", "20150602", "20150603"] {
            let path = dir.path().join(format!("MERRA2_400.x.{}.nc4", day));
            let body = std::fs::read_to_string(path)?;
            assert!(body.contains(day));
        }
        Ok(())
    }
}
