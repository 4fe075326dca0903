//! Archive download collaborator.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

/// Invoked with the downloaded file once it is complete on disk.
pub type DownloadCallback = Box<dyn FnOnce(PathBuf) + Send + 'static>;

/// Fetches archives for the registry.
pub trait Downloader: Send + Sync {
    /// Start fetching `url` into `destination`.
    ///
    /// Returns `Ok(false)` without invoking `on_success` when `destination`
    /// already exists or is already being downloaded. `Ok(true)` means the
    /// download proceeds, possibly on another thread, and `on_success` runs
    /// only if it completes. An error means it could not be started.
    fn download(
        &self,
        url: &str,
        destination: &Path,
        on_success: DownloadCallback,
    ) -> io::Result<bool>;
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: format!("hotswap/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Downloads over HTTP(S) on a background thread.
///
/// Clones share the set of destinations currently being downloaded, so a
/// destination is fetched at most once at a time.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    config: Arc<DownloadConfig>,
    in_flight: Arc<DashMap<PathBuf, ()>>,
}

/// Marks a destination as in flight until dropped.
struct Claim {
    in_flight: Arc<DashMap<PathBuf, ()>>,
    destination: PathBuf,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.destination);
    }
}

impl HttpDownloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config: Arc::new(config),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Whether `destination` is currently being downloaded.
    pub fn is_downloading(&self, destination: &Path) -> bool {
        self.in_flight.contains_key(destination)
    }

    fn claim(&self, destination: &Path) -> Option<Claim> {
        match self.in_flight.entry(destination.to_path_buf()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Claim {
                    in_flight: self.in_flight.clone(),
                    destination: destination.to_path_buf(),
                })
            }
        }
    }

    fn fetch(config: &DownloadConfig, url: &str, destination: &Path) -> Result<(), String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        let mut response = client
            .get(url)
            .send()
            .map_err(|e| format!("Failed to fetch {}: {}", url, e))?;
        if !response.status().is_success() {
            return Err(format!("{} returned status {}", url, response.status()));
        }

        // Write next to the destination so a partial file never looks complete.
        let partial = partial_path(destination);
        let written = fs::File::create(&partial)
            .and_then(|mut file| io::copy(&mut response, &mut file))
            .and_then(|_| fs::rename(&partial, destination));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(format!("Failed to write {}: {}", destination.display(), e));
        }
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        destination: &Path,
        on_success: DownloadCallback,
    ) -> io::Result<bool> {
        let Some(claim) = self.claim(destination) else {
            tracing::debug!("{} is already being downloaded", destination.display());
            return Ok(false);
        };
        if destination.exists() {
            return Ok(false);
        }

        let config = self.config.clone();
        let url = url.to_string();
        let destination = destination.to_path_buf();
        let spawned = std::thread::Builder::new()
            .name("hotswap-download".into())
            .spawn(move || {
                match Self::fetch(&config, &url, &destination) {
                    Ok(()) => {
                        tracing::info!("Downloaded {} to {}", url, destination.display());
                        on_success(destination);
                    }
                    Err(e) => tracing::error!("Download failed: {}", e),
                }
                drop(claim);
            });

        spawned.map(|_| true)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}
