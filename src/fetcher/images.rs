use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;

use crate::app::Result;
use crate::domain::{ImageRef, SavedItem};
use crate::fetcher::{build_client, FetcherConfig, ImageCache};
use crate::sync::SyncError;

/// Permanent image cache on the local filesystem.
///
/// Layout: `<root>/<sha256(parent key)>/<sha256(image url)>`. Each saved item
/// owns one directory so purging an item is a single directory removal.
pub struct FsImageCache {
    client: Client,
    root: PathBuf,
    in_flight: Mutex<HashSet<PathBuf>>,
}

/// Releases an in-flight claim on every exit path
struct Claim<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
    }
}

impl FsImageCache {
    pub fn new(root: impl Into<PathBuf>, config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            root: root.into(),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn group_dir(&self, parent: &str) -> PathBuf {
        self.root.join(SavedItem::digest(parent))
    }

    pub fn image_path(&self, image: &ImageRef) -> PathBuf {
        self.group_dir(&image.parent).join(image.file_name())
    }

    /// Cached bytes for an image, if present
    pub async fn read(&self, image: &ImageRef) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.image_path(image)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn claim(&self, path: &Path) -> Option<Claim<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(path.to_path_buf()) {
            return None;
        }
        Some(Claim {
            set: &self.in_flight,
            path: path.to_path_buf(),
        })
    }
}

#[async_trait]
impl ImageCache for FsImageCache {
    async fn download(&self, image: &ImageRef) -> Result<Vec<u8>> {
        let response = self.client.get(&image.url).send().await?;
        response.error_for_status_ref()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn store(&self, image: &ImageRef, bytes: &[u8]) -> Result<()> {
        let path = self.image_path(image);
        let _claim = self
            .claim(&path)
            .ok_or(SyncError::AlreadyInFlight)?;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write aside and rename so readers never see a truncated image
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::debug!(url = %image.url, bytes = bytes.len(), "Cached image");
        Ok(())
    }

    async fn fetch_and_cache(&self, image: &ImageRef) -> Result<()> {
        if self.is_cached(image).await {
            return Ok(());
        }
        let bytes = self.download(image).await?;
        self.store(image, &bytes).await
    }

    async fn is_cached(&self, image: &ImageRef) -> bool {
        tokio::fs::try_exists(self.image_path(image))
            .await
            .unwrap_or(false)
    }

    async fn remove_images(&self, parent: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.group_dir(parent)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
