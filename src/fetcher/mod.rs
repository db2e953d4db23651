pub mod config;
pub mod extract;
pub mod http_fetcher;
pub mod images;

use async_trait::async_trait;
use reqwest::Client;

use crate::app::Result;
use crate::domain::{ArticleContent, ImageRef};

pub use config::FetcherConfig;
pub use extract::ImageExtractor;
pub use http_fetcher::HttpArticleFetcher;
pub use images::FsImageCache;

/// Fetches one article by key. Retries and timeouts are the implementation's
/// business; the engine cancels by dropping the returned future.
#[async_trait]
pub trait ArticleFetcher {
    async fn fetch(&self, key: &str) -> Result<ArticleContent>;
}

/// Fetches and stores images for saved articles.
///
/// Downloading and storing are separate steps: a download may be dropped at
/// any await point, a store must be driven to completion once started.
#[async_trait]
pub trait ImageCache {
    async fn download(&self, image: &ImageRef) -> Result<Vec<u8>>;

    /// Persist downloaded bytes under the image's parent item
    async fn store(&self, image: &ImageRef, bytes: &[u8]) -> Result<()>;

    async fn fetch_and_cache(&self, image: &ImageRef) -> Result<()> {
        let bytes = self.download(image).await?;
        self.store(image, &bytes).await
    }

    async fn is_cached(&self, image: &ImageRef) -> bool;

    /// Drop every image stored for one saved item
    async fn remove_images(&self, parent: &str) -> Result<()>;
}

pub(crate) fn build_client(config: &FetcherConfig) -> Result<Client> {
    let client = Client::builder()
        .timeout(config.timeout())
        .gzip(true)
        .brotli(true)
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}
