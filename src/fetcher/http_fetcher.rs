use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::app::Result;
use crate::domain::ArticleContent;
use crate::fetcher::{build_client, ArticleFetcher, FetcherConfig};

/// Fetches article HTML over HTTP; the saved item key is the article URL.
pub struct HttpArticleFetcher {
    client: Client,
}

impl HttpArticleFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl ArticleFetcher for HttpArticleFetcher {
    async fn fetch(&self, key: &str) -> Result<ArticleContent> {
        let url = Url::parse(key)?;
        let response = self.client.get(url).send().await?;
        response.error_for_status_ref()?;

        let html = response.text().await?;
        tracing::debug!(key, bytes = html.len(), "Fetched article");

        Ok(ArticleContent::new(key, html))
    }
}
