use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fetched article body, stored verbatim in the cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleContent {
    pub key: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleContent {
    pub fn new(key: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            html: html.into(),
            fetched_at: Utc::now(),
        }
    }
}
