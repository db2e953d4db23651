use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::error::{Result, StashError};
use crate::config::Config;
use crate::fetcher::{FsImageCache, HttpArticleFetcher};
use crate::store::SqliteStore;
use crate::sync::{Collaborators, ItemReports, SyncEngine};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub images: Arc<FsImageCache>,
    pub engine: SyncEngine,
    pub reports: ItemReports,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = match &config.storage.data_dir {
            Some(dir) => dir.clone(),
            None => Self::default_data_dir()?,
        };
        Self::with_data_dir(config, &data_dir)
    }

    /// Database at `<dir>/stash.db`, images under `<dir>/images`
    pub fn with_data_dir(config: Config, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let store = Arc::new(SqliteStore::new(data_dir.join("stash.db"))?);
        let images = Arc::new(FsImageCache::new(data_dir.join("images"), &config.fetcher)?);
        let articles = Arc::new(HttpArticleFetcher::new(&config.fetcher)?);

        let collab = Collaborators {
            saved_list: store.clone(),
            cache: store.clone(),
            articles,
            images: images.clone(),
        };
        let (engine, reports) = SyncEngine::new(collab, config.sync.clone());

        Ok(Self {
            config,
            store,
            images,
            engine,
            reports,
        })
    }

    fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StashError::Config("Could not find data directory".into()))?;
        Ok(data_dir.join("stash"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SavedItem;
    use crate::store::SavedList;

    #[test]
    fn test_context_creates_storage_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::with_data_dir(Config::default(), dir.path()).unwrap();

        assert!(dir.path().join("stash.db").exists());
        assert_eq!(ctx.images.root(), dir.path().join("images"));

        ctx.store
            .save(&SavedItem::new("https://example.com/a"))
            .unwrap();
        assert_eq!(ctx.store.current_keys().unwrap().len(), 1);
    }

    #[test]
    fn test_configured_data_dir_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(dir.path().join("custom"));

        AppContext::new(config).unwrap();
        assert!(dir.path().join("custom").join("stash.db").exists());
    }
}
