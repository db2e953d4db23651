pub mod notify;
pub mod sqlite;

use std::collections::BTreeSet;

use crate::app::Result;
use crate::domain::{ArticleContent, CachedState};

pub use notify::{ChangeNotifier, ListChange, Listener, Subscription};
pub use sqlite::SqliteStore;

/// The persisted reading list the engine keeps offline.
pub trait SavedList: Send + Sync {
    /// Keys currently on the list; authoritative over notification payloads
    fn current_keys(&self) -> Result<BTreeSet<String>>;

    /// Register for add/remove batches. Dropping the subscription unregisters it.
    fn subscribe(&self, listener: Listener) -> Subscription;

    fn cached_state(&self, key: &str) -> Result<CachedState>;
    fn set_cached_state(&self, key: &str, state: CachedState) -> Result<()>;
}

/// Local article store, keyed by saved item key.
pub trait CacheStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool>;
    fn get(&self, key: &str) -> Result<Option<ArticleContent>>;
    /// Writes the whole article in one statement.
    fn put(&self, content: &ArticleContent) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}
