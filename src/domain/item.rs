use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How much of a saved item is available offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachedState {
    /// Nothing is known about the cache yet (freshly saved).
    #[default]
    Unknown,
    /// The article is cached but at least one image is missing.
    Partial,
    /// Article and every enumerated image are cached.
    Complete,
    /// The article itself could not be fetched.
    Failed,
}

impl CachedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachedState::Unknown => "unknown",
            CachedState::Partial => "partial",
            CachedState::Complete => "complete",
            CachedState::Failed => "failed",
        }
    }

    /// Unrecognized values map to `Unknown` so the item is fetched again.
    pub fn parse(s: &str) -> Self {
        match s {
            "partial" => CachedState::Partial,
            "complete" => CachedState::Complete,
            "failed" => CachedState::Failed,
            _ => CachedState::Unknown,
        }
    }
}

/// One entry of the saved reading list, keyed by canonical article URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedItem {
    pub key: String,
    pub title: Option<String>,
    pub cached_state: CachedState,
    pub saved_at: DateTime<Utc>,
}

impl SavedItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: None,
            cached_state: CachedState::Unknown,
            saved_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.key)
    }

    /// Stable on-disk name for a key
    pub fn digest(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_state_round_trips_through_str() {
        for state in [
            CachedState::Unknown,
            CachedState::Partial,
            CachedState::Complete,
            CachedState::Failed,
        ] {
            assert_eq!(CachedState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn test_cached_state_unknown_value() {
        assert_eq!(CachedState::parse("bogus"), CachedState::Unknown);
    }

    #[test]
    fn test_display_title_falls_back_to_key() {
        let mut item = SavedItem::new("https://en.wikipedia.org/wiki/Rust");
        assert_eq!(item.display_title(), "https://en.wikipedia.org/wiki/Rust");
        item.title = Some("Rust".into());
        assert_eq!(item.display_title(), "Rust");
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = SavedItem::digest("https://en.wikipedia.org/wiki/Rust");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, SavedItem::digest("https://en.wikipedia.org/wiki/Rust"));
        assert_ne!(digest, SavedItem::digest("https://en.wikipedia.org/wiki/Go"));
    }
}
