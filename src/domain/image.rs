use serde::{Deserialize, Serialize};

use crate::domain::SavedItem;

/// An image that belongs to one saved article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    pub parent: String,
}

impl ImageRef {
    pub fn new(parent: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            parent: parent.into(),
        }
    }

    /// Admission key, unique per parent item
    pub fn key(&self) -> String {
        format!("{}#{}", self.parent, self.url)
    }

    /// File name used by on-disk caches
    pub fn file_name(&self) -> String {
        SavedItem::digest(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_parent() {
        let a = ImageRef::new("https://a.example/1", "https://img.example/x.png");
        let b = ImageRef::new("https://a.example/2", "https://img.example/x.png");
        assert_ne!(a.key(), b.key());
        assert_eq!(a.file_name(), b.file_name());
    }
}
