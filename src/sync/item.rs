//! Download state of a single saved item.
//!
//! ```text
//! NotStarted ─► FetchingArticle ─┬─► ArticleFailed
//!                                └─► FetchingImages ─┬─► Complete
//!                                                    └─► PartiallyFailed
//! ```
//!
//! An article with no images (or only already-cached ones) goes from
//! `FetchingArticle` straight to `Complete`.

use std::collections::BTreeMap;

use crate::domain::{CachedState, TaskState};
use crate::sync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    NotStarted,
    FetchingArticle,
    ArticleFailed,
    FetchingImages,
    Complete,
    PartiallyFailed,
}

impl ItemPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemPhase::ArticleFailed | ItemPhase::Complete | ItemPhase::PartiallyFailed
        )
    }
}

/// Item-level classification handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Complete,
    PartiallyFailed { failed: Vec<String>, total: usize },
    ArticleFailed(String),
}

/// Per-item completion delivered once per item per pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub key: String,
    /// The article is readable offline
    pub success: bool,
    pub error: Option<SyncError>,
}

impl ItemReport {
    pub fn new(key: impl Into<String>, outcome: &ItemOutcome) -> Self {
        let key = key.into();
        match outcome {
            ItemOutcome::Complete => Self {
                key,
                success: true,
                error: None,
            },
            ItemOutcome::PartiallyFailed { failed, total } => Self {
                key,
                success: true,
                error: Some(SyncError::ImageFetchFailed {
                    failed: failed.len(),
                    total: *total,
                }),
            },
            ItemOutcome::ArticleFailed(cause) => Self {
                key,
                success: false,
                error: Some(SyncError::ArticleFetchFailed(cause.clone())),
            },
        }
    }

    /// Fully downloaded, nothing missing
    pub fn is_clean(&self) -> bool {
        self.success && self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ItemDownload {
    key: String,
    phase: ItemPhase,
    article: TaskState,
    images: BTreeMap<String, TaskState>,
}

impl ItemDownload {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            phase: ItemPhase::NotStarted,
            article: TaskState::Pending,
            images: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn phase(&self) -> ItemPhase {
        self.phase
    }

    pub fn image_state(&self, url: &str) -> Option<&TaskState> {
        self.images.get(url)
    }

    fn invalid(&self, event: &'static str) -> SyncError {
        SyncError::InvalidTransition {
            key: self.key.clone(),
            phase: self.phase,
            event,
        }
    }

    /// The article task was admitted
    pub fn start_article(&mut self) -> Result<(), SyncError> {
        if self.phase != ItemPhase::NotStarted || self.is_canceled() {
            return Err(self.invalid("start_article"));
        }
        self.phase = ItemPhase::FetchingArticle;
        self.article = TaskState::Running;
        Ok(())
    }

    pub fn article_failed(&mut self, cause: impl Into<String>) -> Result<(), SyncError> {
        if self.phase != ItemPhase::FetchingArticle || self.is_canceled() {
            return Err(self.invalid("article_failed"));
        }
        self.phase = ItemPhase::ArticleFailed;
        self.article = TaskState::Failed(cause.into());
        Ok(())
    }

    /// The article is cached; `images` lists every image URL with whether it
    /// is already cached. Cached images count as succeeded immediately.
    pub fn article_fetched<I>(&mut self, images: I) -> Result<(), SyncError>
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        if self.phase != ItemPhase::FetchingArticle || self.is_canceled() {
            return Err(self.invalid("article_fetched"));
        }
        self.article = TaskState::Succeeded;
        self.images = images
            .into_iter()
            .map(|(url, cached)| {
                let state = if cached {
                    TaskState::Succeeded
                } else {
                    TaskState::Pending
                };
                (url, state)
            })
            .collect();
        self.phase = ItemPhase::FetchingImages;
        self.settle_images();
        Ok(())
    }

    pub fn image_started(&mut self, url: &str) -> Result<(), SyncError> {
        let pending = self.images.get(url) == Some(&TaskState::Pending);
        if self.phase != ItemPhase::FetchingImages || !pending {
            return Err(self.invalid("image_started"));
        }
        if let Some(state) = self.images.get_mut(url) {
            *state = TaskState::Running;
        }
        Ok(())
    }

    /// Record an image's terminal result. A failure here is final for this
    /// pass: the fetcher has already applied its own retries.
    pub fn image_finished(
        &mut self,
        url: &str,
        result: Result<(), String>,
    ) -> Result<(), SyncError> {
        let open = self.images.get(url).is_some_and(|s| !s.is_terminal());
        if self.phase != ItemPhase::FetchingImages || !open {
            return Err(self.invalid("image_finished"));
        }
        if let Some(state) = self.images.get_mut(url) {
            *state = match result {
                Ok(()) => TaskState::Succeeded,
                Err(cause) => TaskState::Failed(cause),
            };
        }
        self.settle_images();
        Ok(())
    }

    fn settle_images(&mut self) {
        if !self.images.values().all(TaskState::is_settled) {
            return;
        }
        let any_failed = self
            .images
            .values()
            .any(|s| matches!(s, TaskState::Failed(_)));
        self.phase = if any_failed {
            ItemPhase::PartiallyFailed
        } else {
            ItemPhase::Complete
        };
    }

    /// Stop the item where it is: every unfinished task becomes `Canceled`
    /// and later transitions are rejected. Progress stays frozen. Returns
    /// false if there was nothing left to cancel.
    pub fn cancel(&mut self) -> bool {
        if self.is_terminal() || self.is_canceled() {
            return false;
        }
        if !self.article.is_terminal() {
            self.article = TaskState::Canceled;
        }
        for state in self.images.values_mut() {
            if !state.is_terminal() {
                *state = TaskState::Canceled;
            }
        }
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.article == TaskState::Canceled
            || self.images.values().any(|s| *s == TaskState::Canceled)
    }

    /// Fraction of known sub-tasks that have settled. Zero while the image
    /// list is unknown, so it never drops once the list appears.
    pub fn progress(&self) -> f64 {
        match self.phase {
            ItemPhase::NotStarted | ItemPhase::FetchingArticle => 0.0,
            ItemPhase::FetchingImages => {
                let settled = 1 + self.images.values().filter(|s| s.is_settled()).count();
                settled as f64 / (1 + self.images.len()) as f64
            }
            ItemPhase::ArticleFailed | ItemPhase::Complete | ItemPhase::PartiallyFailed => 1.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn outcome(&self) -> Option<ItemOutcome> {
        match self.phase {
            ItemPhase::Complete => Some(ItemOutcome::Complete),
            ItemPhase::PartiallyFailed => Some(ItemOutcome::PartiallyFailed {
                failed: self
                    .images
                    .iter()
                    .filter(|(_, s)| matches!(s, TaskState::Failed(_)))
                    .map(|(url, _)| url.clone())
                    .collect(),
                total: self.images.len(),
            }),
            ItemPhase::ArticleFailed => match &self.article {
                TaskState::Failed(cause) => Some(ItemOutcome::ArticleFailed(cause.clone())),
                _ => Some(ItemOutcome::ArticleFailed(String::new())),
            },
            _ => None,
        }
    }

    /// What the saved list should record for this item right now
    pub fn cached_state(&self) -> CachedState {
        match self.phase {
            ItemPhase::NotStarted | ItemPhase::FetchingArticle => CachedState::Unknown,
            ItemPhase::ArticleFailed => CachedState::Failed,
            ItemPhase::FetchingImages | ItemPhase::PartiallyFailed => CachedState::Partial,
            ItemPhase::Complete => CachedState::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(images: &[(&str, bool)]) -> ItemDownload {
        let mut item = ItemDownload::new("https://example.com/a");
        item.start_article().unwrap();
        item.article_fetched(images.iter().map(|(u, c)| (u.to_string(), *c)))
            .unwrap();
        item
    }

    #[test]
    fn test_article_without_images_completes() {
        let item = fetched(&[]);
        assert_eq!(item.phase(), ItemPhase::Complete);
        assert_eq!(item.progress(), 1.0);
        assert_eq!(item.outcome(), Some(ItemOutcome::Complete));
        assert_eq!(item.cached_state(), CachedState::Complete);
    }

    #[test]
    fn test_progress_counts_article_then_images() {
        let mut item = ItemDownload::new("https://example.com/a");
        assert_eq!(item.progress(), 0.0);
        item.start_article().unwrap();
        assert_eq!(item.progress(), 0.0);

        item.article_fetched(vec![("i1".to_string(), false), ("i2".to_string(), false)])
            .unwrap();
        assert_eq!(item.phase(), ItemPhase::FetchingImages);
        assert!((item.progress() - 1.0 / 3.0).abs() < 1e-9);

        item.image_started("i1").unwrap();
        item.image_finished("i1", Ok(())).unwrap();
        assert!((item.progress() - 2.0 / 3.0).abs() < 1e-9);

        item.image_started("i2").unwrap();
        item.image_finished("i2", Ok(())).unwrap();
        assert_eq!(item.phase(), ItemPhase::Complete);
        assert_eq!(item.progress(), 1.0);
    }

    #[test]
    fn test_image_failure_degrades_to_partial() {
        let mut item = fetched(&[("i1", false), ("i2", false)]);
        item.image_started("i1").unwrap();
        item.image_finished("i1", Ok(())).unwrap();
        item.image_started("i2").unwrap();
        item.image_finished("i2", Err("404".into())).unwrap();

        assert_eq!(item.phase(), ItemPhase::PartiallyFailed);
        assert_eq!(item.cached_state(), CachedState::Partial);
        assert_eq!(
            item.outcome(),
            Some(ItemOutcome::PartiallyFailed {
                failed: vec!["i2".into()],
                total: 2
            })
        );
        assert_eq!(item.image_state("i2"), Some(&TaskState::Failed("404".into())));
    }

    #[test]
    fn test_cached_images_are_skipped() {
        let item = fetched(&[("i1", true), ("i2", false)]);
        assert_eq!(item.image_state("i1"), Some(&TaskState::Succeeded));
        assert_eq!(item.image_state("i2"), Some(&TaskState::Pending));
        assert!((item.progress() - 2.0 / 3.0).abs() < 1e-9);

        let all_cached = fetched(&[("i1", true)]);
        assert_eq!(all_cached.phase(), ItemPhase::Complete);
    }

    #[test]
    fn test_article_failure_is_terminal() {
        let mut item = ItemDownload::new("https://example.com/a");
        item.start_article().unwrap();
        item.article_failed("timeout").unwrap();

        assert!(item.is_terminal());
        assert_eq!(item.progress(), 1.0);
        assert_eq!(item.cached_state(), CachedState::Failed);
        assert_eq!(item.outcome(), Some(ItemOutcome::ArticleFailed("timeout".into())));
        assert!(item.article_fetched(Vec::new()).is_err());
        assert!(item.image_started("i1").is_err());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut item = ItemDownload::new("https://example.com/a");
        assert!(matches!(
            item.article_failed("x"),
            Err(SyncError::InvalidTransition {
                phase: ItemPhase::NotStarted,
                ..
            })
        ));
        item.start_article().unwrap();
        assert!(item.start_article().is_err());

        let mut item = fetched(&[("i1", false)]);
        assert!(item.image_started("unknown").is_err());
        item.image_started("i1").unwrap();
        item.image_finished("i1", Ok(())).unwrap();
        assert!(item.image_finished("i1", Ok(())).is_err());
    }

    #[test]
    fn test_cancel_freezes_unfinished_tasks() {
        let mut item = fetched(&[("i1", false), ("i2", false), ("i3", false)]);
        item.image_started("i1").unwrap();
        item.image_finished("i1", Ok(())).unwrap();
        item.image_started("i2").unwrap();
        let before = item.progress();

        assert!(item.cancel());
        assert!(item.is_canceled());
        assert!(!item.is_terminal());
        assert_eq!(item.image_state("i1"), Some(&TaskState::Succeeded));
        assert_eq!(item.image_state("i2"), Some(&TaskState::Canceled));
        assert_eq!(item.image_state("i3"), Some(&TaskState::Canceled));
        assert_eq!(item.progress(), before);
        assert_eq!(item.outcome(), None);

        // A late result from the running image is ignored
        assert!(item.image_finished("i2", Ok(())).is_err());
        assert!(item.image_started("i3").is_err());
        assert!(!item.cancel());
    }

    #[test]
    fn test_cancel_before_article_arrives() {
        let mut item = ItemDownload::new("https://example.com/a");
        item.start_article().unwrap();
        assert!(item.cancel());
        assert_eq!(item.progress(), 0.0);
        assert!(item.article_fetched(Vec::new()).is_err());
        assert!(item.article_failed("late").is_err());
        assert_eq!(item.cached_state(), CachedState::Unknown);
    }

    #[test]
    fn test_finished_item_cannot_be_canceled() {
        let mut item = fetched(&[]);
        assert!(!item.cancel());
        assert!(!item.is_canceled());
        assert_eq!(item.outcome(), Some(ItemOutcome::Complete));
    }

    #[test]
    fn test_report_from_outcome() {
        let clean = ItemReport::new("a", &ItemOutcome::Complete);
        assert!(clean.success);
        assert!(clean.is_clean());

        let partial = ItemReport::new(
            "a",
            &ItemOutcome::PartiallyFailed {
                failed: vec!["x".into()],
                total: 2,
            },
        );
        assert!(partial.success);
        assert!(!partial.is_clean());
        assert_eq!(
            partial.error,
            Some(SyncError::ImageFetchFailed {
                failed: 1,
                total: 2
            })
        );

        let failed = ItemReport::new("a", &ItemOutcome::ArticleFailed("dns".into()));
        assert!(!failed.success);
        assert_eq!(
            failed.error,
            Some(SyncError::ArticleFetchFailed("dns".into()))
        );
    }
}
