//! Keeps every saved item available offline.
//!
//! Each admitted item runs as one tokio task that fetches the article, then
//! fans out to its images. Item state, the progress working set and report
//! delivery share one mutex: once a cancellation has taken that lock, no
//! canceled task can publish progress or a report afterwards.
//!
//! Removals cancel synchronously and delete in the background. Purges of one
//! key run in order, and a key saved again waits for its pending purge.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::Result;
use crate::domain::{ArticleContent, ImageRef, TaskKind};
use crate::fetcher::{ArticleFetcher, ImageCache, ImageExtractor};
use crate::store::{CacheStore, ListChange, SavedList, Subscription};
use crate::sync::{
    AdmissionController, CancelReport, FetchHandle, ItemDownload, ItemOutcome, ItemReport,
    ItemReports, ProgressAggregator, Reconciler, SyncConfig, SyncError, Token,
};

/// Everything the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub saved_list: Arc<dyn SavedList>,
    pub cache: Arc<dyn CacheStore>,
    pub articles: Arc<dyn ArticleFetcher + Send + Sync>,
    pub images: Arc<dyn ImageCache + Send + Sync>,
}

struct SyncState {
    items: HashMap<String, ItemDownload>,
    progress: ProgressAggregator,
}

struct Shared {
    collab: Collaborators,
    config: SyncConfig,
    reconciler: Reconciler,
    admission: AdmissionController,
    extractor: ImageExtractor,
    state: Mutex<SyncState>,
    /// Purges still deleting, by key; each receiver flips to true when done
    purges: Mutex<HashMap<String, watch::Receiver<bool>>>,
    reports: mpsc::UnboundedSender<ItemReport>,
    progress: watch::Sender<f64>,
}

pub struct SyncEngine {
    shared: Arc<Shared>,
    observer: Mutex<Option<Subscription>>,
}

impl SyncEngine {
    pub fn new(collab: Collaborators, config: SyncConfig) -> (Self, ItemReports) {
        Self::with_admission(collab, config, AdmissionController::new())
    }

    pub(crate) fn with_admission(
        collab: Collaborators,
        config: SyncConfig,
        admission: AdmissionController,
    ) -> (Self, ItemReports) {
        let (reports, rx) = ItemReports::channel();
        let mut state = SyncState {
            items: HashMap::new(),
            progress: ProgressAggregator::new(),
        };
        let initial = state.progress.reset(Vec::new(), &state.items);
        let (progress, _) = watch::channel(initial);

        let shared = Arc::new(Shared {
            reconciler: Reconciler::new(config.retry_partial),
            collab,
            config,
            admission,
            extractor: ImageExtractor::new(),
            state: Mutex::new(state),
            purges: Mutex::new(HashMap::new()),
            reports,
            progress,
        });

        let engine = Self {
            shared,
            observer: Mutex::new(None),
        };
        (engine, rx)
    }

    /// Start observing the saved list. Calling it again while running is a
    /// no-op. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut observer = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        if observer.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ListChange>();
        let subscription = self
            .shared
            .collab
            .saved_list
            .subscribe(Arc::new(move |change: &ListChange| {
                // Receiver only goes away with the intake loop
                let _ = tx.send(change.clone());
            }));

        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                shared.apply(change);
            }
            debug!("Saved-list intake stopped");
        });

        self.shared.reset_working_set(Vec::new());
        *observer = Some(subscription);
        info!("Observing saved list");
    }

    /// Stop observing. Downloads already admitted keep running.
    pub fn stop(&self) {
        let subscription = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            info!("Stopped observing saved list");
        }
    }

    pub fn is_observing(&self) -> bool {
        self.observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Enqueue every saved item that is not fully cached. Returns how many
    /// items were started; items already downloading are not started twice.
    /// An item whose removal is still being purged counts as started and
    /// begins once the purge finishes.
    pub fn download_all_uncached_data(&self) -> Result<usize> {
        let keys = self.shared.reconciler.uncached(
            self.shared.collab.saved_list.as_ref(),
            self.shared.collab.cache.as_ref(),
        )?;
        self.shared.reset_working_set(keys.iter().cloned().collect());

        let mut started = 0;
        for key in keys {
            if self.shared.schedule(key) {
                started += 1;
            }
        }
        info!(started, "Catch-up pass enqueued items");
        Ok(started)
    }

    /// Cancel every outstanding download and wait (bounded) for them to stop.
    pub async fn cancel_all_downloads(&self) -> CancelReport {
        let canceled = {
            let mut state = self.shared.state();
            let canceled = self.shared.admission.cancel_all_tokens();
            for item in state.items.values_mut() {
                item.cancel();
            }
            canceled
        };

        let grace = self.shared.config.cancel_grace();
        let drained = self.shared.admission.cancel_all(grace).await.drained;
        if drained {
            info!(canceled, "Canceled all downloads");
        } else {
            warn!(canceled, ?grace, "Downloads still running after cancel grace period");
        }
        CancelReport { canceled, drained }
    }

    pub async fn cancel_fetch(&self) -> CancelReport {
        self.cancel_all_downloads().await
    }

    /// Aggregate progress of the current pass, in `0.0..=1.0`
    pub fn current_progress(&self) -> f64 {
        *self.shared.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.shared.progress.subscribe()
    }

    /// Invoke `callback` with the current progress and on every increase.
    /// The returned task ends when the engine is dropped.
    pub fn get_progress<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(f64) + Send + 'static,
    {
        let mut rx = self.subscribe_progress();
        tokio::spawn(async move {
            let mut value = *rx.borrow_and_update();
            loop {
                callback(value);
                if rx.changed().await.is_err() {
                    break;
                }
                value = *rx.borrow_and_update();
            }
        })
    }

    /// Number of article and image fetches currently admitted
    pub fn in_flight(&self) -> usize {
        self.shared.admission.len()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
        self.shared.admission.cancel_all_tokens();
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_working_set(&self, keys: Vec<String>) {
        let mut guard = self.state();
        let state = &mut *guard;
        state
            .items
            .retain(|_, item| !item.is_terminal() && !item.is_canceled());

        let in_flight: Vec<String> = state.items.keys().cloned().collect();
        let baseline = state
            .progress
            .reset(keys.into_iter().chain(in_flight), &state.items);
        self.progress.send_replace(baseline);
    }

    fn publish(&self, state: &mut SyncState) {
        if let Some(value) = state.progress.recompute(&state.items) {
            self.progress.send_replace(value);
        }
    }

    fn purges(&self) -> MutexGuard<'_, HashMap<String, watch::Receiver<bool>>> {
        self.purges.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(self: &Arc<Self>, change: ListChange) {
        let current = match self.collab.saved_list.current_keys() {
            Ok(current) => current,
            Err(e) => {
                error!(error = %e, "Failed to read saved list");
                return;
            }
        };

        let delta = Reconciler::delta(&change, &current);
        for key in delta.to_purge {
            self.spawn_purge(key);
        }
        for key in delta.to_fetch {
            self.schedule(key);
        }
    }

    /// Enqueue now, or once a pending purge of the same key has finished.
    fn schedule(self: &Arc<Self>, key: String) -> bool {
        let pending = self.purges().get(&key).cloned();
        let Some(mut purged) = pending else {
            return self.enqueue(key);
        };

        debug!(key = %key, "Waiting for pending purge before downloading");
        let shared = self.clone();
        tokio::spawn(async move {
            // Err means the purge task is gone, which also ends the wait
            let _ = purged.wait_for(|done| *done).await;
            shared.enqueue(key);
        });
        true
    }

    /// Admit and spawn one item. False if it is already downloading.
    fn enqueue(self: &Arc<Self>, key: String) -> bool {
        let token = match self.admission.admit(&key, TaskKind::Article, &key) {
            Ok(token) => token,
            Err(_) => {
                debug!(key = %key, "Item already in flight");
                return false;
            }
        };

        {
            let mut guard = self.state();
            let state = &mut *guard;
            let mut item = ItemDownload::new(key.clone());
            if let Err(e) = item.start_article() {
                warn!(key = %key, error = %e, "Could not start item");
                return false;
            }
            state.items.insert(key.clone(), item);
            if let Some(baseline) = state.progress.add(&key, &state.items) {
                self.progress.send_replace(baseline);
            }
        }

        tokio::spawn(self.clone().run_item(token));
        true
    }

    /// Remove an item: cancel its work now, then delete everything cached for
    /// it on a background task, after any earlier purge of the same key.
    fn spawn_purge(self: &Arc<Self>, key: String) {
        let canceled = {
            let mut guard = self.state();
            let state = &mut *guard;
            let canceled = self.admission.cancel_group(&key);
            state.items.remove(&key);
            state.progress.retire(&key);
            self.publish(state);
            canceled
        };

        let (done, purged) = watch::channel(false);
        let previous = self.purges().insert(key.clone(), purged.clone());

        let shared = self.clone();
        tokio::spawn(async move {
            if let Some(mut previous) = previous {
                let _ = previous.wait_for(|done| *done).await;
            }
            shared.purge(&key, canceled).await;

            {
                let mut purges = shared.purges();
                if purges.get(&key).is_some_and(|rx| rx.same_channel(&purged)) {
                    purges.remove(&key);
                }
            }
            done.send_replace(true);
        });
    }

    async fn purge(&self, key: &str, canceled: usize) {
        let grace = self.config.cancel_grace();
        if canceled > 0 && !self.admission.wait_group_released(key, grace).await {
            warn!(key, ?grace, "Purging while downloads are still running");
        }

        if let Err(e) = self.collab.cache.delete(key) {
            error!(key, error = %e, "Failed to delete cached article");
        }
        if let Err(e) = self.collab.images.remove_images(key).await {
            error!(key, error = %e, "Failed to delete cached images");
        }
        info!(key, canceled, "Purged saved item");
    }

    /// Apply `update` to a live item and publish the result. Skipped once the
    /// item's work is canceled.
    fn update_item<F>(&self, key: &str, cancel: &CancellationToken, update: F) -> bool
    where
        F: FnOnce(&mut ItemDownload) -> std::result::Result<(), SyncError>,
    {
        let mut guard = self.state();
        if cancel.is_cancelled() {
            return false;
        }
        let state = &mut *guard;
        let Some(item) = state.items.get_mut(key) else {
            return false;
        };
        if let Err(e) = update(item) {
            warn!(key, error = %e, "Rejected item update");
            return false;
        }
        let outcome = item.outcome();
        let cached_state = item.cached_state();

        self.publish(state);
        if let Some(outcome) = outcome {
            if let Err(e) = self.collab.saved_list.set_cached_state(key, cached_state) {
                error!(key, error = %e, "Failed to record cached state");
            }
            self.report(key, &outcome);
        }
        true
    }

    fn report(&self, key: &str, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Complete => info!(key, "Item available offline"),
            ItemOutcome::PartiallyFailed { failed, total } => {
                warn!(key, failed = failed.len(), total, "Some images failed to download")
            }
            ItemOutcome::ArticleFailed(cause) => warn!(key, cause = %cause, "Article fetch failed"),
        }
        // Receiver may be gone; reports are best effort for the caller
        let _ = self.reports.send(ItemReport::new(key, outcome));
    }

    fn discard(&self, key: &str) {
        if let Some(item) = self.state().items.get_mut(key) {
            item.cancel();
        }
        debug!(key, "Item download canceled");
    }

    async fn run_item(self: Arc<Self>, token: Token) {
        let key = token.key().to_string();
        let cancel = token.cancellation();

        let article = match self.article_for(&token).await {
            Ok(article) => article,
            Err(e) if e.is_canceled() || cancel.is_cancelled() => {
                self.discard(&key);
                return;
            }
            Err(e) => {
                let cause = e.to_string();
                self.update_item(&key, &cancel, |item| item.article_failed(cause));
                return;
            }
        };

        let images = self.extractor.images(&article);
        let mut listed = Vec::with_capacity(images.len());
        let mut pending = Vec::new();
        for image in images {
            let cached = self.collab.images.is_cached(&image).await;
            listed.push((image.url.clone(), cached));
            if !cached {
                pending.push(image);
            } else {
                debug!(key = %key, url = %image.url, "Image already cached");
            }
        }

        if !self.update_item(&key, &cancel, |item| item.article_fetched(listed)) {
            self.discard(&key);
            return;
        }

        let tasks = pending
            .into_iter()
            .map(|image| self.clone().run_image(image, cancel.clone()));
        join_all(tasks).await;
        // The article slot is held until here so purges wait for the images too
        drop(token);
    }

    /// Cached article if present, otherwise fetch and store it.
    async fn article_for(&self, token: &Token) -> Result<ArticleContent> {
        let key = token.key();
        if let Some(article) = self.collab.cache.get(key)? {
            debug!(key, "Article already cached");
            return Ok(article);
        }

        let Some(permit) = self.admission.acquire(token).await else {
            return Err(SyncError::Canceled.into());
        };
        let articles = self.collab.articles.clone();
        let fetch_key = key.to_string();
        let handle = FetchHandle::spawn(token.cancellation(), async move {
            articles.fetch(&fetch_key).await
        });
        let article = handle.outcome().await;
        drop(permit);

        let article = article?;
        if token.is_cancelled() {
            return Err(SyncError::Canceled.into());
        }
        self.collab.cache.put(&article)?;
        Ok(article)
    }

    async fn run_image(self: Arc<Self>, image: ImageRef, item_cancel: CancellationToken) {
        let key = image.parent.clone();
        let url = image.url.clone();

        let token = match self.admission.admit(&image.key(), TaskKind::Image, &key) {
            Ok(token) => token,
            Err(e) => {
                self.update_item(&key, &item_cancel, |item| {
                    item.image_finished(&url, Err(e.to_string()))
                });
                return;
            }
        };
        if item_cancel.is_cancelled() {
            return;
        }

        let Some(permit) = self.admission.acquire(&token).await else {
            return;
        };
        if !self.update_item(&key, &item_cancel, |item| item.image_started(&url)) {
            return;
        }

        let images = self.collab.images.clone();
        let download = image.clone();
        let handle = FetchHandle::spawn(token.cancellation(), async move {
            images.download(&download).await
        });
        let downloaded = handle.outcome().await;
        drop(permit);

        let result = match downloaded {
            Err(e) if e.is_canceled() => return,
            Ok(_) if token.is_cancelled() || item_cancel.is_cancelled() => return,
            // Runs to completion while the token is held, so a purge of this
            // item waits for the write before deleting the directory
            Ok(bytes) => self.collab.images.store(&image, &bytes).await,
            Err(e) => Err(e),
        };
        let result = result.map_err(|e| {
            warn!(key = %key, url = %url, error = %e, "Image fetch failed");
            e.to_string()
        });
        self.update_item(&key, &item_cancel, |item| item.image_finished(&url, result));
        drop(token);
    }
}
