//! Dedup and concurrency control for download tasks.
//!
//! Two separate limits apply to every task:
//!
//! - a *slot* per `(key, kind)`: admission fails with
//!   [`SyncError::AlreadyInFlight`] while another task holds it;
//! - a *permit* from a fixed FIFO pool of [`MAX_CONCURRENT_FETCHES`], held only
//!   while the task is actually fetching.
//!
//! Slots are released when their [`Token`] is dropped, so every exit path of
//! a task (success, failure, cancellation, panic) frees the slot exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::domain::TaskKind;
use crate::sync::SyncError;

/// Size of the global admission pool.
pub const MAX_CONCURRENT_FETCHES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    key: String,
    kind: TaskKind,
}

struct Slot {
    id: u64,
    group: String,
    cancel: CancellationToken,
}

struct Inner {
    slots: Mutex<HashMap<SlotKey, Slot>>,
    pool: Arc<Semaphore>,
    released: Notify,
    next_id: AtomicU64,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, slot: &SlotKey, id: u64) {
        let mut slots = self.slots();
        if slots.get(slot).is_some_and(|s| s.id == id) {
            slots.remove(slot);
        }
        drop(slots);
        self.released.notify_waiters();
    }
}

/// Outcome of [`AdmissionController::cancel_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelReport {
    /// Tokens that were outstanding when cancellation was requested
    pub canceled: usize,
    /// Whether every one of them released within the grace period
    pub drained: bool,
}

/// Ownership of one `(key, kind)` slot.
pub struct Token {
    inner: Arc<Inner>,
    slot: SlotKey,
    id: u64,
    cancel: CancellationToken,
}

impl Token {
    pub fn key(&self) -> &str {
        &self.slot.key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by fetches running under this slot
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.inner.release(&self.slot, self.id);
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("key", &self.slot.key)
            .field("kind", &self.slot.kind)
            .field("id", &self.id)
            .finish()
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONCURRENT_FETCHES)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                pool: Arc::new(Semaphore::new(capacity)),
                released: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Claim the `(key, kind)` slot. `group` ties the slot to a saved item so
    /// that [`cancel_group`](Self::cancel_group) reaches its image tasks.
    pub fn admit(&self, key: &str, kind: TaskKind, group: &str) -> Result<Token, SyncError> {
        let slot = SlotKey {
            key: key.to_string(),
            kind,
        };
        let mut slots = self.inner.slots();
        if slots.contains_key(&slot) {
            return Err(SyncError::AlreadyInFlight);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        slots.insert(
            slot.clone(),
            Slot {
                id,
                group: group.to_string(),
                cancel: cancel.clone(),
            },
        );

        Ok(Token {
            inner: self.inner.clone(),
            slot,
            id,
            cancel,
        })
    }

    pub fn release(&self, token: Token) {
        drop(token);
    }

    /// Wait for a pool permit. Waiters are served in FIFO order; `None` means
    /// the token was canceled before a permit became available.
    pub async fn acquire(&self, token: &Token) -> Option<OwnedSemaphorePermit> {
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancel.cancelled() => None,
            permit = self.inner.pool.clone().acquire_owned() => permit.ok(),
        }
    }

    pub fn in_flight(&self, key: &str, kind: TaskKind) -> bool {
        self.inner.slots().contains_key(&SlotKey {
            key: key.to_string(),
            kind,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available_permits(&self) -> usize {
        self.inner.pool.available_permits()
    }

    /// Cancel every slot of one saved item. Returns how many were canceled.
    pub fn cancel_group(&self, group: &str) -> usize {
        let slots = self.inner.slots();
        let mut count = 0;
        for slot in slots.values().filter(|s| s.group == group) {
            slot.cancel.cancel();
            count += 1;
        }
        count
    }

    pub(crate) fn cancel_all_tokens(&self) -> usize {
        let slots = self.inner.slots();
        for slot in slots.values() {
            slot.cancel.cancel();
        }
        slots.len()
    }

    /// Cancel every outstanding token, then wait up to `grace` for all of them
    /// to release.
    pub async fn cancel_all(&self, grace: Duration) -> CancelReport {
        let canceled = self.cancel_all_tokens();
        let drained = self.wait_until(grace, |slots| slots.is_empty()).await;
        CancelReport { canceled, drained }
    }

    /// Wait up to `grace` for every slot of `group` to release.
    pub async fn wait_group_released(&self, group: &str, grace: Duration) -> bool {
        self.wait_until(grace, |slots| slots.values().all(|s| s.group != group))
            .await
    }

    async fn wait_until<F>(&self, grace: Duration, done: F) -> bool
    where
        F: Fn(&HashMap<SlotKey, Slot>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed
            notified.as_mut().enable();

            if done(&*self.inner.slots()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return done(&*self.inner.slots());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_admit_rejects_duplicate_slot() {
        let controller = AdmissionController::new();
        let token = controller.admit("a", TaskKind::Article, "a").unwrap();

        assert!(matches!(
            controller.admit("a", TaskKind::Article, "a"),
            Err(SyncError::AlreadyInFlight)
        ));
        // Different kind is a different slot
        let image = controller.admit("a", TaskKind::Image, "a").unwrap();
        assert_eq!(controller.len(), 2);

        controller.release(token);
        controller.release(image);
        assert!(controller.is_empty());
    }

    #[test]
    fn test_drop_releases_slot() {
        let controller = AdmissionController::new();
        {
            let _token = controller.admit("a", TaskKind::Article, "a").unwrap();
            assert!(controller.in_flight("a", TaskKind::Article));
        }
        assert!(!controller.in_flight("a", TaskKind::Article));
        assert!(controller.admit("a", TaskKind::Article, "a").is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_admits_yield_one_token() {
        let controller = AdmissionController::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller.admit("same", TaskKind::Article, "same").ok()
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            if let Some(token) = handle.await.unwrap() {
                tokens.push(token);
            }
        }
        assert_eq!(tokens.len(), 1);
        assert_eq!(controller.len(), 1);
    }

    #[tokio::test]
    async fn test_pool_bounds_permits_fifo() {
        let controller = AdmissionController::with_capacity(1);
        let first = controller.admit("a", TaskKind::Article, "a").unwrap();
        let second = controller.admit("b", TaskKind::Article, "b").unwrap();

        let permit = controller.acquire(&first).await.unwrap();
        assert_eq!(controller.available_permits(), 0);

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                let permit = controller.acquire(&second).await;
                (permit.is_some(), second)
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(permit);
        let (got, _second) = waiter.await.unwrap();
        assert!(got);
    }

    #[test]
    fn test_waiter_woken_when_permit_returns() {
        let controller = AdmissionController::with_capacity(1);
        let first = controller.admit("a", TaskKind::Article, "a").unwrap();
        let second = controller.admit("b", TaskKind::Image, "a").unwrap();
        let permit = tokio_test::block_on(controller.acquire(&first)).unwrap();

        let mut waiting = tokio_test::task::spawn(controller.acquire(&second));
        tokio_test::assert_pending!(waiting.poll());

        drop(permit);
        assert!(waiting.is_woken());
        assert!(tokio_test::assert_ready!(waiting.poll()).is_some());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_permit() {
        let controller = AdmissionController::with_capacity(1);
        let first = controller.admit("a", TaskKind::Article, "a").unwrap();
        let _permit = controller.acquire(&first).await.unwrap();

        let second = controller.admit("b", TaskKind::Article, "b").unwrap();
        let cancel = second.cancellation();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.acquire(&second).await.is_none() })
        };
        cancel.cancel();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_group_reaches_images_only_for_that_item() {
        let controller = AdmissionController::new();
        let article = controller.admit("a", TaskKind::Article, "a").unwrap();
        let image = controller.admit("a#1.png", TaskKind::Image, "a").unwrap();
        let other = controller.admit("b", TaskKind::Article, "b").unwrap();

        assert_eq!(controller.cancel_group("a"), 2);
        assert!(article.is_cancelled());
        assert!(image.is_cancelled());
        assert!(!other.is_cancelled());

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .wait_group_released("a", Duration::from_secs(5))
                    .await
            })
        };
        drop(article);
        drop(image);
        assert!(waiter.await.unwrap());
        assert!(controller.in_flight("b", TaskKind::Article));
    }

    #[tokio::test]
    async fn test_cancel_all_waits_for_release() {
        let controller = AdmissionController::new();
        let tokens: Vec<Token> = (0..3)
            .map(|i| {
                let key = format!("k{}", i);
                controller.admit(&key, TaskKind::Article, &key).unwrap()
            })
            .collect();

        let releaser = tokio::spawn(async move {
            for token in tokens {
                assert!(token.is_cancelled());
                tokio::time::sleep(Duration::from_millis(10)).await;
                drop(token);
            }
        });

        // Tokens are canceled synchronously, before the first await
        let report = controller.cancel_all(Duration::from_secs(5)).await;
        releaser.await.unwrap();
        assert_eq!(
            report,
            CancelReport {
                canceled: 3,
                drained: true
            }
        );
        assert!(controller.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_all_gives_up_after_grace() {
        let controller = AdmissionController::new();
        let stuck = controller.admit("stuck", TaskKind::Image, "x").unwrap();

        let report = controller.cancel_all(Duration::from_millis(20)).await;
        assert_eq!(report.canceled, 1);
        assert!(!report.drained);
        assert!(stuck.is_cancelled());

        // A fresh admission after the slot frees up is not canceled
        drop(stuck);
        let fresh = controller.admit("stuck", TaskKind::Image, "x").unwrap();
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_stale_release_does_not_free_new_slot() {
        let controller = AdmissionController::new();
        let first = controller.admit("a", TaskKind::Article, "a").unwrap();
        let (slot, id) = (first.slot.clone(), first.id);
        drop(first);

        let second = controller.admit("a", TaskKind::Article, "a").unwrap();
        controller.inner.release(&slot, id);
        assert!(controller.in_flight("a", TaskKind::Article));
        drop(second);

        let keys: HashSet<_> = controller.inner.slots().keys().cloned().collect();
        assert!(keys.is_empty());
    }
}
