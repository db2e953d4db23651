pub mod admission;
pub mod config;
pub mod engine;
pub mod handle;
pub mod item;
pub mod progress;
pub mod reconcile;

use thiserror::Error;
use tokio::sync::mpsc;

pub use admission::{AdmissionController, CancelReport, Token, MAX_CONCURRENT_FETCHES};
pub use config::SyncConfig;
pub use engine::{Collaborators, SyncEngine};
pub use handle::FetchHandle;
pub use item::{ItemDownload, ItemOutcome, ItemPhase, ItemReport};
pub use progress::ProgressAggregator;
pub use reconcile::{Delta, Reconciler};

/// Classification of engine outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Fetch already in flight")]
    AlreadyInFlight,

    #[error("Article fetch failed: {0}")]
    ArticleFetchFailed(String),

    #[error("One or more images failed to download ({failed} of {total})")]
    ImageFetchFailed { failed: usize, total: usize },

    #[error("Download canceled")]
    Canceled,

    #[error("Invalid transition for {key}: {event} while {phase:?}")]
    InvalidTransition {
        key: String,
        phase: ItemPhase,
        event: &'static str,
    },
}

/// Receiving end of the per-item report channel. There is exactly one per
/// engine, handed out at construction.
#[derive(Debug)]
pub struct ItemReports {
    rx: mpsc::UnboundedReceiver<ItemReport>,
}

impl ItemReports {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<ItemReport>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next report; `None` once the engine is dropped and the queue drained
    pub async fn recv(&mut self) -> Option<ItemReport> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ItemReport> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<ItemReport> {
        let mut reports = Vec::new();
        while let Some(report) = self.try_recv() {
            reports.push(report);
        }
        reports
    }
}
