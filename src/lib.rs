//! # stash
//!
//! Keeps a saved reading list available offline.
//!
//! ## Architecture
//!
//! ```text
//! SavedList ─► Reconciler ─► AdmissionController ─► Fetchers ─► Stores
//!                                  │
//!                                  └─► progress / per-item reports
//! ```
//!
//! When an article is saved, the [`sync::SyncEngine`] downloads it and every
//! image it references. When it is removed, in-flight work for it is canceled
//! and its cached data purged. A catch-up pass downloads whatever is still
//! missing.
//!
//! ## Quick Start
//!
//! ```bash
//! # Save an article
//! stash save https://en.wikipedia.org/wiki/Rust_(programming_language)
//!
//! # Download everything not yet offline
//! stash sync
//!
//! # Keep downloading as articles are saved
//! stash watch
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetchers and sync engine.
pub mod app;

/// Command-line interface using clap.
///
/// - `save <url> [--title]` - Save an article
/// - `remove <url>` - Remove an article and its cached data
/// - `list` - List saved articles
/// - `sync` - One catch-up pass
/// - `watch` - Observe the saved list until Ctrl-C
pub mod cli;

/// Configuration loaded from `~/.config/stash/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`SavedItem`](domain::SavedItem): one entry of the reading list
/// - [`ArticleContent`](domain::ArticleContent): cached article HTML
/// - [`ImageRef`](domain::ImageRef): an image belonging to a saved item
pub mod domain;

/// Article and image fetching.
///
/// - [`ArticleFetcher`](fetcher::ArticleFetcher) / [`ImageCache`](fetcher::ImageCache): async traits
/// - [`HttpArticleFetcher`](fetcher::HttpArticleFetcher): reqwest-based implementation
/// - [`FsImageCache`](fetcher::FsImageCache): filesystem image cache
/// - [`ImageExtractor`](fetcher::ImageExtractor): image URLs from article HTML
pub mod fetcher;

/// SQLite persistence for the saved list and cached articles.
pub mod store;

/// Offline synchronization engine.
pub mod sync;
