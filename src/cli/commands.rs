use url::Url;

use crate::app::{AppContext, Result, StashError};
use crate::domain::{CachedState, SavedItem};
use crate::fetcher::ImageCache;
use crate::store::CacheStore;
use crate::sync::ItemReport;

pub fn save_item(ctx: &AppContext, url: &str, title: Option<String>) -> Result<()> {
    let key = Url::parse(url)?.to_string();
    let mut item = SavedItem::new(key.clone());
    item.title = title;

    if ctx.store.save(&item)? {
        println!("Saved: {}", key);
    } else {
        println!("Already saved: {}", key);
    }
    Ok(())
}

pub async fn remove_item(ctx: &AppContext, url: &str) -> Result<()> {
    let key = Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string());
    let key = ctx
        .store
        .get_saved_item(&key)?
        .map(|item| item.key)
        .ok_or_else(|| StashError::ItemNotFound(url.to_string()))?;

    ctx.store.unsave(&key)?;
    ctx.store.delete(&key)?;
    ctx.images.remove_images(&key).await?;
    println!("Removed: {}", key);
    Ok(())
}

pub fn list_items(ctx: &AppContext) -> Result<()> {
    let items = ctx.store.get_saved_items()?;

    if items.is_empty() {
        println!("No saved articles");
        return Ok(());
    }

    for item in items {
        let marker = match item.cached_state {
            CachedState::Complete => "●",
            CachedState::Partial => "◐",
            CachedState::Failed => "✗",
            CachedState::Unknown => "○",
        };
        println!(
            "{} {} {}\n  {}",
            marker,
            item.saved_at.format("%Y-%m-%d"),
            item.display_title(),
            item.key
        );
    }

    Ok(())
}

fn print_report(report: &ItemReport) {
    match (&report.error, report.success) {
        (None, _) => println!("  ✓ {}", report.key),
        (Some(e), true) => println!("  ◐ {} ({})", report.key, e),
        (Some(e), false) => eprintln!("  ✗ {} ({})", report.key, e),
    }
}

/// One catch-up pass. Ctrl-C cancels whatever is still downloading.
pub async fn sync_items(ctx: &mut AppContext) -> Result<()> {
    let started = ctx.engine.download_all_uncached_data()?;
    if started == 0 {
        println!("Everything is available offline");
        return Ok(());
    }
    println!("Downloading {} articles...", started);

    let progress = ctx.engine.get_progress(|value| {
        tracing::debug!("Sync progress {:.0}%", value * 100.0);
    });

    let mut done = 0;
    let mut incomplete = 0;
    while done < started {
        tokio::select! {
            report = ctx.reports.recv() => {
                let Some(report) = report else { break };
                print_report(&report);
                if !report.is_clean() {
                    incomplete += 1;
                }
                done += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                let report = ctx.engine.cancel_all_downloads().await;
                println!("Canceled {} downloads", report.canceled);
                break;
            }
        }
    }
    progress.abort();

    if incomplete > 0 {
        println!(
            "Sync complete: {} of {} articles could not be fully downloaded",
            incomplete, done
        );
    } else {
        println!("Sync complete: {} articles available offline", done);
    }
    Ok(())
}

/// Observe the saved list and download new saves until Ctrl-C.
pub async fn watch_items(ctx: &mut AppContext) -> Result<()> {
    ctx.engine.start();
    let started = ctx.engine.download_all_uncached_data()?;
    println!(
        "Watching for saved articles ({} queued, Ctrl-C to stop)",
        started
    );

    loop {
        tokio::select! {
            report = ctx.reports.recv() => {
                let Some(report) = report else { break };
                print_report(&report);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ctx.engine.stop();
    let report = ctx.engine.cancel_all_downloads().await;
    if !report.drained {
        eprintln!("Some downloads did not stop in time");
    }
    println!("Stopped ({} downloads canceled)", report.canceled);
    Ok(())
}
