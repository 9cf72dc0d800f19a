//! Brew worker pool
//!
//! A fixed pool of worker tasks polls the job queue the scheduler feeds.
//! One job = one item instance: wait out the brew duration, move the
//! item to the tray, free the capacity slot, and tell the owner. The
//! scheduler already marked the item brewing at dispatch; the tray
//! enqueue happens before the brewing removal so no observer ever sees
//! an item in neither stage. A job that faults is logged and its ticket
//! dropped - never trayed or requeued - and the capacity slot is still
//! released.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::models::OrderTicket;
use crate::pipeline::Cafe;
use crate::protocol::Frame;

/// A brew job that cannot be completed.
#[derive(Debug, Error)]
pub enum BrewError {
    /// The item left the brewing stage mid-brew, so the finished drink
    /// has no pipeline entry to hand over.
    #[error("item {0} left the brewing stage mid-brew")]
    Untracked(String),
}

/// Job queue poll interval while a worker is free.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn the worker pool. Handles are returned so the binary can abandon
/// in-flight brews at shutdown.
pub fn spawn_brewers(
    cafe: Arc<Cafe>,
    jobs: Arc<ArrayQueue<OrderTicket>>,
) -> Vec<JoinHandle<()>> {
    (0..cafe.config.brew.workers)
        .map(|worker| tokio::spawn(run_brewer(worker, cafe.clone(), jobs.clone())))
        .collect()
}

/// One worker: poll for jobs until shutdown and the queue is drained.
async fn run_brewer(worker: usize, cafe: Arc<Cafe>, jobs: Arc<ArrayQueue<OrderTicket>>) {
    let mut tick = interval(POLL_INTERVAL);
    tracing::debug!(worker, "brewer started");

    loop {
        tick.tick().await;

        while let Some(ticket) = jobs.pop() {
            brew_one(worker, &cafe, ticket).await;
        }

        if cafe.shutdown.is_shutdown_requested() && jobs.is_empty() {
            break;
        }
    }

    tracing::debug!(worker, "brewer stopped");
}

/// Execute a single brew job. The scheduler reserved the capacity slot
/// and marked the item brewing; both are cleared here on every path.
async fn brew_one(worker: usize, cafe: &Cafe, ticket: OrderTicket) {
    let category = ticket.item.category;

    cafe.stats.incr_brews_started();
    tracing::info!(worker, owner = ticket.owner, item = %ticket.item, "brew started");

    match perform_brew(cafe, &ticket).await {
        Ok(()) => finish_brew(worker, cafe, ticket),
        Err(e) => {
            // the ticket is dropped, the capacity slot never is
            cafe.brewing.remove(ticket.serial);
            cafe.capacity.release(category);
            cafe.stats.incr_brews_faulted();
            tracing::error!(
                worker,
                owner = ticket.owner,
                item = %ticket.item,
                error = %e,
                "brew failed, ticket dropped"
            );
        }
    }
}

/// The brew itself: wait out the duration, then confirm the item is
/// still tracked as brewing before handing the result over.
async fn perform_brew(cafe: &Cafe, ticket: &OrderTicket) -> Result<(), BrewError> {
    sleep(cafe.brew_duration(ticket.item.category)).await;
    if !cafe.brewing.contains(ticket.serial) {
        return Err(BrewError::Untracked(ticket.key()));
    }
    Ok(())
}

/// Completion hand-off for a successful brew.
fn finish_brew(worker: usize, cafe: &Cafe, ticket: OrderTicket) {
    let category = ticket.item.category;
    let owner = ticket.owner;
    let description = ticket.item.to_string();

    // tray before brewing-removal: the item must never be in neither
    cafe.tray.enqueue(ticket.clone());
    cafe.brewing.remove(ticket.serial);
    cafe.capacity.release(category);
    cafe.stats.incr_brews_completed();
    tracing::info!(worker, owner, item = %description, "brew completed");

    let notice = Frame::text(format!("SERVER: Your {} is ready for pickup!", description));
    if cafe.directory.notify(owner, notice) {
        cafe.stats.incr_notifications_sent();
    } else {
        // owner is gone; the ticket stays on the tray for reclamation
        cafe.stats.incr_notifications_dropped();
        tracing::debug!(owner, item = %description, "ready notification dropped");
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{Category, Item};
    use tokio::sync::mpsc;

    fn test_cafe(tea_ms: u64) -> Arc<Cafe> {
        let mut config = AppConfig::default();
        config.brew.workers = 2;
        config.brew.tea_brew_ms = tea_ms;
        config.brew.coffee_brew_ms = tea_ms;
        Arc::new(Cafe::new(config))
    }

    #[tokio::test]
    async fn test_brew_moves_ticket_to_tray_and_notifies() {
        let cafe = test_cafe(20);
        let jobs = Arc::new(ArrayQueue::new(8));
        let handles = spawn_brewers(cafe.clone(), jobs.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        cafe.directory.register(1, "Ada", tx);

        let ticket = cafe.new_ticket(1, Item::new(1, Category::Tea));
        let serial = ticket.serial;
        // mirror the scheduler's dispatch contract
        assert!(cafe.capacity.try_reserve(Category::Tea));
        cafe.brewing.insert(serial, Category::Tea);
        jobs.push(ticket).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cafe.tray.contains(serial));
        assert!(!cafe.brewing.contains(serial));
        assert_eq!(cafe.capacity.in_use(Category::Tea), 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::text("SERVER: Your 1 tea is ready for pickup!")
        );
        assert_eq!(cafe.stats.snapshot().brews_completed, 1);

        cafe.shutdown.request_shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_faulted_brew_drops_ticket_and_restores_capacity() {
        let cafe = test_cafe(60);
        let jobs = Arc::new(ArrayQueue::new(8));
        let handles = spawn_brewers(cafe.clone(), jobs.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        cafe.directory.register(1, "Ada", tx);

        let ticket = cafe.new_ticket(1, Item::new(1, Category::Tea));
        let serial = ticket.serial;
        assert!(cafe.capacity.try_reserve(Category::Tea));
        cafe.brewing.insert(serial, Category::Tea);
        jobs.push(ticket).unwrap();

        // yank the item out of the brewing stage mid-brew; the job must
        // fault when its timer fires
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cafe.brewing.remove(serial).is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;

        // ticket dropped: not trayed, not requeued, slot released
        assert!(!cafe.tray.contains(serial));
        assert!(cafe.waiting.is_empty());
        assert_eq!(cafe.capacity.in_use(Category::Tea), 0);
        let stats = cafe.stats.snapshot();
        assert_eq!(stats.brews_faulted, 1);
        assert_eq!(stats.brews_completed, 0);
        assert!(
            rx.try_recv().is_err(),
            "no ready notification for a faulted brew"
        );

        cafe.shutdown.request_shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_notification_dropped_for_disconnected_owner() {
        let cafe = test_cafe(10);
        let jobs = Arc::new(ArrayQueue::new(8));
        let handles = spawn_brewers(cafe.clone(), jobs.clone());

        let ticket = cafe.new_ticket(42, Item::new(1, Category::Coffee));
        let serial = ticket.serial;
        assert!(cafe.capacity.try_reserve(Category::Coffee));
        cafe.brewing.insert(serial, Category::Coffee);
        jobs.push(ticket).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // no session registered: ticket on the tray, notification dropped
        assert!(cafe.tray.contains(serial));
        assert_eq!(cafe.stats.snapshot().notifications_dropped, 1);
        assert_eq!(cafe.capacity.in_use(Category::Coffee), 0);

        cafe.shutdown.request_shutdown();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
