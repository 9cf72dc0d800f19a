//! Scheduler - sole consumer of the waiting queue
//!
//! Single loop: take the head of waiting, reserve a capacity slot for
//! its category, hand it to the brew workers. A saturated category sends
//! the head back to the tail and the loop sleeps a short interval, so
//! items of a free category behind it still get dispatched while FIFO
//! order within the saturated category is preserved.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::time::sleep;

use crate::models::OrderTicket;
use crate::pipeline::Cafe;

/// Capacity of the scheduler -> brewer job queue. Reservation caps the
/// number of in-flight jobs at the category ceilings, so this only needs
/// headroom, not depth.
pub const BREW_QUEUE_CAPACITY: usize = 64;

/// Run the dispatch loop until shutdown is requested.
pub async fn run_scheduler(cafe: Arc<Cafe>, jobs: Arc<ArrayQueue<OrderTicket>>) {
    let retry = cafe.config.brew.retry_interval();
    tracing::info!("scheduler started");

    loop {
        let ticket = tokio::select! {
            ticket = cafe.waiting.dequeue() => ticket,
            _ = cafe.shutdown.wait() => break,
        };

        let category = ticket.item.category;
        if !cafe.capacity.try_reserve(category) {
            tracing::debug!(item = %ticket.item, "category saturated, requeueing");
            cafe.waiting.enqueue(ticket);
            sleep(retry).await;
            continue;
        }

        // brewing membership begins at dispatch, in lockstep with the
        // capacity counter
        cafe.brewing.insert(ticket.serial, category);
        if let Err(ticket) = jobs.push(ticket) {
            // workers are backed up; undo and retry later
            cafe.brewing.remove(ticket.serial);
            cafe.capacity.release(category);
            cafe.waiting.enqueue(ticket);
            sleep(retry).await;
        }
    }

    tracing::info!("scheduler stopped");
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::{Category, Item};
    use std::time::Duration;

    fn test_cafe(capacity: usize) -> Arc<Cafe> {
        let mut config = AppConfig::default();
        config.brew.capacity_per_category = capacity;
        config.brew.retry_interval_ms = 5;
        Arc::new(Cafe::new(config))
    }

    #[tokio::test]
    async fn test_dispatches_up_to_capacity_and_requeues_rest() {
        let cafe = test_cafe(1);
        let jobs = Arc::new(ArrayQueue::new(BREW_QUEUE_CAPACITY));
        let scheduler = tokio::spawn(run_scheduler(cafe.clone(), jobs.clone()));

        cafe.waiting
            .enqueue(cafe.new_ticket(1, Item::new(1, Category::Tea)));
        cafe.waiting
            .enqueue(cafe.new_ticket(1, Item::new(1, Category::Tea)));
        cafe.waiting
            .enqueue(cafe.new_ticket(2, Item::new(1, Category::Coffee)));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // one tea and the coffee dispatched; the second tea keeps cycling
        assert_eq!(jobs.len(), 2);
        assert_eq!(cafe.waiting.len(), 1);
        assert_eq!(cafe.brewing.len(), 2);
        assert_eq!(cafe.capacity.in_use(Category::Tea), 1);
        assert_eq!(cafe.capacity.in_use(Category::Coffee), 1);

        // simulate a worker finishing the first tea; the slot frees and
        // the remaining tea goes through
        let done = jobs.pop().unwrap();
        assert_eq!(done.item.category, Category::Tea);
        cafe.brewing.remove(done.serial);
        cafe.capacity.release(Category::Tea);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(jobs.len(), 2);
        assert!(cafe.waiting.is_empty());
        assert_eq!(cafe.capacity.in_use(Category::Tea), 1);

        cafe.shutdown.request_shutdown();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_while_idle() {
        let cafe = test_cafe(2);
        let jobs = Arc::new(ArrayQueue::new(BREW_QUEUE_CAPACITY));
        let scheduler = tokio::spawn(run_scheduler(cafe.clone(), jobs));

        cafe.shutdown.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), scheduler)
            .await
            .expect("scheduler should observe shutdown")
            .unwrap();
    }
}
