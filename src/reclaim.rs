//! Reclamation of orphaned tray tickets
//!
//! When a customer disconnects without collecting, their finished items
//! stay on the tray with no owner to hand them to. An incoming order of
//! the same category is served straight from the tray instead of brewing
//! a fresh one: the orphaned ticket is re-issued under the new owner and
//! the incoming item never enters the waiting queue.

use crate::core_types::CustomerId;
use crate::models::{Item, OrderTicket};
use crate::pipeline::Cafe;

/// Notification sent once per order batch when at least one item was
/// fulfilled by reclamation.
pub const RECLAIM_NOTICE: &str = "SERVER: That was fast! We have your order complete :)";

/// Try to fulfill `item` for `new_owner` from an orphaned tray ticket.
///
/// A match is any tray ticket of the same category whose owner is no
/// longer active; the re-issued ticket carries the orphan's own
/// category and quantity. On success it is already on the tray and is
/// returned so the session can track it as outstanding; `None` means
/// the caller should enqueue the item for brewing as usual.
pub fn try_reclaim(cafe: &Cafe, new_owner: CustomerId, item: Item) -> Option<OrderTicket> {
    let orphan = cafe.tray.take_if(|t| {
        t.item.category == item.category && !cafe.directory.is_active(t.owner)
    })?;

    let reissued = cafe.new_ticket(new_owner, orphan.item);
    tracing::info!(
        from = orphan.owner,
        to = new_owner,
        item = %reissued.item,
        "reclaimed orphaned order"
    );
    cafe.tray.enqueue(reissued.clone());
    cafe.stats.incr_items_reclaimed();
    Some(reissued)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::Category;
    use tokio::sync::mpsc;

    fn cafe_with_tray_ticket(owner: CustomerId, item: Item) -> Cafe {
        let cafe = Cafe::new(AppConfig::default());
        let ticket = cafe.new_ticket(owner, item);
        cafe.tray.enqueue(ticket);
        cafe
    }

    #[test]
    fn test_reclaims_orphaned_match() {
        let item = Item::new(1, Category::Coffee);
        let cafe = cafe_with_tray_ticket(1, item);

        let reissued = try_reclaim(&cafe, 2, item).unwrap();
        assert_eq!(reissued.owner, 2);
        assert_eq!(reissued.item, item);
        // still exactly one ticket on the tray, now owned by 2
        assert_eq!(cafe.tray.len(), 1);
        assert!(cafe.tray.contains(reissued.serial));
        assert_eq!(cafe.stats.snapshot().items_reclaimed, 1);
    }

    #[test]
    fn test_does_not_touch_active_owners() {
        let item = Item::new(1, Category::Coffee);
        let cafe = cafe_with_tray_ticket(1, item);
        let (tx, _rx) = mpsc::unbounded_channel();
        cafe.directory.register(1, "still-here", tx);

        assert!(try_reclaim(&cafe, 2, item).is_none());
        assert_eq!(cafe.tray.len(), 1);
    }

    #[test]
    fn test_matches_on_category_alone() {
        let cafe = cafe_with_tray_ticket(1, Item::new(2, Category::Coffee));

        assert!(try_reclaim(&cafe, 2, Item::new(2, Category::Tea)).is_none());

        // quantities need not line up; the reissued ticket keeps the
        // orphan's own item
        let reissued = try_reclaim(&cafe, 2, Item::new(1, Category::Coffee)).unwrap();
        assert_eq!(reissued.item, Item::new(2, Category::Coffee));
        assert_eq!(reissued.owner, 2);
    }
}
