//! Pipeline state - the cafe's shared stages, counters, and registries
//!
//! Every order item moves through three stages:
//!
//! ```text
//! ┌──────────┐    waiting     ┌───────────┐    brewing      ┌──────────┐
//! │ Session  │ ─────────────▶ │ Scheduler │ ──────────────▶ │  Brewer  │
//! │ handlers │   (FIFO)       │ (capacity │   (job queue)   │  workers │
//! └──────────┘                │  gate)    │                 └────┬─────┘
//!      ▲                      └───────────┘                      │ tray
//!      │          SERVER: ready notification                     ▼
//!      └─────────────────────────────────────────────────── ┌──────────┐
//!                        (customer directory)               │   Tray   │
//!                                                           └──────────┘
//! ```
//!
//! # Key design
//!
//! - **Single consumer of waiting**: only the scheduler dequeues.
//! - **Reservation before dispatch**: the scheduler reserves a capacity
//!   slot, the worker releases it on every exit path, so the per-category
//!   ceiling can never be overshot and a faulted brew cannot leak a slot.
//! - **No back-pointers**: tickets carry only the owner id; workers reach
//!   sessions through [`CustomerDirectory`], which may report the owner
//!   gone. An orphaned ticket simply stays on the tray for reclamation.
//! - No flow ever holds two stage locks at once.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, mpsc, watch};

use crate::config::AppConfig;
use crate::core_types::{CustomerId, TicketSerial};
use crate::models::{Category, Item, OrderTicket};
use crate::protocol::Frame;

/// Outbound frame channel of one session; the session's writer task is
/// the sole consumer, which is what serializes responses with
/// worker-originated notifications.
pub type OutboundSender = mpsc::UnboundedSender<Frame>;

// ============================================================
// WAITING STAGE
// ============================================================

/// FIFO queue of tickets not yet dispatched. Unbounded.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    inner: Mutex<VecDeque<OrderTicket>>,
    notify: Notify,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail. Also used by the scheduler to requeue the head
    /// of a saturated category, which preserves FIFO within that category.
    pub fn enqueue(&self, ticket: OrderTicket) {
        self.inner
            .lock()
            .expect("waiting queue lock poisoned")
            .push_back(ticket);
        self.notify.notify_one();
    }

    /// Remove and return the head, waiting until one exists.
    pub async fn dequeue(&self) -> OrderTicket {
        loop {
            if let Some(ticket) = self
                .inner
                .lock()
                .expect("waiting queue lock poisoned")
                .pop_front()
            {
                return ticket;
            }
            self.notify.notified().await;
        }
    }

    /// Best-effort membership test, used by the status report.
    pub fn contains(&self, serial: TicketSerial) -> bool {
        self.inner
            .lock()
            .expect("waiting queue lock poisoned")
            .iter()
            .any(|t| t.serial == serial)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("waiting queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================
// BREWING STAGE
// ============================================================

/// Concurrent map of items currently on a brewer. A present serial means
/// "brewing right now"; the category value exists for introspection.
#[derive(Debug, Default)]
pub struct BrewingBoard {
    inner: DashMap<TicketSerial, Category>,
}

impl BrewingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, serial: TicketSerial, category: Category) {
        self.inner.insert(serial, category);
    }

    pub fn remove(&self, serial: TicketSerial) -> Option<Category> {
        self.inner.remove(&serial).map(|(_, c)| c)
    }

    pub fn contains(&self, serial: TicketSerial) -> bool {
        self.inner.contains_key(&serial)
    }

    /// How many items of one category are brewing right now.
    pub fn count_for(&self, category: Category) -> usize {
        self.inner.iter().filter(|e| *e.value() == category).count()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// ============================================================
// TRAY STAGE
// ============================================================

/// FIFO queue of completed tickets awaiting pickup.
#[derive(Debug, Default)]
pub struct Tray {
    inner: Mutex<VecDeque<OrderTicket>>,
}

impl Tray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, ticket: OrderTicket) {
        self.inner
            .lock()
            .expect("tray lock poisoned")
            .push_back(ticket);
    }

    pub fn contains(&self, serial: TicketSerial) -> bool {
        self.inner
            .lock()
            .expect("tray lock poisoned")
            .iter()
            .any(|t| t.serial == serial)
    }

    /// All-or-nothing pickup: if every serial is present, remove and
    /// return them all; otherwise leave the tray untouched.
    pub fn collect_all(&self, serials: &[TicketSerial]) -> Option<Vec<OrderTicket>> {
        let mut tray = self.inner.lock().expect("tray lock poisoned");
        if !serials
            .iter()
            .all(|s| tray.iter().any(|t| t.serial == *s))
        {
            return None;
        }
        let mut collected = Vec::with_capacity(serials.len());
        for serial in serials {
            if let Some(pos) = tray.iter().position(|t| t.serial == *serial) {
                collected.extend(tray.remove(pos));
            }
        }
        Some(collected)
    }

    /// Remove and return the first ticket matching the predicate.
    pub fn take_if<F>(&self, pred: F) -> Option<OrderTicket>
    where
        F: Fn(&OrderTicket) -> bool,
    {
        let mut tray = self.inner.lock().expect("tray lock poisoned");
        let pos = tray.iter().position(|t| pred(t))?;
        tray.remove(pos)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("tray lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================
// CAPACITY
// ============================================================

/// Per-category brew slots with a hard ceiling.
///
/// Reserve happens in the scheduler before dispatch, release in the
/// worker after the brew leaves the brewing stage (or faults).
#[derive(Debug)]
pub struct CapacityGauge {
    slots: [AtomicUsize; 2],
    ceiling: usize,
}

impl CapacityGauge {
    pub fn new(ceiling: usize) -> Self {
        Self {
            slots: [AtomicUsize::new(0), AtomicUsize::new(0)],
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Try to claim one slot for the category. Never exceeds the ceiling.
    pub fn try_reserve(&self, category: Category) -> bool {
        let slot = &self.slots[category.index()];
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current >= self.ceiling {
                return false;
            }
            match slot.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn release(&self, category: Category) {
        let prev = self.slots[category.index()].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "capacity released without a reservation");
    }

    pub fn in_use(&self, category: Category) -> usize {
        self.slots[category.index()].load(Ordering::Acquire)
    }
}

// ============================================================
// CUSTOMER DIRECTORY
// ============================================================

struct ActiveSession {
    name: String,
    outbound: OutboundSender,
}

/// Registry of connected customers and the idle projection.
///
/// The outbound sender stored here is how brewers deliver `SERVER:`
/// notifications without holding any reference to the session itself.
#[derive(Default)]
pub struct CustomerDirectory {
    active: DashMap<CustomerId, ActiveSession>,
    idle: DashMap<CustomerId, String>,
    connected: AtomicUsize,
}

impl CustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected customer. Returns `false` if the id is
    /// already active; the first session keeps it.
    pub fn register(&self, id: CustomerId, name: &str, outbound: OutboundSender) -> bool {
        match self.active.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveSession {
                    name: name.to_string(),
                    outbound,
                });
                self.connected.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Drop a customer from both registries at session end.
    pub fn deregister(&self, id: CustomerId) {
        if self.active.remove(&id).is_some() {
            self.connected.fetch_sub(1, Ordering::Relaxed);
        }
        self.idle.remove(&id);
    }

    pub fn is_active(&self, id: CustomerId) -> bool {
        self.active.contains_key(&id)
    }

    /// Queue a frame on the customer's outbound channel. Returns `false`
    /// if the session is gone (or its writer already shut down); the
    /// frame is silently dropped in that case.
    pub fn notify(&self, id: CustomerId, frame: Frame) -> bool {
        match self.active.get(&id) {
            Some(session) => session.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Record that the customer owes nothing uncollected.
    pub fn mark_idle(&self, id: CustomerId) {
        if let Some(session) = self.active.get(&id) {
            self.idle.insert(id, session.name.clone());
        }
    }

    /// Clear the idle mark when a new order arrives.
    pub fn clear_idle(&self, id: CustomerId) {
        self.idle.remove(&id);
    }

    pub fn is_idle(&self, id: CustomerId) -> bool {
        self.idle.contains_key(&id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

// ============================================================
// STATISTICS
// ============================================================

/// Process-wide counters over the pipeline.
#[derive(Debug, Default)]
pub struct CafeStats {
    pub items_ordered: AtomicU64,
    pub brews_started: AtomicU64,
    pub brews_completed: AtomicU64,
    pub brews_faulted: AtomicU64,
    pub items_collected: AtomicU64,
    pub items_reclaimed: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notifications_dropped: AtomicU64,
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub sessions_refused: AtomicU64,
}

impl CafeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_items_ordered(&self) {
        self.items_ordered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_brews_started(&self) {
        self.brews_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_brews_completed(&self) {
        self.brews_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_brews_faulted(&self) {
        self.brews_faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_items_collected(&self, count: u64) {
        self.items_collected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn incr_items_reclaimed(&self) {
        self.items_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_notifications_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sessions_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sessions_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sessions_refused(&self) {
        self.sessions_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CafeStatsSnapshot {
        CafeStatsSnapshot {
            items_ordered: self.items_ordered.load(Ordering::Relaxed),
            brews_started: self.brews_started.load(Ordering::Relaxed),
            brews_completed: self.brews_completed.load(Ordering::Relaxed),
            brews_faulted: self.brews_faulted.load(Ordering::Relaxed),
            items_collected: self.items_collected.load(Ordering::Relaxed),
            items_reclaimed: self.items_reclaimed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            sessions_refused: self.sessions_refused.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone)]
pub struct CafeStatsSnapshot {
    pub items_ordered: u64,
    pub brews_started: u64,
    pub brews_completed: u64,
    pub brews_faulted: u64,
    pub items_collected: u64,
    pub items_reclaimed: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_refused: u64,
}

impl std::fmt::Display for CafeStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cafe Stats: ordered={}, brews={}/{} (faulted={}), collected={}, reclaimed={}, \
             notified={} (dropped={}), sessions={}/{} (refused={})",
            self.items_ordered,
            self.brews_completed,
            self.brews_started,
            self.brews_faulted,
            self.items_collected,
            self.items_reclaimed,
            self.notifications_sent,
            self.notifications_dropped,
            self.sessions_closed,
            self.sessions_opened,
            self.sessions_refused,
        )
    }
}

// ============================================================
// SHUTDOWN SIGNALING
// ============================================================

/// Shutdown flag observed by the scheduler and brewers at loop
/// boundaries.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow_and_update() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// CAFE - THE AGGREGATE
// ============================================================

/// Everything the flows share, behind one `Arc`.
pub struct Cafe {
    pub config: AppConfig,
    pub waiting: WaitingQueue,
    pub brewing: BrewingBoard,
    pub tray: Tray,
    pub capacity: CapacityGauge,
    pub directory: CustomerDirectory,
    pub stats: CafeStats,
    pub shutdown: ShutdownSignal,
    ticket_serial: AtomicU64,
}

impl Cafe {
    pub fn new(config: AppConfig) -> Self {
        let ceiling = config.brew.capacity_per_category;
        Self {
            config,
            waiting: WaitingQueue::new(),
            brewing: BrewingBoard::new(),
            tray: Tray::new(),
            capacity: CapacityGauge::new(ceiling),
            directory: CustomerDirectory::new(),
            stats: CafeStats::new(),
            shutdown: ShutdownSignal::new(),
            ticket_serial: AtomicU64::new(1),
        }
    }

    /// Mint a ticket for a fresh item instance.
    pub fn new_ticket(&self, owner: CustomerId, item: Item) -> OrderTicket {
        let serial = self.ticket_serial.fetch_add(1, Ordering::Relaxed);
        OrderTicket::new(owner, serial, item)
    }

    pub fn brew_duration(&self, category: Category) -> std::time::Duration {
        self.config.brew.brew_duration(category)
    }
}

// ============================================================
// TESTS
// ============================================================
