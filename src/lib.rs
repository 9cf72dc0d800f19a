//! brewline - a multi-client cafe fulfillment server
//!
//! Customers connect over TCP, place orders of teas and coffees, and get
//! told asynchronously when their items are ready for pickup. Items move
//! through a three-stage pipeline (waiting, brewing, tray) driven by a
//! capacity-aware scheduler and a bounded brew worker pool.
//!
//! # Modules
//!
//! - [`core_types`] - Fundamental type aliases (CustomerId, TicketSerial)
//! - [`config`] - YAML application configuration
//! - [`models`] - Categories, items, customers, order tickets
//! - [`protocol`] - Length-prefixed frame codec and the message catalog
//! - [`pipeline`] - Shared stages, capacity gauge, registries, stats
//! - [`session`] - Per-customer protocol handler
//! - [`scheduler`] - Capacity-gated dispatch out of the waiting queue
//! - [`brewer`] - Brew worker pool
//! - [`reclaim`] - Reassignment of orphaned tray tickets
//! - [`acceptor`] - TCP listener and bounded session pool
//! - [`logging`] - tracing subscriber setup

// Core types - must be first!
pub mod core_types;

// Configuration
pub mod config;

// Server components
pub mod acceptor;
pub mod brewer;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod protocol;
pub mod reclaim;
pub mod scheduler;
pub mod session;

// Convenient re-exports at crate root
pub use acceptor::CafeServer;
pub use config::AppConfig;
pub use core_types::{CustomerId, TicketSerial};
pub use models::{Category, Customer, Item, OrderTicket};
pub use pipeline::{Cafe, CafeStats, CafeStatsSnapshot, ShutdownSignal};
pub use protocol::Frame;
