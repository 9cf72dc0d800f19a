//! Core types used throughout the system
//!
//! Fundamental type aliases shared by all modules. They carry semantic
//! meaning and leave room for future type evolution.

/// Customer ID - chosen by the client at connect time.
///
/// # Constraints:
/// - Assumed unique across currently connected sessions; a second session
///   presenting an id that is already active is refused at handshake.
/// - Primary key for the active/idle registries.
pub type CustomerId = u64;

/// Ticket serial - process-wide monotonic identifier for one item instance.
///
/// Two identical items ordered by the same customer get distinct serials,
/// so every entry moving through waiting/brewing/tray is a distinct entity.
pub type TicketSerial = u64;
