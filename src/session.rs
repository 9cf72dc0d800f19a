//! Session protocol handler - one per connected customer
//!
//! Owns the connection from handshake to teardown: reads the customer
//! descriptor, feeds items into the pipeline (reclaiming orphans where
//! possible), then drives the request/response loop.
//!
//! # Single-writer outbound
//!
//! The socket's write half lives in a dedicated writer task that drains
//! an unbounded channel. The handler queues its responses there and the
//! brew workers queue `SERVER:` notifications through the customer
//! directory, so all outbound frames are serialized without any shared
//! lock on the socket.
//!
//! # State machine
//!
//! ```text
//! Unconnected ──▶ Connected ◀─────▶ Idle
//!                     │    collect / new order
//!                     ▼
//!                  Closed  (TERMINATE or transport failure)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core_types::CustomerId;
use crate::models::{Item, OrderTicket};
use crate::pipeline::{Cafe, OutboundSender};
use crate::protocol::{
    COLLECT_ORDER, COLLECT_ORDER_NOT_READY, COLLECT_ORDER_READY, CONNECTED, Frame, NEW_ORDER,
    NEW_ORDER_CONFIRMED, NEW_ORDER_READY, NO_ORDER_FOUND, ORDER_STATUS, ORDER_STATUS_CONFIRMED,
    ProtocolError, TERMINATE, TERMINATE_CONFIRMED,
};
use crate::reclaim::{self, RECLAIM_NOTICE};

/// Why a session ended, other than an orderly TERMINATE.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("expected a customer descriptor as the first frame")]
    HandshakeExpectedCustomer,

    #[error("customer id {0} is already connected")]
    DuplicateCustomer(CustomerId),

    #[error("invalid item in order: {0:?}")]
    InvalidItem(String),

    #[error("unexpected frame in request position")]
    UnexpectedFrame,

    #[error("session outbound channel closed")]
    Disconnected,
}

/// Protocol state after a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Items outstanding (or a fresh connection).
    Connected,
    /// Everything ordered has been collected.
    Idle,
}

/// Handle one customer connection to completion. Errors are logged here;
/// the acceptor does not care how a session ended.
pub async fn run_session(cafe: Arc<Cafe>, stream: TcpStream, peer: SocketAddr) {
    match drive(cafe, stream, peer).await {
        Ok(()) => {}
        Err(SessionError::Protocol(e)) if e.is_transport() => {
            tracing::warn!(%peer, error = %e, "session transport failed");
        }
        Err(e) => {
            tracing::warn!(%peer, error = %e, "session closed");
        }
    }
}

async fn drive(cafe: Arc<Cafe>, stream: TcpStream, peer: SocketAddr) -> Result<(), SessionError> {
    let (mut reader, writer) = stream.into_split();

    let customer = match Frame::read_from(&mut reader).await? {
        Frame::Customer(c) => c,
        _ => return Err(SessionError::HandshakeExpectedCustomer),
    };

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    if !cafe.directory.register(customer.id, &customer.name, outbound.clone()) {
        cafe.stats.incr_sessions_refused();
        return Err(SessionError::DuplicateCustomer(customer.id));
    }
    cafe.stats.incr_sessions_opened();
    tracing::info!(customer = customer.id, name = %customer.name, %peer, "customer connected");

    let writer_task = spawn_writer(writer, outbound_rx);
    let mut session = Session {
        cafe: cafe.clone(),
        id: customer.id,
        state: SessionState::Connected,
        outstanding: Vec::new(),
        outbound,
    };

    let result = session.serve(&mut reader, customer.items).await;

    // outstanding tickets stay in the pipeline; they are orphaned now
    // and later NEW_ORDERs may reclaim them from the tray
    cafe.directory.deregister(session.id);
    cafe.stats.incr_sessions_closed();
    tracing::info!(customer = session.id, "customer disconnected");

    drop(session);
    let _ = writer_task.await;
    result
}

/// Writer task: sole owner of the socket's write half.
fn spawn_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = frame.write_to(&mut writer).await {
                tracing::debug!(error = %e, "session writer stopped");
                break;
            }
        }
    })
}

struct Session {
    cafe: Arc<Cafe>,
    id: CustomerId,
    state: SessionState,
    /// Items this customer has ordered and not yet collected.
    /// Mutated only by this handler.
    outstanding: Vec<OrderTicket>,
    outbound: OutboundSender,
}

impl Session {
    fn send(&self, frame: Frame) -> Result<(), SessionError> {
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::Disconnected)
    }

    fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.send(Frame::text(text))
    }

    async fn serve(
        &mut self,
        reader: &mut OwnedReadHalf,
        initial_items: Vec<Item>,
    ) -> Result<(), SessionError> {
        self.send_text(CONNECTED)?;
        self.intake(initial_items)?;

        loop {
            match Frame::read_from(reader).await? {
                Frame::Text(token) => match token.as_str() {
                    ORDER_STATUS => self.handle_order_status()?,
                    COLLECT_ORDER => self.handle_collect()?,
                    NEW_ORDER => self.handle_new_order(reader).await?,
                    TERMINATE => {
                        self.send_text(TERMINATE_CONFIRMED)?;
                        return Ok(());
                    }
                    other => {
                        tracing::warn!(customer = self.id, request = other, "unknown request ignored");
                    }
                },
                frame => {
                    tracing::warn!(customer = self.id, ?frame, "unexpected frame, closing session");
                    return Err(SessionError::UnexpectedFrame);
                }
            }
        }
    }

    /// Feed a batch of items into the pipeline. Each item is first
    /// offered to reclamation; only misses are queued for brewing.
    fn intake(&mut self, items: Vec<Item>) -> Result<(), SessionError> {
        let mut reclaimed = 0usize;
        for item in items {
            if item.qty == 0 {
                return Err(SessionError::InvalidItem(item.to_string()));
            }
            self.cafe.stats.incr_items_ordered();
            match reclaim::try_reclaim(&self.cafe, self.id, item) {
                Some(ticket) => {
                    self.outstanding.push(ticket);
                    reclaimed += 1;
                }
                None => {
                    let ticket = self.cafe.new_ticket(self.id, item);
                    self.outstanding.push(ticket.clone());
                    self.cafe.waiting.enqueue(ticket);
                }
            }
        }
        if reclaimed > 0 {
            self.send_text(RECLAIM_NOTICE)?;
        }
        Ok(())
    }

    fn handle_order_status(&self) -> Result<(), SessionError> {
        self.send_text(ORDER_STATUS_CONFIRMED)?;
        let report = if self.state == SessionState::Idle || self.outstanding.is_empty() {
            "You have no outstanding items.".to_string()
        } else {
            self.outstanding
                .iter()
                .map(|t| self.status_line(t))
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.send_text(&report)
    }

    /// One report line for one outstanding item. The tray is checked
    /// first: during the brewing-to-tray hand-off an item may be visible
    /// in both stages, and then it is ready.
    fn status_line(&self, ticket: &OrderTicket) -> String {
        let stage = if self.cafe.tray.contains(ticket.serial) {
            "READY"
        } else if self.cafe.brewing.contains(ticket.serial) {
            "BREWING"
        } else if self.cafe.waiting.contains(ticket.serial) {
            "WAITING"
        } else {
            return format!("{}: tracking error - not found in any stage", ticket.item);
        };
        format!("{}: {}", ticket.item, stage)
    }

    /// All-or-nothing pickup of everything outstanding.
    fn handle_collect(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Idle || self.outstanding.is_empty() {
            return self.send_text(NO_ORDER_FOUND);
        }

        let serials: Vec<_> = self.outstanding.iter().map(|t| t.serial).collect();
        match self.cafe.tray.collect_all(&serials) {
            Some(collected) => {
                self.cafe.stats.add_items_collected(collected.len() as u64);
                self.outstanding.clear();
                self.state = SessionState::Idle;
                self.cafe.directory.mark_idle(self.id);
                tracing::info!(customer = self.id, count = collected.len(), "order collected");
                self.send_text(COLLECT_ORDER_READY)
            }
            None => self.send_text(COLLECT_ORDER_NOT_READY),
        }
    }

    async fn handle_new_order(&mut self, reader: &mut OwnedReadHalf) -> Result<(), SessionError> {
        self.send_text(NEW_ORDER_READY)?;
        let items = match Frame::read_from(reader).await? {
            Frame::Items(items) => items,
            _ => return Err(SessionError::UnexpectedFrame),
        };

        self.state = SessionState::Connected;
        self.cafe.directory.clear_idle(self.id);
        self.intake(items)?;
        self.send_text(NEW_ORDER_CONFIRMED)
    }
}

// ============================================================
// TESTS
// ============================================================
