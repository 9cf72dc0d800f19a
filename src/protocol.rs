//! Wire protocol: self-describing length-prefixed frames
//!
//! A session is one bidirectional byte stream carrying a sequence of
//! frames. Integers are big-endian (network byte order).
//!
//! ```text
//! +------+----------------+----------------+
//! | kind |  len (u32 BE)  |  payload[len]  |
//! +------+----------------+----------------+
//! ```
//!
//! Three kinds exist: a UTF-8 text token, a customer descriptor, and an
//! item list. Structured payloads are JSON. A reader can always tell what
//! it received from the kind byte, which is what lets asynchronous
//! `SERVER:` notifications share the channel with request/response text.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::{Customer, Item};

/// Upper bound on a single frame payload. Anything larger is a protocol
/// fault, not a legitimate order.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const KIND_TEXT: u8 = 0x01;
const KIND_CUSTOMER: u8 = 0x02;
const KIND_ITEMS: u8 = 0x03;

// ============================================================
// MESSAGE CATALOG
// ============================================================

pub const CONNECTED: &str = "CONNECTED";
pub const ORDER_STATUS: &str = "ORDER_STATUS";
pub const ORDER_STATUS_CONFIRMED: &str = "ORDER_STATUS_CONFIRMED";
pub const COLLECT_ORDER: &str = "COLLECT_ORDER";
pub const COLLECT_ORDER_READY: &str = "COLLECT_ORDER_READY";
pub const COLLECT_ORDER_NOT_READY: &str = "COLLECT_ORDER_NOT_READY";
pub const NO_ORDER_FOUND: &str = "NO_ORDER_FOUND";
pub const NEW_ORDER: &str = "NEW_ORDER";
pub const NEW_ORDER_READY: &str = "NEW_ORDER_READY";
pub const NEW_ORDER_CONFIRMED: &str = "NEW_ORDER_CONFIRMED";
pub const TERMINATE: &str = "TERMINATE";
pub const TERMINATE_CONFIRMED: &str = "TERMINATE_CONFIRMED";

/// Prefix of every server-originated asynchronous notification.
pub const NOTIFICATION_PREFIX: &str = "SERVER: ";

/// Protocol-level failure on a session stream.
///
/// `Io` is a transport fault; everything else is a malformed or hostile
/// peer. Both tear the session down, but they are logged differently.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown frame kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(usize),

    #[error("text frame is not valid utf-8")]
    InvalidText(#[from] std::string::FromUtf8Error),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether this failure came from the transport rather than the
    /// peer's framing.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

// ============================================================
// FRAME
// ============================================================

/// One message on the wire, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Request tokens, responses, status blobs, and `SERVER:` notices.
    Text(String),
    /// First client message of a session.
    Customer(Customer),
    /// Item list following a `NEW_ORDER` token.
    Items(Vec<Item>),
}

impl Frame {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Whether this is a server-originated asynchronous notification.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Text(t) if t.starts_with(NOTIFICATION_PREFIX))
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Text(_) => KIND_TEXT,
            Self::Customer(_) => KIND_CUSTOMER,
            Self::Items(_) => KIND_ITEMS,
        }
    }

    /// Read one frame off the stream. Blocks until a full frame arrives.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let kind = reader.read_u8().await?;
        let len = reader.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::Oversized(len));
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        match kind {
            KIND_TEXT => Ok(Self::Text(String::from_utf8(payload)?)),
            KIND_CUSTOMER => Ok(Self::Customer(serde_json::from_slice(&payload)?)),
            KIND_ITEMS => Ok(Self::Items(serde_json::from_slice(&payload)?)),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    /// Write this frame and flush it.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let payload = match self {
            Self::Text(t) => t.as_bytes().to_vec(),
            Self::Customer(c) => serde_json::to_vec(c)?,
            Self::Items(items) => serde_json::to_vec(items)?,
        };
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::Oversized(payload.len()));
        }

        writer.write_u8(self.kind()).await?;
        writer.write_u32(payload.len() as u32).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

// ============================================================
// TESTS
// ============================================================
