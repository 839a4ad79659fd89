//! ccTalk wire protocol
//!
//! Framing, serial transport and the link-level request/response cycle.
//!
//! The link is half duplex: every byte the host transmits is echoed back on
//! the receive line, so the transport strips its own transmission before a
//! reply is interpreted. Only the plain 8-bit zero-sum checksum variant is
//! supported; DES encryption and 16-bit CRC links are refused up front.

pub mod commands;
mod error;
pub mod frame;
pub mod link;
pub mod serial;
pub mod transport;

pub use commands::Header;
pub use error::ProtocolError;
pub use frame::Frame;
pub use link::{LinkController, Reply};
pub use serial::{list_ports, PortInfo, PortLink, SerialLink};
pub use transport::{spawn_worker, Request, Transport, TransportEvent, WorkerCommand};

/// ccTalk default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Fixed ccTalk address of the bus master (this host).
pub const HOST_ADDRESS: u8 = 1;

/// Destination address 0 is a broadcast; the driver never uses it.
pub const BROADCAST_ADDRESS: u8 = 0;

/// Default timeout for the first byte of a response.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1500;

/// Quiet window after which a partially received response is considered
/// complete. The ccTalk specification recommends 50 ms between bytes.
pub const INTER_BYTE_TIMEOUT_MS: u64 = 50;

/// Maximum ccTalk payload length (the length field is one byte).
pub const MAX_PAYLOAD: usize = 255;
