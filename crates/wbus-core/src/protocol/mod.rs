//! W-Bus Protocol Engine
//!
//! Implements the framing, transport and transaction layers of the W-Bus
//! protocol spoken by auxiliary heaters over a single-wire K-line.
//!
//! Every byte written on the K-line is echoed back to the sender, so the
//! frame parser drops frames carrying our own outgoing address. All bus
//! access goes through a [`TransactionQueue`], which executes one
//! request/response exchange at a time.

pub mod codec;
mod connection;
mod error;
pub mod packet;
pub mod queue;
pub mod serial;
pub mod stream;
pub mod transaction;

pub use codec::WBusCodec;
pub use connection::{Bus, BusCounters, LinkState};
pub use error::{ProtocolError, TransactionError};
pub use packet::{checksum, Address, Frame, FrameParser, ParserStats};
pub use queue::TransactionQueue;
pub use serial::{list_ports, open_port, PortInfo};
pub use stream::{reset_line, BusLine};
pub use transaction::{Transaction, TransactionSettings};

/// W-Bus line speed (8 data bits, even parity, 1 stop bit)
pub const DEFAULT_BAUD_RATE: u32 = 2400;

/// Default per-attempt response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default number of attempts for a transaction that expects a reply
pub const DEFAULT_RETRIES: u32 = 5;

/// Default node id of this client on the bus
pub const DEFAULT_LOCAL_ADDRESS: u8 = 0xf;

/// Default node id of the heater controller
pub const DEFAULT_REMOTE_ADDRESS: u8 = 0x4;

/// Response code a controller sends when it rejects a request
pub const NOT_ACKNOWLEDGED: u8 = 0x7f;

/// Largest payload a single frame can carry (length byte minus checksum)
pub const MAX_PAYLOAD_SIZE: usize = 254;
