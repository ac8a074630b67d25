//! Request/response transactions
//!
//! A transaction is one request frame, optionally waiting for a reply whose
//! first payload byte is one of a set of accepted response codes.

use std::fmt;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{
    Address, Bus, Frame, ProtocolError, TransactionError, DEFAULT_LOCAL_ADDRESS,
    DEFAULT_REMOTE_ADDRESS, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS, NOT_ACKNOWLEDGED,
};

/// Engine-wide defaults applied to transactions that do not override them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSettings {
    /// Address requests are sent with
    pub address: Address,
    /// How long each attempt waits for a reply
    pub timeout: Duration,
    /// Attempts before giving up with [`TransactionError::NoResponse`]
    pub retries: u32,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            address: Address::new(DEFAULT_LOCAL_ADDRESS, DEFAULT_REMOTE_ADDRESS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
        }
    }
}

/// One logical request on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    payload: Vec<u8>,
    accept: Option<Vec<u8>>,
    address: Option<Address>,
    timeout: Option<Duration>,
    retries: Option<u32>,
}

impl Transaction {
    /// A request that is written once and not answered
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            accept: None,
            address: None,
            timeout: None,
            retries: None,
        }
    }

    /// A request expecting a reply starting with one of `accept`
    pub fn request(payload: impl Into<Vec<u8>>, accept: &[u8]) -> Self {
        Self::new(payload).expecting(accept)
    }

    /// Set the accepted response codes
    pub fn expecting(mut self, accept: &[u8]) -> Self {
        self.accept = Some(accept.to_vec());
        self
    }

    /// Send with an explicit address instead of the engine default
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Override the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the number of attempts
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Request payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Accepted response codes, if a reply is expected
    pub fn accepted(&self) -> Option<&[u8]> {
        self.accept.as_deref()
    }

    /// Whether [`execute`](Self::execute) waits for a reply
    pub fn expects_response(&self) -> bool {
        self.accept.is_some()
    }

    /// Run the exchange on the bus.
    ///
    /// Returns `Ok(None)` for requests that expect no reply. Otherwise each
    /// attempt writes the request and waits for a frame addressed back to
    /// us; frames from other senders are skipped. A `0x7f` reply or an
    /// unaccepted response code fails immediately without further attempts.
    pub async fn execute(
        &self,
        bus: &mut Bus,
        defaults: &TransactionSettings,
        cancel: &CancellationToken,
    ) -> Result<Option<Frame>, ProtocolError> {
        let address = self.address.unwrap_or(defaults.address);
        let request = Frame::new(address, self.payload.clone());

        let Some(accept) = self.accept.as_deref() else {
            send_unless_cancelled(bus, request, cancel).await?;
            return Ok(None);
        };

        let timeout = self.timeout.unwrap_or(defaults.timeout);
        let attempts = self.retries.unwrap_or(defaults.retries);
        let reply_address = address.inverse();

        for attempt in 1..=attempts {
            let stale = bus.drain_stale();
            if stale > 0 {
                debug!("Transaction: dropped {} stale frame(s) before {}", stale, self);
            }

            send_unless_cancelled(bus, request.clone(), cancel).await?;
            let deadline = Instant::now() + timeout;

            loop {
                let received = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProtocolError::Cancelled),
                    result = time::timeout_at(deadline, bus.recv()) => result,
                };

                let frame = match received {
                    Ok(frame) => frame?,
                    Err(_) => {
                        warn!(
                            "Transaction: no reply to {} (attempt {}/{})",
                            self, attempt, attempts
                        );
                        break;
                    }
                };

                if frame.address != reply_address {
                    debug!("Transaction: ignoring frame from {}", frame.address);
                    continue;
                }

                return check_reply(frame, accept).map(Some).map_err(|e| {
                    error!("Transaction: {}: {}", self, e);
                    e.into()
                });
            }
        }

        error!("Transaction: {}: no response after {} attempt(s)", self, attempts);
        Err(TransactionError::NoResponse.into())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "]")?;
        if let Some(accept) = &self.accept {
            write!(f, " ->")?;
            for code in accept {
                write!(f, " {:02x}", code)?;
            }
        }
        Ok(())
    }
}

/// Write `frame` unless `cancel` has already fired.
///
/// A write that has started always runs to completion; dropping it half way
/// would leave a partial frame in the sink ahead of the next request.
async fn send_unless_cancelled(
    bus: &mut Bus,
    frame: Frame,
    cancel: &CancellationToken,
) -> Result<(), ProtocolError> {
    if cancel.is_cancelled() {
        return Err(ProtocolError::Cancelled);
    }
    bus.send(frame).await
}

fn check_reply(frame: Frame, accept: &[u8]) -> Result<Frame, TransactionError> {
    match frame.code() {
        Some(NOT_ACKNOWLEDGED) => Err(TransactionError::NotAcknowledged),
        Some(code) if accept.contains(&code) => Ok(frame),
        Some(code) => Err(TransactionError::UnrecognizedResponse(code)),
        None => Err(TransactionError::EmptyResponse),
    }
}
