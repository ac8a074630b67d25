//! Raw request pass-through

use tracing::info;

use super::HeaterError;
use crate::protocol::{Transaction, TransactionQueue};

/// Send arbitrary payloads through the queue
#[derive(Clone)]
pub struct Raw {
    queue: TransactionQueue,
}

impl Raw {
    /// Raw access over `queue`
    pub fn new(queue: TransactionQueue) -> Self {
        Self { queue }
    }

    /// Send `payload`.
    ///
    /// With `expected` set, waits for a reply starting with one of those
    /// codes and returns its payload. Without it the request is written once
    /// and `Ok(None)` is returned.
    pub async fn raw(
        &self,
        payload: &[u8],
        expected: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, HeaterError> {
        info!("Raw: {:02x?}", payload);
        let mut transaction = Transaction::new(payload.to_vec());
        if let Some(accept) = expected {
            transaction = transaction.expecting(accept);
        }

        let reply = self.queue.submit(transaction).await?;
        match (expected, reply) {
            (Some(_), None) => Err(HeaterError::MalformedResponse(
                "expected a reply".to_string(),
            )),
            (_, reply) => Ok(reply.map(|frame| frame.payload)),
        }
    }
}
