//! Transaction queue
//!
//! The bus cannot tell overlapping exchanges apart, so every transaction
//! goes through a single worker task that owns the [`Bus`] and executes
//! jobs strictly in submission order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Bus, Frame, LinkState, ProtocolError, Transaction, TransactionSettings};

type Reply = oneshot::Sender<Result<Option<Frame>, ProtocolError>>;

struct Job {
    transaction: Transaction,
    cancel: CancellationToken,
    reply: Reply,
}

/// Handle to the serializing worker.
///
/// Cheap to clone; every clone submits to the same worker. The worker stops
/// once all handles are dropped, releasing the bus.
#[derive(Clone)]
pub struct TransactionQueue {
    jobs: mpsc::UnboundedSender<Job>,
    settings: TransactionSettings,
    link: Arc<watch::Sender<LinkState>>,
}

impl TransactionQueue {
    /// Spawn the worker for `bus`
    pub fn start(bus: Bus, settings: TransactionSettings) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let link = Arc::new(watch::Sender::new(LinkState::Initializing));
        tokio::spawn(run_queue(bus, settings, rx, link.clone()));
        Self {
            jobs,
            settings,
            link,
        }
    }

    /// Defaults applied to submitted transactions
    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        self.link.borrow().clone()
    }

    /// Watch link state changes
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Publish a link state (used by the engine during initialization)
    pub fn set_link_state(&self, state: LinkState) {
        info!("W-Bus: link {:?}", state);
        self.link.send_replace(state);
    }

    /// Queue a transaction and wait for its outcome
    pub async fn submit(&self, transaction: Transaction) -> Result<Option<Frame>, ProtocolError> {
        self.submit_with_cancel(transaction, CancellationToken::new())
            .await
    }

    /// Queue a transaction whose wait can be interrupted through `cancel`.
    ///
    /// A cancelled transaction settles with [`ProtocolError::Cancelled`];
    /// the queue carries on with the next job. Dropping the returned future
    /// cancels the job as well, so an abandoned request never holds up the
    /// ones behind it.
    pub async fn submit_with_cancel(
        &self,
        transaction: Transaction,
        cancel: CancellationToken,
    ) -> Result<Option<Frame>, ProtocolError> {
        // Child token: dropping this call must not cancel the caller's token
        let cancel = cancel.child_token();
        let _abandon = cancel.clone().drop_guard();

        let (reply, settled) = oneshot::channel();
        debug!("Transaction: push {}", transaction);
        self.jobs
            .send(Job {
                transaction,
                cancel,
                reply,
            })
            .map_err(|_| ProtocolError::LinkClosed)?;
        settled.await.map_err(|_| ProtocolError::LinkClosed)?
    }
}

async fn run_queue(
    mut bus: Bus,
    settings: TransactionSettings,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    link: Arc<watch::Sender<LinkState>>,
) {
    let mut failure: Option<String> = None;

    while let Some(job) = jobs.recv().await {
        if job.reply.is_closed() {
            debug!("Transaction: {} abandoned before execution", job.transaction);
            continue;
        }

        if let Some(reason) = &failure {
            let _ = job.reply.send(Err(ProtocolError::LinkFailed(reason.clone())));
            continue;
        }

        debug!("Transaction: pending {}", job.transaction);
        let result = job
            .transaction
            .execute(&mut bus, &settings, &job.cancel)
            .await;

        match &result {
            Ok(_) => debug!("Transaction: completed {}", job.transaction),
            Err(e) if e.is_link_error() => {
                error!("Transaction: {}: link lost: {}", job.transaction, e);
                failure = Some(e.to_string());
                link.send_replace(LinkState::Failed(e.to_string()));
            }
            Err(e) => error!("Transaction: {}: {}", job.transaction, e),
        }

        let _ = job.reply.send(result);
    }

    let counters = bus.counters();
    debug!(
        tx_frames = counters.tx_frames,
        rx_frames = counters.rx_frames,
        stale_frames = counters.stale_frames,
        "Transaction: queue stopped"
    );
}
