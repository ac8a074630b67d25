//! Heater domain layer
//!
//! Run control, fault memory, identification variables and raw access, all
//! sharing one [`TransactionQueue`]. [`Heater`] brings up a session and hands
//! out the individual command groups.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wbus_core::{config::WbusConfig, heater::Heater};
//!
//! let config = WbusConfig::load_or_default("wbus.json")?;
//! let heater = Heater::init(&config).await?;
//!
//! heater.runner().run(30).await?;
//! heater.runner().keepalive().await?;
//! ```

mod error;
pub mod faults;
pub mod query;
pub mod raw;
pub mod runner;

pub use error::{HeaterError, StateError};
pub use faults::{fault_message, FaultCode, FaultEntry, Faults};
pub use query::{Decoder, Query, QueryResult, Value, Variable};
pub use raw::Raw;
pub use runner::{Profile, Runner, RunnerState};

use tokio::sync::watch;
use tracing::{error, info};

use crate::config::WbusConfig;
use crate::protocol::{
    open_port, reset_line, Bus, BusLine, Frame, LinkState, ProtocolError, Transaction,
    TransactionQueue,
};

/// Wake-up sequence sent once the line is up: identity queries followed by
/// a status read
const HANDSHAKE: &[(&[u8], u8)] = &[
    (&[0x51, 0x0a], 0xd1),
    (&[0x51, 0x0b], 0xd1),
    (&[0x51, 0x0c], 0xd1),
    (&[0x38], 0xb8),
];

/// Submit a transaction that must be answered
pub(crate) async fn transact(
    queue: &TransactionQueue,
    transaction: Transaction,
) -> Result<Frame, HeaterError> {
    queue
        .submit(transaction)
        .await?
        .ok_or_else(|| HeaterError::MalformedResponse("no reply frame".into()))
}

/// An initialized heater session
#[derive(Clone)]
pub struct Heater {
    queue: TransactionQueue,
    runner: Runner,
    faults: Faults,
    query: Query,
    raw: Raw,
}

impl Heater {
    /// Open the configured serial device and initialize the session
    pub async fn init(config: &WbusConfig) -> Result<Self, HeaterError> {
        config.validate()?;
        info!("Heater: opening {}", config.wbus.device);
        let port = open_port(&config.wbus.device)?;
        Self::connect(port, config).await
    }

    /// Initialize a session over an already open line.
    ///
    /// Resets the line, starts the queue and runs the wake-up handshake. The
    /// link state ends up [`LinkState::Ready`] on success and
    /// [`LinkState::Failed`] otherwise.
    pub async fn connect<L: BusLine + 'static>(
        mut line: L,
        config: &WbusConfig,
    ) -> Result<Self, HeaterError> {
        config.validate()?;
        let address = config.wbus.address;

        reset_line(&mut line)
            .await
            .map_err(ProtocolError::from)?;

        let bus = Bus::start(line, address.local, address.remote);
        let queue = TransactionQueue::start(bus, config.transaction_settings());

        let heater = Self {
            runner: Runner::new(queue.clone(), config.runner.profile, config.runner.minutes),
            faults: Faults::new(queue.clone()),
            query: Query::new(queue.clone()),
            raw: Raw::new(queue.clone()),
            queue,
        };

        match heater.handshake().await {
            Ok(()) => {
                heater.queue.set_link_state(LinkState::Ready);
                info!("Heater: initialized");
                Ok(heater)
            }
            Err(e) => {
                error!("Heater: initialization failed: {}", e);
                heater.queue.set_link_state(LinkState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<(), HeaterError> {
        for (payload, response) in HANDSHAKE {
            self.raw
                .raw(payload, Some(std::slice::from_ref(response)))
                .await?;
        }
        Ok(())
    }

    /// Run control
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Fault memory
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Identification variables
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Raw requests
    pub fn raw(&self) -> &Raw {
        &self.raw
    }

    /// The shared transaction queue
    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        self.queue.link_state()
    }

    /// Watch link state changes
    pub fn subscribe_link(&self) -> watch::Receiver<LinkState> {
        self.queue.subscribe_link()
    }
}
