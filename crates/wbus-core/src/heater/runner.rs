//! Heater run control
//!
//! Start, keep alive and stop one heater function. The controller drops out
//! of a commanded run unless it is polled, so a running heater needs a
//! [`Runner::keepalive`] loop until it reports completion.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{transact, HeaterError, StateError};
use crate::protocol::{ProtocolError, Transaction, TransactionQueue};

/// Interval between keepalive polls
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// Status poll command; followed by the profile's keepalive code
pub const KEEPALIVE_REQUEST: u8 = 0x44;

/// Shutdown command and its acknowledgement
pub const SHUTDOWN_REQUEST: u8 = 0x10;
/// Reply to [`SHUTDOWN_REQUEST`]
pub const SHUTDOWN_RESPONSE: u8 = 0x90;

const STATUS_RUNNING: u8 = 0x00;
const STATUS_COMPLETED: u8 = 0x01;

/// Request code and the response code that acknowledges it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Request code
    pub request: u8,
    /// Expected response code
    pub response: u8,
}

/// Heater function addressed by run and keepalive commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Parking heater (cabin heating with engine off)
    ParkingHeater,
    /// Supplement heater (engine running)
    #[default]
    SupplementHeater,
    /// Boost mode
    Boost,
}

impl Profile {
    /// Codes for starting a run
    pub const fn run(self) -> Exchange {
        match self {
            Profile::ParkingHeater => Exchange { request: 0x21, response: 0xa1 },
            Profile::SupplementHeater => Exchange { request: 0x23, response: 0xa3 },
            Profile::Boost => Exchange { request: 0x25, response: 0xa5 },
        }
    }

    /// Codes for the keepalive status poll
    pub const fn keepalive(self) -> Exchange {
        match self {
            Profile::ParkingHeater => Exchange { request: 0x21, response: 0xc1 },
            Profile::SupplementHeater => Exchange { request: 0x23, response: 0xc4 },
            Profile::Boost => Exchange { request: 0x25, response: 0xc5 },
        }
    }
}

/// Snapshot of the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerState {
    /// Whether a run is in progress
    pub running: bool,
    /// A run command is on the bus
    pub starting: bool,
    /// Minutes requested by the last run command
    pub minutes: u32,
    /// Active heater function
    pub profile: Profile,
}

/// Run/keepalive/shutdown state machine.
///
/// Clones share state, so one task can sit in [`keepalive`](Self::keepalive)
/// while another calls [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct Runner {
    queue: TransactionQueue,
    state: Arc<watch::Sender<RunnerState>>,
}

impl Runner {
    /// Create an idle runner
    pub fn new(queue: TransactionQueue, profile: Profile, minutes: u32) -> Self {
        let state = RunnerState {
            running: false,
            starting: false,
            minutes,
            profile,
        };
        Self {
            queue,
            state: Arc::new(watch::Sender::new(state)),
        }
    }

    /// Current state
    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Minutes used by the last or next run
    pub fn minutes(&self) -> u32 {
        self.state.borrow().minutes
    }

    /// Set the default run length
    pub fn set_minutes(&self, minutes: u32) {
        self.state.send_modify(|s| s.minutes = minutes);
    }

    /// Active profile
    pub fn profile(&self) -> Profile {
        self.state.borrow().profile
    }

    /// Select a different heater function; only while idle
    pub fn set_profile(&self, profile: Profile) -> Result<(), HeaterError> {
        let idle = self.state.send_if_modified(|s| {
            if s.running || s.starting {
                return false;
            }
            s.profile = profile;
            true
        });
        if !idle {
            return Err(StateError::AlreadyRunning.into());
        }
        Ok(())
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Start the heater for `minutes` (the controller uses the low byte)
    pub async fn run(&self, minutes: u32) -> Result<(), HeaterError> {
        // At most one start command in flight
        let claimed = self.state.send_if_modified(|s| {
            if s.running || s.starting {
                return false;
            }
            s.starting = true;
            true
        });
        if !claimed {
            return Err(StateError::AlreadyRunning.into());
        }
        let _claim = StartClaim(&self.state);

        let profile = self.profile();
        info!("Runner: running {:?} for {} minutes", profile, minutes);
        let exchange = profile.run();
        let start = Transaction::request(
            vec![exchange.request, (minutes & 0xff) as u8],
            &[exchange.response],
        );
        transact(&self.queue, start).await.map_err(|e| {
            error!("Runner: run failed: {}", e);
            e
        })?;

        self.state.send_modify(|s| {
            s.running = true;
            s.minutes = minutes;
        });
        info!("Runner: running");
        Ok(())
    }

    /// Poll the heater until the run ends.
    ///
    /// Returns `Ok` when the heater reports normal completion or when
    /// [`shutdown`](Self::shutdown) stops the run, and
    /// [`HeaterError::Completed`] with the status code when it stops for
    /// any other reason. A failed poll leaves the runner marked running.
    pub async fn keepalive(&self) -> Result<(), HeaterError> {
        self.keepalive_with_cancel(&CancellationToken::new()).await
    }

    /// [`keepalive`](Self::keepalive) that ends with
    /// [`ProtocolError::Cancelled`] once `cancel` fires
    pub async fn keepalive_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), HeaterError> {
        let state = self.state();
        if !state.running {
            return Err(StateError::NotRunning.into());
        }

        info!("Runner: keepalive");
        let exchange = state.profile.keepalive();
        let poll = Transaction::request(
            vec![KEEPALIVE_REQUEST, exchange.request, 0x00],
            &[exchange.response],
        );
        let mut updates = self.state.subscribe();

        loop {
            if !self.is_running() {
                info!("Runner: stopped");
                return Ok(());
            }

            let frame = self
                .queue
                .submit_with_cancel(poll.clone(), cancel.clone())
                .await?
                .ok_or_else(|| HeaterError::MalformedResponse("no keepalive reply".into()))?;

            let status = *frame.payload.get(1).ok_or_else(|| {
                HeaterError::MalformedResponse(format!("keepalive reply too short: {}", frame))
            })?;

            match status {
                STATUS_RUNNING => debug!("Runner: still running"),
                STATUS_COMPLETED => {
                    self.state.send_modify(|s| s.running = false);
                    info!("Runner: completed");
                    return Ok(());
                }
                code => {
                    self.state.send_modify(|s| s.running = false);
                    error!("Runner: completed with {:#04x}", code);
                    return Err(HeaterError::Completed(code));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ProtocolError::Cancelled.into()),
                _ = async { updates.wait_for(|s| !s.running).await.is_ok() } => {
                    info!("Runner: stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {}
            }
        }
    }

    /// Stop the heater
    pub async fn shutdown(&self) -> Result<(), HeaterError> {
        info!("Runner: shutdown");
        if !self.is_running() {
            return Err(StateError::NotRunning.into());
        }

        let stop = Transaction::request(vec![SHUTDOWN_REQUEST], &[SHUTDOWN_RESPONSE]);
        transact(&self.queue, stop).await.map_err(|e| {
            error!("Runner: shutdown failed: {}", e);
            e
        })?;

        self.state.send_modify(|s| s.running = false);
        info!("Runner: shutdown complete");
        Ok(())
    }
}

/// Clears the `starting` flag when `run` finishes or is dropped
struct StartClaim<'a>(&'a watch::Sender<RunnerState>);

impl Drop for StartClaim<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.starting = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_codes() {
        assert_eq!(Profile::ParkingHeater.run(), Exchange { request: 0x21, response: 0xa1 });
        assert_eq!(Profile::SupplementHeater.keepalive().response, 0xc4);
        assert_eq!(Profile::Boost.keepalive(), Exchange { request: 0x25, response: 0xc5 });
        assert_eq!(Profile::default(), Profile::SupplementHeater);
    }

    #[test]
    fn test_profile_serde_names() {
        let json = serde_json::to_string(&Profile::ParkingHeater).unwrap();
        assert_eq!(json, "\"parking_heater\"");
        let profile: Profile = serde_json::from_str("\"boost\"").unwrap();
        assert_eq!(profile, Profile::Boost);
    }
}
