//! # W-Bus Core Library
//!
//! Client for the W-Bus protocol spoken by auxiliary vehicle heaters over a
//! single-wire K-line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Frame parsing with loopback suppression (the K-line echoes every byte)
//! - Serial transport with the break-based line reset
//! - Request/response transactions with timeout and retry, serialized
//!   through a single queue
//! - Heater commands: run control, fault memory, identification variables
//!
//! ## Example
//!
//! ```rust,ignore
//! use wbus_core::prelude::*;
//!
//! let config = WbusConfig::load_or_default("wbus.json")?;
//! let heater = Heater::init(&config).await?;
//!
//! for fault in heater.faults().list().await? {
//!     println!("{:#04x} x{}: {}", fault.code, fault.count, fault.message);
//! }
//! println!("{}", heater.query().query("WBUSVER").await?.value);
//! ```

pub mod config;
pub mod heater;
pub mod protocol;
pub mod simulator;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, WbusConfig};
    pub use crate::heater::{
        FaultCode, FaultEntry, Faults, Heater, HeaterError, Profile, Query, QueryResult, Raw,
        Runner, RunnerState, StateError, Value,
    };
    pub use crate::protocol::{
        Address, Frame, FrameParser, LinkState, ProtocolError, Transaction, TransactionError,
        TransactionQueue, TransactionSettings,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
