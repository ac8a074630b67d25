//! Identification variables
//!
//! Read-only values such as device name, versions and the capability code.
//! Each variable is read with `51 <code>` and decoded from the bytes that
//! follow the `d1 <code>` reply header.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use super::{transact, HeaterError};
use crate::protocol::{Transaction, TransactionQueue};

/// Variable read command
pub const QUERY_REQUEST: u8 = 0x51;
/// Reply code for [`QUERY_REQUEST`]
pub const QUERY_RESPONSE: u8 = 0xd1;

/// A named bit within one byte of a bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flag {
    /// Bit mask within the byte
    pub mask: u8,
    /// Capability name
    pub name: &'static str,
}

const fn flag(mask: u8, name: &'static str) -> Flag {
    Flag { mask, name }
}

/// Capability bits of the W-Bus code, one table per byte
pub static WBUS_CODE_FLAGS: &[&[Flag]] = &[
    &[
        flag(0x01, "Unknown"),
        flag(0x08, "On/off control"),
        flag(0x10, "Parking heater"),
        flag(0x20, "Supplement heater"),
        flag(0x40, "Ventilation"),
        flag(0x80, "Boost"),
    ],
    &[
        flag(0x02, "External circulation pump control"),
        flag(0x04, "Combustion air fan"),
        flag(0x08, "Glow plug"),
        flag(0x10, "Fuel pump"),
        flag(0x20, "Circulation pump"),
        flag(0x40, "Vehicle fan relay"),
        flag(0x80, "Yellow LED"),
    ],
    &[
        flag(0x01, "Green LED"),
        flag(0x02, "Spark transmitter"),
        flag(0x04, "Solenoid valve"),
        flag(0x08, "AUX drive indicator"),
        flag(0x10, "Generator signal D+"),
        flag(0x20, "Combustion fan level in RPM"),
    ],
    &[flag(0x02, "CO2 calibration"), flag(0x08, "Operation indicator")],
    &[
        flag(0x10, "Heat power in watts"),
        flag(0x40, "Flame indicator"),
        flag(0x80, "Nozzle stock heating"),
    ],
    &[
        flag(0x20, "Ignition flag"),
        flag(0x40, "Temperature threshold available"),
        flag(0x80, "Fuel prewarming resistance and power readable"),
    ],
    &[flag(
        0x02,
        "Set flame detector resistance, set combustion fan revolutions, set output temperature",
    )],
];

/// How the value bytes of a variable are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Raw bytes
    Hex,
    /// Latin-1 text
    Text,
    /// All matches of a pattern over the text
    Regex(&'static str),
    /// Major/minor nibble pair at the given offset
    Version(usize),
    /// Named flags, one table per byte
    Bitfield(&'static [&'static [Flag]]),
}

/// A readable identification variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    /// Code sent after the query command
    pub code: u8,
    /// Short identifier, e.g. `DEVNAME`
    pub id: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Value interpretation
    pub decoder: Decoder,
}

const fn variable(
    code: u8,
    id: &'static str,
    description: &'static str,
    decoder: Decoder,
) -> Variable {
    Variable {
        code,
        id,
        description,
        decoder,
    }
}

/// All known variables
pub static VARIABLES: &[Variable] = &[
    variable(0x01, "DEVID", "Device ID", Decoder::Hex),
    variable(0x02, "HWVER", "Hardware version", Decoder::Hex),
    variable(0x03, "DATAID", "Data set ID", Decoder::Hex),
    variable(0x04, "CUDATE", "Control unit manufacturing date", Decoder::Hex),
    variable(0x05, "HDATE", "Heater manufacturing date", Decoder::Hex),
    variable(0x07, "CUSTID", "Customer ID", Decoder::Hex),
    variable(0x09, "SERIALNO", "Serial number", Decoder::Hex),
    variable(0x0a, "WBUSVER", "W-BUS version", Decoder::Version(0)),
    variable(0x0b, "DEVNAME", "Device name", Decoder::Regex(r"(?-u:\w)+")),
    variable(0x0c, "WBUSCODE", "W-BUS code", Decoder::Bitfield(WBUS_CODE_FLAGS)),
];

/// Find a variable by id (case-insensitive)
pub fn find_variable(id: &str) -> Option<&'static Variable> {
    VARIABLES.iter().find(|v| v.id.eq_ignore_ascii_case(id))
}

/// State of one named flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagState {
    /// Capability name
    pub name: &'static str,
    /// Whether the bit is set
    pub set: bool,
}

/// A decoded variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Text
    Text(String),
    /// Pattern matches
    Matches(Vec<String>),
    /// Version number
    Version {
        /// High nibble
        major: u8,
        /// Low nibble
        minor: u8,
    },
    /// Capability flags
    Flags(Vec<FlagState>),
}

impl Value {
    /// Look up a flag by name; `None` if this is not a bitfield or the flag
    /// was not covered by the reply
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self {
            Value::Flags(flags) => flags.iter().find(|f| f.name == name).map(|f| f.set),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(bytes) => {
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:#04x}", byte)?;
                }
                Ok(())
            }
            Value::Text(text) => write!(f, "{}", text),
            Value::Matches(matches) => write!(f, "{}", matches.join(",")),
            Value::Version { major, minor } => write!(f, "{}.{}", major, minor),
            Value::Flags(flags) => {
                for (i, flag) in flags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "[{}] {}", if flag.set { "x" } else { " " }, flag.name)?;
                }
                Ok(())
            }
        }
    }
}

fn latin1(data: &[u8]) -> String {
    data.iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

impl Decoder {
    /// Decode the value bytes of a reply
    pub fn decode(&self, data: &[u8]) -> Result<Value, HeaterError> {
        match *self {
            Decoder::Hex => Ok(Value::Bytes(data.to_vec())),
            Decoder::Text => Ok(Value::Text(latin1(data))),
            Decoder::Regex(pattern) => {
                let re = Regex::new(pattern).map_err(|e| {
                    HeaterError::MalformedResponse(format!("bad pattern {}: {}", pattern, e))
                })?;
                let text = latin1(data);
                Ok(Value::Matches(
                    re.find_iter(&text).map(|m| m.as_str().to_string()).collect(),
                ))
            }
            Decoder::Version(index) => {
                let byte = *data.get(index).ok_or_else(|| {
                    HeaterError::MalformedResponse(format!(
                        "version byte {} missing from {} value byte(s)",
                        index,
                        data.len()
                    ))
                })?;
                Ok(Value::Version {
                    major: byte >> 4,
                    minor: byte & 0x0f,
                })
            }
            Decoder::Bitfield(table) => Ok(Value::Flags(
                table
                    .iter()
                    .zip(data)
                    .flat_map(|(flags, &byte)| {
                        flags.iter().map(move |flag| FlagState {
                            name: flag.name,
                            set: byte & flag.mask != 0,
                        })
                    })
                    .collect(),
            )),
        }
    }
}

/// Result of reading a variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    /// Variable id
    pub id: &'static str,
    /// Variable description
    pub description: &'static str,
    /// Value bytes as received
    pub raw: Vec<u8>,
    /// Decoded value
    pub value: Value,
}

/// Variable read commands
#[derive(Clone)]
pub struct Query {
    queue: TransactionQueue,
}

impl Query {
    /// Query commands over `queue`
    pub fn new(queue: TransactionQueue) -> Self {
        Self { queue }
    }

    /// Read and decode the variable named `id`
    pub async fn query(&self, id: &str) -> Result<QueryResult, HeaterError> {
        let variable =
            find_variable(id).ok_or_else(|| HeaterError::UnknownVariable(id.to_string()))?;

        info!("Query: {} ({:#04x})", variable.id, variable.code);
        let frame = transact(
            &self.queue,
            Transaction::request(vec![QUERY_REQUEST, variable.code], &[QUERY_RESPONSE]),
        )
        .await?;

        if frame.payload.get(1) != Some(&variable.code) {
            return Err(HeaterError::MalformedResponse(format!(
                "expected reply for {:#04x}, got {}",
                variable.code, frame
            )));
        }

        let raw = frame.payload[2..].to_vec();
        let value = variable.decoder.decode(&raw)?;
        debug!("Query: {} = {}", variable.id, value);

        Ok(QueryResult {
            id: variable.id,
            description: variable.description,
            raw,
            value,
        })
    }

    /// Ids and descriptions of all variables
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        VARIABLES.iter().map(|v| (v.id, v.description)).collect()
    }

    /// Description of `id`
    pub fn describe(&self, id: &str) -> Option<&'static str> {
        find_variable(id).map(|v| v.description)
    }

    /// Definition of `id`
    pub fn variable(&self, id: &str) -> Option<&'static Variable> {
        find_variable(id)
    }
}
