//! Fault memory access
//!
//! The controller keeps a short list of stored faults with an occurrence
//! counter per code. Codes are decoded against a fixed message table.

use serde::Serialize;
use tracing::{info, warn};

use super::{transact, HeaterError};
use crate::protocol::{Frame, Transaction, TransactionQueue};

/// Fault memory command
pub const FAULT_REQUEST: u8 = 0x56;
/// Reply code for [`FAULT_REQUEST`]
pub const FAULT_RESPONSE: u8 = 0xd6;

const READ_LIST: u8 = 0x01;
const ERASE: u8 = 0x03;
const READ_LAST: u8 = 0x04;

/// Known fault codes, sorted by code
pub static FAULT_CODES: &[(u8, &str)] = &[
    (0x01, "Defective control unit"),
    (0x02, "No start"),
    (0x03, "Flame failure"),
    (0x04, "Supply voltage too high"),
    (0x05, "Flame was detected prior to combustion"),
    (0x06, "Heating unit overheated"),
    (0x07, "Heating unit interlocked"),
    (0x08, "Metering pump short circuit"),
    (0x09, "Combustion air fan short circuit"),
    (0x0a, "Glow plug/flame monitor short circuit"),
    (0x0b, "Circulation pump short circuit"),
    (0x0c, "No communication to air condition"),
    (0x0d, "Green LED short circuit"),
    (0x0e, "Yellow LED short circuit"),
    (0x0f, "No configuration signal"),
    (0x10, "Solenoid valve short circuit"),
    (0x11, "ECU wrong coded"),
    (0x12, "W-Bus communication failure"),
    (0x13, "Vehicle fan relay short circuit"),
    (0x14, "Temperature sensor short circuit"),
    (0x15, "Combustion air fan blocked"),
    (0x16, "Battery main switch short circuit"),
    (0x17, "Invalid air flow reduction"),
    (0x18, "Communication failure on customer specific bus"),
    (0x19, "Glow plug/electronic ignition short circuit"),
    (0x1a, "Flame sensor short circuit"),
    (0x1b, "Overheat short circuit"),
    (0x1c, "Fault 28"),
    (0x1d, "Solenoid valve shed test short circuit"),
    (0x1e, "Fuel sensor short circuit"),
    (0x1f, "Nozzle stock heating short circuit"),
    (0x20, "Operation indicator short circuit"),
    (0x21, "Flame indicator short circuit"),
    (0x22, "Reference resistance wrong"),
    (0x23, "Crash interlock activated"),
    (0x24, "Car is almost out of fuel"),
    (0x25, "Fuel pre heating short circuit"),
    (0x26, "PCB temperature sensor short circuit"),
    (0x27, "Ground contact to the ECU broken"),
    (0x28, "Board net energy manager low power voltage"),
    (0x29, "Fuel priming still not done"),
    (0x2a, "Error in the radio telegram"),
    (0x2b, "Telestart still not programmed"),
    (0x2c, "The pressure sensor has short circuit"),
    (0x2d, "Fault 45"),
    (0x31, "Fault 49"),
    (0x32, "No start from control idle period"),
    (0x33, "Flame monitor signal invalid"),
    (0x34, "Default values entered"),
    (0x35, "EOL programming has not been carried out"),
    (0x36, "Thermal fuse short circuit"),
    (0x37, "Fault 55"),
    (0x4f, "Fault 79"),
    (0x50, "User interface idle-Mode (no-communication)"),
    (0x51, "User interface has communication fault"),
    (0x52, "User interface send no defined operating mode"),
    (0x53, "Heater fan status message negative"),
    (0x54, "Heater fan status bus has short circuit to UB"),
    (0x55, "Temperature water sensor failure"),
    (0x56, "Temperature water sensor short circuit to UB"),
    (0x57, "Overheating water temperature sensor"),
    (0x58, "Overstepping water temperature sensor gradient"),
    (0x59, "Overheating blow temperature sensor"),
    (0x5a, "Overstepping low temperature sensor gradient"),
    (0x5b, "Overheating printed circuit board temperature sensor"),
    (0x5c, "Overstepping printed circuit board temp sensor gradient"),
    (0x5d, "Cabin temperature sensor failure"),
    (0x5e, "Flame detector gradient failure"),
    (0x5f, "Emergency cooling"),
    (0x60, "Customer specific fault 1"),
    (0x7f, "Customer specific fault 32"),
    (0x80, "Fault 128"),
    (0x81, "EOL checksum error"),
    (0x82, "No start during test-run"),
    (0x83, "Flame failure"),
    (0x84, "Operating voltage too low"),
    (0x85, "Flame was detected after combustion"),
    (0x86, "Fault 134"),
    (0x87, "Heater lock-out permanent"),
    (0x88, "Fuel pump failure"),
    (0x89, "Combustion air fan interruption"),
    (0x8a, "Glow plug / flame monitor interruption"),
    (0x8b, "Circulation pump interruption"),
    (0x8c, "Fault 140"),
    (0x8d, "Green LED interruption"),
    (0x8e, "Yellow LED interruption"),
    (0x8f, "Fault 143"),
    (0x90, "Solenoid valve interruption"),
    (0x91, "Control unit locked or coded as neutral"),
    (0x92, "Command refresh failure"),
    (0x93, "Fault 147"),
    (0x94, "Temperature sensor interruption"),
    (0x95, "Combustion air fan tight"),
    (0x96, "Fault 150"),
    (0x97, "Overheat sensor position wrong"),
    (0x98, "Fault 152 (Power supply interruption)"),
    (0x99, "Glow plug / electronic ignition unit interruption"),
    (0x9a, "Flame sensor interruption"),
    (0x9b, "Setpoint transmitter invalid"),
    (0x9c, "Intelligent undervoltage detection"),
    (0x9d, "Solenoid valve shed test interruption"),
    (0x9e, "Fuel sensor interruption"),
    (0x9f, "Nozzle stock heating interruption"),
    (0xa0, "Operating indicator interruption"),
    (0xa1, "Flame indicator interruption"),
    (0xa2, "Fault 162"),
    (0xa4, "Fault 164"),
    (0xa5, "Fuel pre heating interruption"),
    (0xa6, "PCB temperature sensor interruption"),
    (0xa7, "Fault 167"),
    (0xa8, "Communication board net energy manager error"),
    (0xa9, "Fault 169"),
    (0xaa, "Send on W-Bus not succeed"),
    (0xab, "Overheat sensor interruption"),
    (0xac, "The pressure sensor failure"),
    (0xad, "Fault 173"),
    (0xb5, "Fault 181"),
    (0xb6, "Thermal fuse interrupted"),
    (0xb7, "Fault 183"),
    (0xd0, "Fault 208"),
    (0xe0, "Customer specific fault 33"),
    (0xfe, "Customer specific fault 63"),
    (0xff, "Unknown error code"),
];

/// Human-readable message for a fault code
pub fn fault_message(code: u8) -> &'static str {
    FAULT_CODES
        .binary_search_by_key(&code, |&(c, _)| c)
        .map(|i| FAULT_CODES[i].1)
        .unwrap_or("Unknown")
}

/// A fault code with its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultCode {
    /// Raw fault code
    pub code: u8,
    /// Decoded message
    pub message: &'static str,
}

impl FaultCode {
    /// Look up the message for `code`
    pub fn new(code: u8) -> Self {
        Self {
            code,
            message: fault_message(code),
        }
    }
}

/// One record of the stored fault list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultEntry {
    /// Raw fault code
    pub code: u8,
    /// Times the fault occurred
    pub count: u8,
    /// Decoded message
    pub message: &'static str,
}

/// Fault memory commands
#[derive(Clone)]
pub struct Faults {
    queue: TransactionQueue,
}

impl Faults {
    /// Fault commands over `queue`
    pub fn new(queue: TransactionQueue) -> Self {
        Self { queue }
    }

    /// Most recent fault
    pub async fn last(&self) -> Result<FaultCode, HeaterError> {
        info!("Faults: last");
        let frame = self.request(READ_LAST).await?;
        let code = *frame.payload.get(2).ok_or_else(|| {
            HeaterError::MalformedResponse(format!("fault reply too short: {}", frame))
        })?;

        let fault = FaultCode::new(code);
        info!("Faults: last {:#04x} ({})", fault.code, fault.message);
        Ok(fault)
    }

    /// Stored faults with their occurrence counts
    pub async fn list(&self) -> Result<Vec<FaultEntry>, HeaterError> {
        info!("Faults: list");
        let frame = self.request(READ_LIST).await?;
        let entries = decode_list(&frame.payload)?;
        for (i, entry) in entries.iter().enumerate() {
            info!(
                "Faults: {}: {:#04x} x{} ({})",
                i + 1,
                entry.code,
                entry.count,
                entry.message
            );
        }
        Ok(entries)
    }

    /// Clear the fault memory
    pub async fn erase(&self) -> Result<(), HeaterError> {
        info!("Faults: erase");
        self.request(ERASE).await?;
        info!("Faults: erased");
        Ok(())
    }

    async fn request(&self, sub: u8) -> Result<Frame, HeaterError> {
        let frame = transact(
            &self.queue,
            Transaction::request(vec![FAULT_REQUEST, sub], &[FAULT_RESPONSE]),
        )
        .await?;

        match frame.payload.get(1) {
            Some(&echo) if echo == sub => Ok(frame),
            _ => Err(HeaterError::MalformedResponse(format!(
                "expected fault reply {:#04x}, got {}",
                sub, frame
            ))),
        }
    }
}

/// Decode a `d6 01 <n> (<code> <count>)*` reply.
///
/// A list cut short by the frame is decoded up to the last complete record.
fn decode_list(payload: &[u8]) -> Result<Vec<FaultEntry>, HeaterError> {
    let count = *payload
        .get(2)
        .ok_or_else(|| HeaterError::MalformedResponse("fault list without count".into()))?
        as usize;

    let records = payload.get(3..).unwrap_or_default();
    if records.len() < count * 2 {
        warn!(
            "Faults: list announces {} entries but carries {}",
            count,
            records.len() / 2
        );
    }

    Ok(records
        .chunks_exact(2)
        .take(count)
        .map(|pair| FaultEntry {
            code: pair[0],
            count: pair[1],
            message: fault_message(pair[0]),
        })
        .collect())
}
