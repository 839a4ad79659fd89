//! Protocol commands
//!
//! The ccTalk command headers used by the driver, plus decoders for the
//! replies whose interpretation is fixed by the protocol rather than by the
//! device category.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// ccTalk command headers used by this driver.
///
/// Core commands are mandatory for every device; the rest are required for
/// coin acceptors and bill validators specifically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Header {
    /// Generic reply header; ACKs use this with an empty payload.
    Reply = 0,
    /// Perform a soft reset. Returns ACK; the time until the device is back
    /// up is device specific.
    ResetDevice = 1,
    /// Get the ccTalk command set revision as (release, major, minor).
    GetCommsRevision = 4,
    /// Modify bill validator operating mode: bit 0 stacker, bit 1 escrow.
    SetBillOperatingMode = 153,
    /// Route a bill held in escrow: 0 return, 1 stacker, 255 extend timeout.
    RouteBill = 154,
    /// Get scaling factor and decimal places for a country code.
    GetCountryScalingFactor = 156,
    /// Get the bill ID at a position, as ASCII.
    GetBillId = 157,
    /// Read the buffered bill event window. This is the polling command for
    /// bill validators.
    ReadBufferedBillEvents = 159,
    /// Get the coin ID at a position, as ASCII.
    GetCoinId = 184,
    /// Get the build code, as ASCII.
    GetBuildCode = 192,
    /// Get the master inhibit status; bit 0 set means accepting.
    GetMasterInhibitStatus = 227,
    /// Set the master inhibit status; bit 0 set means accept.
    SetMasterInhibitStatus = 228,
    /// Read the buffered credit event window. This is the polling command
    /// for coin acceptors.
    ReadBufferedCredit = 229,
    /// Set per-position inhibits: two bytes cover 16 positions.
    SetInhibitStatus = 231,
    /// Poll the fault code; 0 means no fault.
    PerformSelfCheck = 232,
    /// Get the software revision, as ASCII.
    GetSoftwareRevision = 241,
    /// Get the device serial number, usually 3 bytes.
    GetSerialNumber = 242,
    /// Get the product code, as ASCII.
    GetProductCode = 244,
    /// Get the equipment category name, as ASCII.
    GetEquipmentCategory = 245,
    /// Get the manufacturer name, as ASCII.
    GetManufacturer = 246,
    /// Get device variables; for bill validators the first byte is the
    /// number of bill types.
    GetVariableSet = 247,
    /// Get the recommended polling interval as (unit, value).
    GetPollingPriority = 249,
    /// Alive check; returns ACK.
    SimplePoll = 254,
}

impl Header {
    /// The header byte as transmitted on the wire.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Symbolic name for log output.
    pub fn name(self) -> &'static str {
        match self {
            Header::Reply => "Reply",
            Header::ResetDevice => "ResetDevice",
            Header::GetCommsRevision => "GetCommsRevision",
            Header::SetBillOperatingMode => "SetBillOperatingMode",
            Header::RouteBill => "RouteBill",
            Header::GetCountryScalingFactor => "GetCountryScalingFactor",
            Header::GetBillId => "GetBillId",
            Header::ReadBufferedBillEvents => "ReadBufferedBillEvents",
            Header::GetCoinId => "GetCoinId",
            Header::GetBuildCode => "GetBuildCode",
            Header::GetMasterInhibitStatus => "GetMasterInhibitStatus",
            Header::SetMasterInhibitStatus => "SetMasterInhibitStatus",
            Header::ReadBufferedCredit => "ReadBufferedCredit",
            Header::SetInhibitStatus => "SetInhibitStatus",
            Header::PerformSelfCheck => "PerformSelfCheck",
            Header::GetSoftwareRevision => "GetSoftwareRevision",
            Header::GetSerialNumber => "GetSerialNumber",
            Header::GetProductCode => "GetProductCode",
            Header::GetEquipmentCategory => "GetEquipmentCategory",
            Header::GetManufacturer => "GetManufacturer",
            Header::GetVariableSet => "GetVariableSet",
            Header::GetPollingPriority => "GetPollingPriority",
            Header::SimplePoll => "SimplePoll",
        }
    }
}

/// ccTalk command set revision, from a `GetCommsRevision` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommsRevision {
    pub release: u8,
    pub major: u8,
    pub minor: u8,
}

/// Decode a `GetCommsRevision` reply.
pub fn decode_comms_revision(payload: &[u8]) -> Option<CommsRevision> {
    if payload.len() != 3 {
        return None;
    }
    Some(CommsRevision {
        release: payload[0],
        major: payload[1],
        minor: payload[2],
    })
}

/// Decode a `GetPollingPriority` reply into a recommended interval in
/// milliseconds. `None` means the reply was malformed; `Some(0)` means the
/// device defers to its documentation.
pub fn decode_polling_interval(payload: &[u8]) -> Option<u64> {
    if payload.len() != 2 {
        return None;
    }
    let unit = payload[0];
    let value = payload[1] as u64;

    let multiplier_ms: u64 = match unit {
        0 => 0,
        1 => 1,
        2 => 10,
        3 => 1_000,
        4 => 1_000 * 60,
        5 => 1_000 * 60 * 60,
        6 => 1_000 * 60 * 60 * 24,
        7 => 1_000 * 60 * 60 * 24 * 7,
        8 => 1_000 * 60 * 60 * 24 * 7 * 30,
        9 => 1_000 * 31_557_600,
        _ => 1,
    };

    Some(multiplier_ms * value)
}

/// Decode a `GetVariableSet` reply into the number of bill types, if the
/// device reports a usable count. Only meaningful for bill validators.
pub fn decode_bill_type_count(payload: &[u8]) -> Option<u8> {
    if payload.len() < 2 || payload[0] <= 1 {
        return None;
    }
    Some(payload[0])
}

/// Decode a `GetCountryScalingFactor` reply `[lsb, msb, decimals]` into
/// `(scaling_factor, decimal_places)`.
pub fn decode_country_scaling(payload: &[u8]) -> Option<(u16, u8)> {
    if payload.len() != 3 {
        return None;
    }
    Some((LittleEndian::read_u16(&payload[0..2]), payload[2]))
}
