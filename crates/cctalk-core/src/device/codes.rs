//! Device-reported code tables
//!
//! Equipment categories, self-check fault codes, the coin event codes with
//! their rejection classification, and the bill validator error/success
//! codes with their event types. Classifications follow the ccTalk
//! specification tables (part 3 tables 2 and 3, table 7, section 18).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Equipment category, derived from the `GetEquipmentCategory` reply.
///
/// Only `CoinAcceptor` and `BillValidator` are operated on by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[default]
    Unknown,
    CoinAcceptor,
    Payout,
    Reel,
    BillValidator,
    CardReader,
    Changer,
    Display,
    Keypad,
    Dongle,
    Meter,
    Bootloader,
    Power,
    Printer,
    Rng,
    HopperScale,
    CoinFeeder,
    BillRecycler,
    Escrow,
    Debug,
}

impl Category {
    /// Map a reported category name to the enum. Underscores are normalized
    /// to spaces to support not-quite-compliant devices.
    pub fn from_reported_name(reported: &str) -> Category {
        let normalized = reported.replace('_', " ");
        match normalized.trim() {
            "Coin Acceptor" => Category::CoinAcceptor,
            "Payout" => Category::Payout,
            "Reel" => Category::Reel,
            "Bill Validator" => Category::BillValidator,
            "Card Reader" => Category::CardReader,
            "Changer" => Category::Changer,
            "Display" => Category::Display,
            "Keypad" => Category::Keypad,
            "Dongle" => Category::Dongle,
            "Meter" => Category::Meter,
            "Bootloader" => Category::Bootloader,
            "Power" => Category::Power,
            "Printer" => Category::Printer,
            "RNG" => Category::Rng,
            "Hopper Scale" => Category::HopperScale,
            "Coin Feeder" => Category::CoinFeeder,
            "Bill Recycler" => Category::BillRecycler,
            "Escrow" => Category::Escrow,
            "Debug" => Category::Debug,
            _ => Category::Unknown,
        }
    }

    /// True for the two categories the driver can run.
    pub fn is_supported(self) -> bool {
        matches!(self, Category::CoinAcceptor | Category::BillValidator)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fault code returned by `PerformSelfCheck`. Zero means no fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultCode(pub u8);

impl FaultCode {
    /// No fault.
    pub const OK: FaultCode = FaultCode(0);
    /// Not on the wire: the self-check command itself failed.
    pub const COMMAND_ERROR: FaultCode = FaultCode(254);

    /// True if the device reports no fault.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name for log output.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "no fault",
            1 => "EEPROM checksum corrupted",
            2 => "fault on inductive coils",
            3 => "fault on credit sensor",
            4 => "fault on piezo sensor",
            5 => "fault on reflective sensor",
            6 => "fault on diameter sensor",
            7 => "fault on wake-up sensor",
            8 => "fault on sorter exit sensors",
            9 => "NVRAM checksum corrupted",
            10 => "coin dispensing error",
            11 => "low level sensor error",
            12 => "high level sensor error",
            13 => "coin counting error",
            14 => "keypad error",
            15 => "button error",
            16 => "display error",
            17 => "coin auditing error",
            18 => "fault on reject sensor",
            19 => "fault on coin return mechanism",
            20 => "fault on C.O.S. mechanism",
            21 => "fault on rim sensor",
            22 => "fault on thermistor",
            23 => "payout motor fault",
            24 => "payout timeout",
            25 => "payout jammed",
            26 => "payout sensor fault",
            27 => "level sensor error",
            28 => "personality module not fitted",
            29 => "personality checksum corrupted",
            30 => "ROM checksum mismatch",
            31 => "missing slave device",
            32 => "internal comms bad",
            33 => "supply voltage outside operating limits",
            34 => "temperature outside operating limits",
            35 => "D.C.E. fault",
            36 => "fault on bill validator sensor",
            37 => "fault on bill transport motor",
            38 => "fault on stacker",
            39 => "bill jammed",
            40 => "RAM test fail",
            41 => "fault on string sensor",
            42 => "accept gate failed open",
            43 => "accept gate failed closed",
            44 => "stacker missing",
            45 => "stacker full",
            46 => "flash memory erase fail",
            47 => "flash memory write fail",
            48 => "slave device not responding",
            49 => "fault on opto sensor",
            50 => "battery fault",
            51 => "door open",
            52 => "microswitch fault",
            53 => "RTC fault",
            54 => "firmware error",
            55 => "initialisation error",
            56 => "supply current outside operating limits",
            57 => "forced bootloader mode",
            254 => "self-check command error",
            255 => "unspecified fault code",
            _ => "unknown fault code",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// What a coin acceptor status event implies about the inserted coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinRejection {
    /// Benign: the coin was returned to the customer (inhibits, slugs, ...).
    Rejected,
    /// The device counted credit but also logged diagnostic information.
    Accepted,
    /// Neither; may indicate a device problem worth a self check.
    Unknown,
}

/// Event code in result B of a `ReadBufferedCredit` record with result A
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinEventCode(pub u8);

impl CoinEventCode {
    /// Classify the event per ccTalk part 3, table 2 / section 12.2.
    pub fn rejection(self) -> CoinRejection {
        match self.0 {
            0 | 7 | 16..=20 | 23 | 26..=29 | 31 | 36 | 39 | 40 | 253..=255 => {
                CoinRejection::Accepted
            }
            1..=3 | 8..=15 | 22 | 24 | 25 | 30 | 32 | 33 | 37 | 38 | 128..=159 => {
                CoinRejection::Rejected
            }
            _ => CoinRejection::Unknown,
        }
    }

    /// Symbolic name for log output.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "no error",
            1 => "reject coin",
            2 => "inhibited coin",
            3 => "multiple window",
            4 => "wake-up timeout",
            5 => "validation timeout",
            6 => "credit sensor timeout",
            7 => "sorter opto timeout",
            8 => "second close coin error",
            9 => "accept gate not ready",
            10 => "credit sensor not ready",
            11 => "sorter not ready",
            12 => "reject coin not cleared",
            13 => "validation sensor not ready",
            14 => "credit sensor blocked",
            15 => "sorter opto blocked",
            16 => "credit sequence error",
            17 => "coin going backwards",
            18 => "coin too fast over credit sensor",
            19 => "coin too slow over credit sensor",
            20 => "C.O.S. mechanism activated",
            21 => "D.C.E. opto timeout",
            22 => "D.C.E. opto not seen",
            23 => "credit sensor reached too early",
            24 => "reject coin repeated sequential trip",
            25 => "reject slug",
            26 => "reject sensor blocked",
            27 => "games overload",
            28 => "max coin meter pulses exceeded",
            29 => "accept gate open not closed",
            30 => "accept gate closed not open",
            31 => "manifold opto timeout",
            32 => "manifold opto blocked",
            33 => "manifold not ready",
            34 => "security status changed",
            35 => "motor exception",
            36 => "swallowed coin",
            37 => "coin too fast over validation sensor",
            38 => "coin too slow over validation sensor",
            39 => "coin incorrectly sorted",
            40 => "external light attack",
            128..=159 => "inhibited coin type",
            160..=191 => "reserved credit cancelling",
            253 => "data block request",
            254 => "coin return mechanism activated",
            255 => "unspecified alarm code",
            _ => "unknown event code",
        }
    }
}

impl fmt::Display for CoinEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Severity class of a bill validator status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillEventType {
    /// Informational only.
    Status,
    /// Bill rejected and returned to the customer.
    Reject,
    /// Fraud detected; possible machine alarm.
    FraudAttempt,
    /// Service callout.
    FatalError,
}

/// Error code in result B of a `ReadBufferedBillEvents` record with result A
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillErrorCode(pub u8);

impl BillErrorCode {
    /// Classify the event per ccTalk section 18. Unknown codes are treated
    /// as fatal.
    pub fn event_type(self) -> BillEventType {
        match self.0 {
            0 | 1 | 4 | 5 | 10..=12 | 14 | 20 | 21 => BillEventType::Status,
            2 | 3 => BillEventType::Reject,
            8 | 9 | 17 | 18 => BillEventType::FraudAttempt,
            _ => BillEventType::FatalError,
        }
    }

    /// Symbolic name for log output.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "master inhibit active",
            1 => "bill returned from escrow",
            2 => "invalid bill (validation fail)",
            3 => "invalid bill (transport problem)",
            4 => "inhibited bill (on serial)",
            5 => "inhibited bill (on DIP switches)",
            6 => "bill jammed in transport (unsafe mode)",
            7 => "bill jammed in stacker",
            8 => "bill pulled backwards",
            9 => "bill tamper",
            10 => "stacker OK",
            11 => "stacker removed",
            12 => "stacker inserted",
            13 => "stacker faulty",
            14 => "stacker full",
            15 => "stacker jammed",
            16 => "bill jammed in transport (safe mode)",
            17 => "opto fraud detected",
            18 => "string fraud detected",
            19 => "anti-string mechanism faulty",
            20 => "barcode detected",
            21 => "unknown bill type stacked",
            _ => "unknown error code",
        }
    }
}

impl fmt::Display for BillErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Success code in result B of a bill event record with result A non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillSuccess {
    /// Bill accepted into the stacker; credit the customer.
    Accepted,
    /// Bill validated and held in escrow; the host decides its route.
    HeldInEscrow,
    /// Out-of-specification code.
    Other(u8),
}

impl From<u8> for BillSuccess {
    fn from(code: u8) -> Self {
        match code {
            0 => BillSuccess::Accepted,
            1 => BillSuccess::HeldInEscrow,
            other => BillSuccess::Other(other),
        }
    }
}

/// Argument of the `RouteBill` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BillRoute {
    /// Return the bill to the customer.
    Return = 0,
    /// Commit the bill to the stacker.
    ToStacker = 1,
    /// Give the escrow more time to decide.
    ExtendTimeout = 255,
}

impl BillRoute {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Outcome of the `RouteBill` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillRouteStatus {
    /// The bill was routed (ACK reply).
    Routed,
    /// The escrow is empty; nothing to route.
    EscrowEmpty,
    /// The device failed to route the bill.
    FailedToRoute,
    /// Out-of-specification status byte.
    Other(u8),
}

impl From<u8> for BillRouteStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => BillRouteStatus::Routed,
            254 => BillRouteStatus::EscrowEmpty,
            255 => BillRouteStatus::FailedToRoute,
            other => BillRouteStatus::Other(other),
        }
    }
}
