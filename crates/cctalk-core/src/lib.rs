//! # cctalk-core
//!
//! Host-side driver core for ccTalk coin acceptors and bill validators.
//!
//! This library provides:
//! - ccTalk framing with the 8-bit zero-sum checksum and half-duplex echo
//!   handling
//! - a link controller with one-request-in-flight discipline on a blocking
//!   I/O worker thread
//! - a typed command layer for the command subset money devices need
//! - a polling supervisor that takes a device from cold boot through
//!   self-identification into credit acceptance, interprets the rolling
//!   event buffer, routes bills held in escrow and recovers from faults and
//!   external resets
//!
//! ## Example
//!
//! ```rust,ignore
//! use cctalk_core::prelude::*;
//!
//! let mut config = DeviceConfig::default();
//! config.port_name = "/dev/ttyUSB0".into();
//! config.address = 2;
//!
//! let device = Device::open(config)?;
//! let events = device.subscribe();
//! device.initialize()?;
//! device.request_switch_state(DeviceState::NormalAccepting)?;
//!
//! for event in events {
//!     if let DeviceEvent::CreditAccepted { position, identifier } = event {
//!         println!("credit at position {position}: {identifier}");
//!     }
//! }
//! ```

pub mod config;
pub mod device;
pub mod protocol;

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::config::DeviceConfig;
    pub use crate::device::{
        Category, CountryScalingData, Device, DeviceError, DeviceEvent, DeviceState, Identifier,
        ManufacturingInfo,
    };
    pub use crate::protocol::{Header, LinkController, ProtocolError, SerialLink};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
