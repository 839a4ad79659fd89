//! Device configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::device::identifier::CountryScalingData;
use crate::protocol::DEFAULT_BAUD_RATE;

/// Per-device configuration consumed by the driver.
///
/// Deserializable so hosts can embed it in their own settings files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,

    /// Baud rate; ccTalk devices default to 9600.
    pub baud_rate: u32,

    /// ccTalk address of the device. Must be non-zero; when two devices
    /// share a line the addresses must differ.
    pub address: u8,

    /// Explicit polling interval override in milliseconds. When set, the
    /// device-recommended interval is ignored.
    pub poll_interval_ms: Option<u64>,

    /// Country scaling for coin acceptors, which cannot report scaling
    /// themselves. Keyed by the two-character country code.
    pub coin_scaling: BTreeMap<String, CountryScalingData>,

    /// 16-bit CRC checksum variant. Unsupported; must stay `false`.
    pub checksum_16bit: bool,

    /// DES-encrypted payloads. Unsupported; must stay `false`.
    pub des_encrypted: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            address: 2,
            poll_interval_ms: None,
            coin_scaling: BTreeMap::new(),
            checksum_16bit: false,
            des_encrypted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.address, 2);
        assert!(!config.checksum_16bit);
        assert!(!config.des_encrypted);
        assert!(config.poll_interval_ms.is_none());
    }
}
