//! Coin and bill identifiers
//!
//! Identifiers are the ASCII strings returned by `GetCoinId` and
//! `GetBillId`: a two-character country code, a value code, and a
//! one-character issue code. Bills carry a four-digit numeric value code
//! that is later combined with per-country scaling data; coins encode the
//! value in a fixed three-character code table (ccTalk Appendix 3).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scaling data for one country, as returned by `GetCountryScalingFactor`
/// for bills, or supplied by the caller for coins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryScalingData {
    /// Multiplier applied to the identifier value code.
    pub scaling_factor: u16,
    /// Decimal places; 2 for USD (10^2 cents per dollar).
    pub decimal_places: u8,
}

impl Default for CountryScalingData {
    fn default() -> Self {
        Self {
            scaling_factor: 1,
            decimal_places: 0,
        }
    }
}

impl CountryScalingData {
    /// A country is supported iff at least one field is non-zero.
    pub fn is_valid(&self) -> bool {
        self.scaling_factor != 0 || self.decimal_places != 0
    }
}

/// A coin or bill identifier at one device position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// The raw identifier string, e.g. `GE0005A` for the first issue of a
    /// Georgian 5-lari bill.
    pub raw: String,
    /// Two-character country code, e.g. `GE`.
    pub country: String,
    /// Issue code (`A`, `B`, ...) distinguishing issues of the same value.
    pub issue_code: char,
    /// Value code before country scaling.
    pub value_code: u64,
    /// Extra decimal places from the coin value code table.
    pub coin_decimals: u8,
    /// Country scaling applied to this identifier.
    pub scaling: CountryScalingData,
}

impl Identifier {
    /// Parse an identifier reply. Seven characters is the bill form, six
    /// the coin form; anything else is malformed.
    pub fn parse(id: &[u8]) -> Option<Identifier> {
        match id.len() {
            7 => {
                let value_code = String::from_utf8_lossy(&id[2..6]).parse().unwrap_or(0);
                Some(Identifier {
                    country: String::from_utf8_lossy(&id[0..2]).into_owned(),
                    issue_code: id[6] as char,
                    value_code,
                    coin_decimals: 0,
                    scaling: CountryScalingData::default(),
                    raw: String::from_utf8_lossy(id).into_owned(),
                })
            }
            6 => {
                let code = String::from_utf8_lossy(&id[2..5]);
                let (value_code, coin_decimals) = coin_value(&code).unwrap_or((0, 0));
                Some(Identifier {
                    country: String::from_utf8_lossy(&id[0..2]).into_owned(),
                    issue_code: id[5] as char,
                    value_code,
                    coin_decimals,
                    scaling: CountryScalingData::default(),
                    raw: String::from_utf8_lossy(id).into_owned(),
                })
            }
            _ => None,
        }
    }

    /// Monetary value as `(value, decimal_places)`: divide `value` by
    /// `10^decimal_places` to get the amount in the country currency.
    pub fn value(&self) -> (u64, u32) {
        (
            self.value_code * u64::from(self.scaling.scaling_factor),
            u32::from(self.scaling.decimal_places) + u32::from(self.coin_decimals),
        )
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// True if a `GetCoinId` / `GetBillId` reply denotes an unused position:
/// blank, all dots (the conventional empty marker), or leading NUL.
pub fn is_empty_slot(id: &[u8]) -> bool {
    id.iter().all(|b| b.is_ascii_whitespace())
        || id[0] == 0
        || id.iter().all(|b| *b == b'.')
}

/// Coin value code table from ccTalk Appendix 3: a three-character code to
/// `(value, decimal_places)`.
pub fn coin_value(code: &str) -> Option<(u64, u8)> {
    let entry = match code {
        "5m0" => (5, 3),
        "10m" => (1, 2),
        ".01" => (1, 2),
        "20m" => (2, 2),
        ".02" => (2, 2),
        "25m" => (25, 3),
        "50m" => (5, 2),
        ".05" => (5, 2),
        ".10" => (1, 1),
        ".20" => (2, 1),
        ".25" => (25, 2),
        ".50" => (5, 1),
        "001" => (1, 0),
        "002" => (2, 0),
        "2.5" => (25, 1),
        "005" => (5, 0),
        "010" => (10, 0),
        "020" => (20, 0),
        "025" => (25, 0),
        "050" => (50, 0),
        "100" => (100, 0),
        "200" => (200, 0),
        "250" => (250, 0),
        "500" => (500, 0),
        "1K0" => (1_000, 0),
        "2K0" => (2_000, 0),
        "2K5" => (2_500, 0),
        "5K0" => (5_000, 0),
        "10K" => (10_000, 0),
        "20K" => (20_000, 0),
        "25K" => (25_000, 0),
        "50K" => (50_000, 0),
        "M10" => (100_000, 0),
        "M20" => (200_000, 0),
        "M25" => (250_000, 0),
        "M50" => (500_000, 0),
        "1M0" => (1_000_000, 0),
        "2M0" => (2_000_000, 0),
        "2M5" => (2_500_000, 0),
        "5M0" => (5_000_000, 0),
        "10M" => (10_000_000, 0),
        "20M" => (20_000_000, 0),
        "25M" => (25_000_000, 0),
        "50M" => (50_000_000, 0),
        "G10" => (100_000_000, 0),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bill_identifier() {
        let id = Identifier::parse(b"GE0005A").expect("should parse");
        assert_eq!(id.country, "GE");
        assert_eq!(id.value_code, 5);
        assert_eq!(id.issue_code, 'A');
        assert_eq!(id.coin_decimals, 0);
        assert_eq!(id.raw, "GE0005A");
    }

    #[test]
    fn parses_coin_identifier() {
        let id = Identifier::parse(b"US.25B").expect("should parse");
        assert_eq!(id.country, "US");
        assert_eq!(id.value_code, 25);
        assert_eq!(id.coin_decimals, 2);
        assert_eq!(id.issue_code, 'B');
    }

    #[test]
    fn bill_value_with_scaling() {
        let mut id = Identifier::parse(b"US0001A").expect("should parse");
        id.scaling = CountryScalingData {
            scaling_factor: 100,
            decimal_places: 2,
        };
        // 1 * 100 = 100 cents = 1.00 USD.
        assert_eq!(id.value(), (100, 2));
    }

    #[test]
    fn coin_value_with_caller_scaling() {
        let mut id = Identifier::parse(b"GE.50A").expect("should parse");
        id.scaling = CountryScalingData {
            scaling_factor: 1,
            decimal_places: 2,
        };
        // .50 maps to (5, 1); country decimal places add to the divisor.
        assert_eq!(id.value(), (5, 3));
    }

    #[test]
    fn unknown_coin_code_parses_as_zero() {
        let id = Identifier::parse(b"XXzzzA").expect("should parse");
        assert_eq!(id.value_code, 0);
        assert_eq!(id.coin_decimals, 0);
    }

    #[test]
    fn rejects_other_lengths() {
        assert!(Identifier::parse(b"").is_none());
        assert!(Identifier::parse(b"US25").is_none());
        assert!(Identifier::parse(b"US123456A").is_none());
    }

    #[test]
    fn empty_slot_detection() {
        assert!(is_empty_slot(b""));
        assert!(is_empty_slot(b"      "));
        assert!(is_empty_slot(b"......"));
        assert!(is_empty_slot(b"......."));
        assert!(is_empty_slot(b"\0AAAAA"));
        assert!(!is_empty_slot(b"US.25B"));
    }

    #[test]
    fn coin_table_spot_checks() {
        assert_eq!(coin_value("5m0"), Some((5, 3)));
        assert_eq!(coin_value(".01"), Some((1, 2)));
        assert_eq!(coin_value(".25"), Some((25, 2)));
        assert_eq!(coin_value("001"), Some((1, 0)));
        assert_eq!(coin_value("5K0"), Some((5_000, 0)));
        assert_eq!(coin_value("M50"), Some((500_000, 0)));
        assert_eq!(coin_value("1M0"), Some((1_000_000, 0)));
        assert_eq!(coin_value("G10"), Some((100_000_000, 0)));
        assert_eq!(coin_value("zzz"), None);
    }
}
