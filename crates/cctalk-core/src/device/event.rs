//! Event window decoding
//!
//! `ReadBufferedCredit` and `ReadBufferedBillEvents` answer with the same
//! layout: one event counter byte followed by up to five `(result A,
//! result B)` pairs, newest first. The counter wraps from 255 back to 1;
//! zero is reserved for the power-up / reset condition.

use super::codes::{BillErrorCode, BillSuccess, CoinEventCode};

/// One raw entry of the device's rolling event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Position 1..N for a credit, or 0 for a status/error event.
    pub result_a: u8,
    /// Sorter path or success code for credits, event code otherwise.
    pub result_b: u8,
}

/// An [`EventRecord`] viewed through coin acceptor semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinEvent {
    /// Status or error event; the code tells whether the coin was kept.
    Status(CoinEventCode),
    /// A coin was accepted at `position`.
    Credit { position: u8, sorter_path: u8 },
}

/// An [`EventRecord`] viewed through bill validator semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillEvent {
    /// Status or error event.
    Status(BillErrorCode),
    /// A bill was validated at `position`; `code` says whether it was
    /// stacked or held in escrow.
    Credit { position: u8, code: BillSuccess },
}

impl EventRecord {
    /// True for status/error events (result A zero).
    pub fn is_status(self) -> bool {
        self.result_a == 0
    }

    /// Interpret the record for a coin acceptor.
    pub fn coin_event(self) -> CoinEvent {
        if self.result_a == 0 {
            CoinEvent::Status(CoinEventCode(self.result_b))
        } else {
            CoinEvent::Credit {
                position: self.result_a,
                sorter_path: self.result_b,
            }
        }
    }

    /// Interpret the record for a bill validator.
    pub fn bill_event(self) -> BillEvent {
        if self.result_a == 0 {
            BillEvent::Status(BillErrorCode(self.result_b))
        } else {
            BillEvent::Credit {
                position: self.result_a,
                code: BillSuccess::from(self.result_b),
            }
        }
    }
}

/// Decode an event window payload into `(event_counter, records)` with the
/// newest record first. `None` if the payload is empty or not of the form
/// `counter + pairs`.
pub fn decode_event_window(payload: &[u8]) -> Option<(u8, Vec<EventRecord>)> {
    if payload.is_empty() || payload.len() % 2 != 1 {
        return None;
    }
    let counter = payload[0];
    let events = payload[1..]
        .chunks_exact(2)
        .map(|pair| EventRecord {
            result_a: pair[0],
            result_b: pair[1],
        })
        .collect();
    Some((counter, events))
}

/// Number of events between two counter observations. The counter wraps
/// 255 → 1, skipping the reserved zero.
pub fn counter_delta(last: u8, current: u8) -> u8 {
    let diff = i16::from(current) - i16::from(last);
    if diff < 0 {
        (diff + 255) as u8
    } else {
        diff as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::codes::CoinRejection;

    #[test]
    fn decodes_window_newest_first() {
        let payload = [7, 3, 0, 0, 2, 0, 0, 0, 0, 0, 0];
        let (counter, events) = decode_event_window(&payload).expect("should decode");
        assert_eq!(counter, 7);
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            EventRecord {
                result_a: 3,
                result_b: 0
            }
        );
        assert_eq!(
            events[1],
            EventRecord {
                result_a: 0,
                result_b: 2
            }
        );
    }

    #[test]
    fn rejects_malformed_windows() {
        assert_eq!(decode_event_window(&[]), None);
        assert_eq!(decode_event_window(&[1, 2]), None);
        assert_eq!(decode_event_window(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn counter_only_window_is_valid() {
        assert_eq!(decode_event_window(&[0]), Some((0, vec![])));
    }

    #[test]
    fn coin_views() {
        let status = EventRecord {
            result_a: 0,
            result_b: 2,
        };
        match status.coin_event() {
            CoinEvent::Status(code) => {
                assert_eq!(code.rejection(), CoinRejection::Rejected);
            }
            other => panic!("unexpected {:?}", other),
        }

        let credit = EventRecord {
            result_a: 3,
            result_b: 1,
        };
        assert_eq!(
            credit.coin_event(),
            CoinEvent::Credit {
                position: 3,
                sorter_path: 1
            }
        );
    }

    #[test]
    fn bill_views() {
        let escrow = EventRecord {
            result_a: 7,
            result_b: 1,
        };
        assert_eq!(
            escrow.bill_event(),
            BillEvent::Credit {
                position: 7,
                code: crate::device::codes::BillSuccess::HeldInEscrow
            }
        );
    }

    #[test]
    fn counter_wrap_skips_zero() {
        // 254 -> 2 passes through 255, 1, 2: three new events.
        assert_eq!(counter_delta(254, 2), 3);
        // 253 -> 2: 254, 255, 1, 2.
        assert_eq!(counter_delta(253, 2), 4);
        assert_eq!(counter_delta(5, 5), 0);
        assert_eq!(counter_delta(1, 6), 5);
        assert_eq!(counter_delta(255, 1), 1);
    }
}
