//! Shared test support: a scripted fake device behind an in-memory
//! [`SerialLink`] that emulates the half-duplex echo.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cctalk_core::config::DeviceConfig;
use cctalk_core::device::{Device, DeviceEvent, DeviceState, Identifier};
use cctalk_core::protocol::{Frame, ProtocolError, SerialLink};

/// A scripted device on the far end of the line.
pub struct FakeDevice {
    pub address: u8,
    pub category: String,
    /// Identifier strings by position.
    pub ids: BTreeMap<u8, Vec<u8>>,
    /// Country scaling replies by two-character country code.
    pub country_scaling: BTreeMap<String, (u16, u8)>,
    /// `GetVariableSet` reply; `None` means the command is unsupported.
    pub variable_set: Option<Vec<u8>>,
    /// `GetPollingPriority` reply (unit, value).
    pub polling_priority: [u8; 2],
    pub fault_code: u8,
    pub event_counter: u8,
    /// Rolling event buffer, newest first, at most five entries.
    pub events: Vec<(u8, u8)>,
    pub master_inhibit: bool,
    /// Recorded `RouteBill` arguments.
    pub routed: Vec<u8>,
    /// Recorded `SetInhibitStatus` masks.
    pub inhibit_masks: Vec<(u8, u8)>,
    /// Recorded `SetBillOperatingMode` masks.
    pub operating_modes: Vec<u8>,
    /// Answer nothing at all (the echo still appears on the line).
    pub silent: bool,
    /// Corrupt the checksum of every reply.
    pub corrupt_checksum: bool,
    /// Reply with a wrong source address.
    pub source_override: Option<u8>,
}

impl FakeDevice {
    pub fn coin_acceptor(address: u8) -> Self {
        Self::new(address, "Coin Acceptor")
    }

    pub fn bill_validator(address: u8) -> Self {
        Self::new(address, "Bill Validator")
    }

    fn new(address: u8, category: &str) -> Self {
        Self {
            address,
            category: category.to_string(),
            ids: BTreeMap::new(),
            country_scaling: BTreeMap::new(),
            variable_set: None,
            polling_priority: [2, 10], // 100 ms
            fault_code: 0,
            event_counter: 0,
            events: Vec::new(),
            master_inhibit: true,
            routed: Vec::new(),
            inhibit_masks: Vec::new(),
            operating_modes: Vec::new(),
            silent: false,
            corrupt_checksum: false,
            source_override: None,
        }
    }

    fn is_coin(&self) -> bool {
        self.category == "Coin Acceptor"
    }

    /// Append a new event and advance the counter, wrapping 255 -> 1.
    pub fn push_event(&mut self, result_a: u8, result_b: u8) {
        self.events.insert(0, (result_a, result_b));
        self.events.truncate(5);
        self.event_counter = if self.event_counter == 255 {
            1
        } else {
            self.event_counter + 1
        };
    }

    fn event_window(&self) -> Vec<u8> {
        let mut payload = vec![self.event_counter];
        for slot in 0..5 {
            let (a, b) = self.events.get(slot).copied().unwrap_or((0, 0));
            payload.push(a);
            payload.push(b);
        }
        payload
    }

    fn respond(&mut self, request: &Frame) -> Option<Vec<u8>> {
        if self.silent || request.destination != self.address {
            return None;
        }

        let payload: Vec<u8> = match request.header {
            // SimplePoll
            254 => vec![],
            // GetEquipmentCategory
            245 => self.category.as_bytes().to_vec(),
            // GetProductCode
            244 => b"FAKE-100".to_vec(),
            // GetBuildCode
            192 => b"B2".to_vec(),
            // GetManufacturer
            246 => b"ACME".to_vec(),
            // GetSerialNumber
            242 => vec![0x01, 0x02, 0x03],
            // GetSoftwareRevision
            241 => b"1.2.3".to_vec(),
            // GetCommsRevision
            4 => vec![1, 4, 2],
            // GetPollingPriority
            249 => self.polling_priority.to_vec(),
            // GetVariableSet
            247 => self.variable_set.clone()?,
            // GetCoinId / GetBillId
            184 | 157 => {
                let position = *request.payload.first()?;
                let width = if request.header == 184 { 6 } else { 7 };
                self.ids
                    .get(&position)
                    .cloned()
                    .unwrap_or_else(|| vec![b'.'; width])
            }
            // GetCountryScalingFactor
            156 => {
                let country = String::from_utf8_lossy(&request.payload).to_string();
                let (factor, decimals) = self
                    .country_scaling
                    .get(&country)
                    .copied()
                    .unwrap_or((0, 0));
                vec![(factor & 0xff) as u8, (factor >> 8) as u8, decimals]
            }
            // SetInhibitStatus
            231 => {
                let lo = *request.payload.first()?;
                let hi = *request.payload.get(1)?;
                self.inhibit_masks.push((lo, hi));
                vec![]
            }
            // SetMasterInhibitStatus
            228 => {
                self.master_inhibit = request.payload.first()? & 1 == 0;
                vec![]
            }
            // GetMasterInhibitStatus
            227 => vec![u8::from(!self.master_inhibit)],
            // SetBillOperatingMode
            153 => {
                self.operating_modes.push(*request.payload.first()?);
                vec![]
            }
            // ReadBufferedCredit / ReadBufferedBillEvents
            229 | 159 => self.event_window(),
            // RouteBill
            154 => {
                self.routed.push(*request.payload.first()?);
                vec![]
            }
            // PerformSelfCheck
            232 => vec![self.fault_code],
            // ResetDevice
            1 => {
                self.event_counter = 0;
                self.events.clear();
                vec![]
            }
            _ => return None,
        };

        let source = self.source_override.unwrap_or(self.address);
        let mut reply = Frame::new(1, source, 0, payload).to_bytes();
        if self.corrupt_checksum {
            let last = reply.len() - 1;
            reply[last] ^= 0xff;
        }
        Some(reply)
    }
}

/// In-memory serial line connected to a [`FakeDevice`]. Writes are echoed
/// back (the bus is half duplex) before any device reply.
pub struct MockLink {
    device: Arc<Mutex<FakeDevice>>,
    pending: Vec<u8>,
    /// Clear to emulate a line that does not even echo (dead port).
    pub echo: bool,
}

impl MockLink {
    pub fn new(device: Arc<Mutex<FakeDevice>>) -> Self {
        Self {
            device,
            pending: Vec::new(),
            echo: true,
        }
    }
}

impl SerialLink for MockLink {
    fn open(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn write_frame(&mut self, data: &[u8], _timeout: Duration) -> io::Result<()> {
        if self.echo {
            self.pending.extend_from_slice(data);
        }
        if let Ok(frame) = Frame::from_bytes(data) {
            let mut device = self.device.lock().expect("device mutex");
            if let Some(reply) = device.respond(&frame) {
                self.pending.extend_from_slice(&reply);
            }
        }
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "line is quiet"));
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// A fast-polling config pointed at the fake device.
pub fn test_config(address: u8) -> DeviceConfig {
    DeviceConfig {
        address,
        poll_interval_ms: Some(5),
        ..DeviceConfig::default()
    }
}

/// Spawn a supervised device over a fresh [`MockLink`].
pub fn start_device(config: DeviceConfig, device: &Arc<Mutex<FakeDevice>>) -> Device {
    Device::with_link(config, Box::new(MockLink::new(device.clone()))).expect("device starts")
}

pub fn wait_for_state(device: &Device, target: DeviceState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if device.state() == target {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Wait for the next credit event, discarding everything else.
pub fn next_credit(
    events: &Receiver<DeviceEvent>,
    timeout: Duration,
) -> Option<(u8, Identifier)> {
    let deadline = Instant::now() + timeout;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        match events.recv_timeout(deadline.duration_since(now)) {
            Ok(DeviceEvent::CreditAccepted {
                position,
                identifier,
            }) => return Some((position, identifier)),
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Wait until the fake device has recorded at least `count` routing
/// requests, returning them.
pub fn wait_for_routes(
    device: &Arc<Mutex<FakeDevice>>,
    count: usize,
    timeout: Duration,
) -> Vec<u8> {
    let deadline = Instant::now() + timeout;
    loop {
        {
            let locked = device.lock().expect("device mutex");
            if locked.routed.len() >= count {
                return locked.routed.clone();
            }
        }
        if Instant::now() >= deadline {
            let locked = device.lock().expect("device mutex");
            return locked.routed.clone();
        }
        thread::sleep(Duration::from_millis(2));
    }
}
