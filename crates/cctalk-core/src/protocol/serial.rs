//! Serial port handling
//!
//! Low-level serial access for the ccTalk bus, behind the [`SerialLink`]
//! trait so the transport can be exercised against an in-memory
//! implementation in tests.

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Byte-level access to the half-duplex serial line.
///
/// `read_chunk` blocks for at most `timeout` waiting for at least one byte
/// and reports a timeout through `io::ErrorKind::TimedOut`.
pub trait SerialLink: Send {
    /// Open the line. Opening an already-open line closes it first.
    fn open(&mut self) -> Result<(), ProtocolError>;

    /// Close the line. Closing a closed line is a no-op.
    fn close(&mut self);

    /// Write a complete frame within `timeout`.
    fn write_frame(&mut self, data: &[u8], timeout: Duration) -> io::Result<()>;

    /// Read whatever bytes are available, waiting up to `timeout` for the
    /// first of them.
    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// [`SerialLink`] over a real serial port: 8 data bits, no parity, one stop
/// bit, no flow control.
pub struct PortLink {
    name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl PortLink {
    /// Create an unopened link for the named port.
    pub fn new(name: impl Into<String>, baud_rate: Option<u32>) -> Self {
        Self {
            name: name.into(),
            baud_rate: baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            port: None,
        }
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port is not open"))
    }
}

impl SerialLink for PortLink {
    fn open(&mut self) -> Result<(), ProtocolError> {
        if self.port.is_some() {
            self.close();
        }

        let port = serialport::new(self.name.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(super::DEFAULT_RESPONSE_TIMEOUT_MS))
            .open()
            .map_err(|e| ProtocolError::Serial(format!("can't open port {}: {}", self.name, e)))?;

        log::debug!("opened serial port {} at {} baud", self.name, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("closed serial port {}", self.name);
        }
    }

    fn write_frame(&mut self, data: &[u8], timeout: Duration) -> io::Result<()> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        port.write_all(data)
    }

    fn read_chunk(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        port.read(buf)
    }
}

/// Information about an available serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Manufacturer name (if the port is a USB device).
    pub manufacturer: Option<String>,
    /// Product name (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => (usb.manufacturer, usb.product, usb.serial_number),
            _ => (None, None, None),
        };
        Self {
            name: info.port_name,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// List candidate serial ports, sorted by name so the result is stable
/// across calls. ccTalk imposes no naming convention on the host side;
/// which port a device hangs off is configuration, not discovery.
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    ports
}
