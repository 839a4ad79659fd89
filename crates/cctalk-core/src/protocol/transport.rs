//! Blocking serial transport
//!
//! Performs one write-then-read exchange per request on the half-duplex
//! line and runs the exchanges on a dedicated I/O worker thread. Exactly
//! one [`TransportEvent`] is produced per accepted command.

use std::io;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::serial::SerialLink;
use super::INTER_BYTE_TIMEOUT_MS;

/// A serialized request handed to the I/O worker.
#[derive(Debug, Clone)]
pub struct Request {
    /// Link-assigned request ID, never zero.
    pub id: u64,
    /// The complete frame, including the checksum byte.
    pub frame: Vec<u8>,
    /// Whether to wait for a response after writing.
    pub needs_response: bool,
    /// Budget for flushing the request onto the wire.
    pub write_timeout: Duration,
    /// Budget for the first byte of the response.
    pub response_timeout: Duration,
}

/// Commands accepted by the I/O worker thread.
pub enum WorkerCommand {
    /// Open the port (closing it first if already open).
    Open,
    /// Close the port.
    Close,
    /// Perform one request/response exchange.
    Send(Request),
    /// Close the port and exit the worker thread.
    Shutdown,
}

/// Completion events reported by the I/O worker thread.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The port was opened.
    PortOpen,
    /// The port could not be opened, or an I/O error interrupted an
    /// exchange.
    PortError(String),
    /// A no-response request was flushed onto the wire.
    RequestWritten(u64),
    /// A response was captured; the transmit echo has been stripped.
    ResponseReceived(u64, Vec<u8>),
    /// The request could not be flushed within its write timeout.
    WriteTimeout(u64),
    /// No response byte arrived within the response timeout.
    ResponseTimeout(u64),
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// One blocking exchange at a time over a [`SerialLink`].
pub struct Transport {
    link: Box<dyn SerialLink>,
}

impl Transport {
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self { link }
    }

    /// Open the underlying line.
    pub fn open(&mut self) -> Result<(), super::ProtocolError> {
        self.link.open()
    }

    /// Close the underlying line.
    pub fn close(&mut self) {
        self.link.close();
    }

    /// Perform one request/response exchange, producing exactly one event.
    pub fn exchange(&mut self, request: &Request) -> TransportEvent {
        log::trace!("#{} tx {:02x?}", request.id, request.frame);

        if let Err(e) = self.link.write_frame(&request.frame, request.write_timeout) {
            return if is_timeout(&e) {
                TransportEvent::WriteTimeout(request.id)
            } else {
                TransportEvent::PortError(e.to_string())
            };
        }

        if !request.needs_response {
            return TransportEvent::RequestWritten(request.id);
        }

        let mut captured = Vec::new();
        let mut buf = [0u8; 256];

        // First chunk gets the full response budget.
        match self.link.read_chunk(&mut buf, request.response_timeout) {
            Ok(0) => return TransportEvent::ResponseTimeout(request.id),
            Ok(n) => captured.extend_from_slice(&buf[..n]),
            Err(e) if is_timeout(&e) => return TransportEvent::ResponseTimeout(request.id),
            Err(e) => return TransportEvent::PortError(e.to_string()),
        }

        // Keep appending until the quiet window expires.
        let quiet = Duration::from_millis(INTER_BYTE_TIMEOUT_MS);
        loop {
            match self.link.read_chunk(&mut buf, quiet) {
                Ok(0) => break,
                Ok(n) => captured.extend_from_slice(&buf[..n]),
                Err(e) if is_timeout(&e) => break,
                Err(e) => return TransportEvent::PortError(e.to_string()),
            }
        }

        // The line echoes our own transmission; the first len(frame) bytes
        // of the capture are the request itself.
        log::trace!("#{} rx {:02x?}", request.id, captured);
        let reply = captured.split_off(request.frame.len().min(captured.len()));
        TransportEvent::ResponseReceived(request.id, reply)
    }
}

/// Run a [`Transport`] on a dedicated worker thread fed by `commands`.
///
/// The worker exits when it receives [`WorkerCommand::Shutdown`], when the
/// command channel disconnects, or when the event channel has no receiver
/// left.
pub fn spawn_worker(
    mut transport: Transport,
    commands: Receiver<WorkerCommand>,
    events: Sender<TransportEvent>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cctalk-io".into())
        .spawn(move || {
            for command in commands {
                match command {
                    WorkerCommand::Open => {
                        let event = match transport.open() {
                            Ok(()) => TransportEvent::PortOpen,
                            Err(e) => TransportEvent::PortError(e.to_string()),
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    WorkerCommand::Close => transport.close(),
                    WorkerCommand::Send(request) => {
                        let event = transport.exchange(&request);
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    WorkerCommand::Shutdown => break,
                }
            }
            transport.close();
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ProtocolError;

    /// Line that echoes writes and then plays back a scripted tail.
    struct EchoLine {
        pending: Vec<u8>,
        tail: Vec<u8>,
    }

    impl EchoLine {
        fn new(tail: Vec<u8>) -> Self {
            Self {
                pending: Vec::new(),
                tail,
            }
        }
    }

    impl SerialLink for EchoLine {
        fn open(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }

        fn close(&mut self) {}

        fn write_frame(&mut self, data: &[u8], _timeout: Duration) -> io::Result<()> {
            self.pending.extend_from_slice(data);
            self.pending.append(&mut self.tail);
            Ok(())
        }

        fn read_chunk(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
            if self.pending.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "quiet"));
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn request(frame: Vec<u8>) -> Request {
        Request {
            id: 7,
            frame,
            needs_response: true,
            write_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn strips_transmit_echo() {
        let mut transport = Transport::new(Box::new(EchoLine::new(vec![1, 0, 2, 0, 253])));
        let event = transport.exchange(&request(vec![2, 0, 1, 254, 255]));
        match event {
            TransportEvent::ResponseReceived(7, reply) => {
                assert_eq!(reply, vec![1, 0, 2, 0, 253]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn echo_only_capture_yields_empty_reply() {
        // A device that never answers still leaves the echo on the line.
        let mut transport = Transport::new(Box::new(EchoLine::new(vec![])));
        let event = transport.exchange(&request(vec![2, 0, 1, 254, 255]));
        match event {
            TransportEvent::ResponseReceived(7, reply) => assert!(reply.is_empty()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn quiet_line_times_out() {
        struct DeadLine;
        impl SerialLink for DeadLine {
            fn open(&mut self) -> Result<(), ProtocolError> {
                Ok(())
            }
            fn close(&mut self) {}
            fn write_frame(&mut self, _data: &[u8], _timeout: Duration) -> io::Result<()> {
                Ok(())
            }
            fn read_chunk(&mut self, _buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::TimedOut, "quiet"))
            }
        }

        let mut transport = Transport::new(Box::new(DeadLine));
        let event = transport.exchange(&request(vec![2, 0, 1, 254, 255]));
        assert!(matches!(event, TransportEvent::ResponseTimeout(7)));
    }

    #[test]
    fn no_response_request_reports_written() {
        let mut transport = Transport::new(Box::new(EchoLine::new(vec![])));
        let mut req = request(vec![2, 0, 1, 1, 252]);
        req.needs_response = false;
        let event = transport.exchange(&req);
        assert!(matches!(event, TransportEvent::RequestWritten(7)));
    }
}
