//! Link controller
//!
//! Owns the I/O worker thread and the request lifecycle: assigns request
//! IDs, frames commands, enforces the one-request-in-flight discipline and
//! validates reply structure. Submission returns the request ID
//! synchronously; [`LinkController::wait`] is the one-shot completion sink
//! and delivers exactly one outcome per accepted request.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use super::commands::Header;
use super::frame::Frame;
use super::serial::SerialLink;
use super::transport::{spawn_worker, Request, Transport, TransportEvent, WorkerCommand};
use super::{ProtocolError, DEFAULT_RESPONSE_TIMEOUT_MS, HOST_ADDRESS, MAX_PAYLOAD};

/// A validated reply payload together with the request it answers.
#[derive(Debug, Clone)]
pub struct Reply {
    /// ID of the request this reply answers.
    pub request_id: u64,
    /// Reply payload. Empty means ACK.
    pub payload: Vec<u8>,
}

impl Reply {
    /// True if the reply is a bare ACK.
    pub fn is_ack(&self) -> bool {
        self.payload.is_empty()
    }
}

/// ccTalk link to one device address.
pub struct LinkController {
    commands: Sender<WorkerCommand>,
    events: Receiver<TransportEvent>,
    worker: Option<JoinHandle<()>>,
    address: u8,
    checksum_16bit: bool,
    des_encrypted: bool,
    request_counter: u64,
}

impl LinkController {
    /// Create a controller and start its I/O worker thread. The port is not
    /// opened until [`LinkController::open_port`] is called.
    pub fn new(
        link: Box<dyn SerialLink>,
        address: u8,
        checksum_16bit: bool,
        des_encrypted: bool,
    ) -> Result<Self, ProtocolError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let worker = spawn_worker(Transport::new(link), command_rx, event_tx)?;
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            worker: Some(worker),
            address,
            checksum_16bit,
            des_encrypted,
            request_counter: 0,
        })
    }

    /// Configured device address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Open the serial port, blocking until the worker reports the outcome.
    pub fn open_port(&mut self) -> Result<(), ProtocolError> {
        self.commands
            .send(WorkerCommand::Open)
            .map_err(|_| ProtocolError::WorkerGone)?;
        loop {
            match self.events.recv().map_err(|_| ProtocolError::WorkerGone)? {
                TransportEvent::PortOpen => return Ok(()),
                TransportEvent::PortError(msg) => return Err(ProtocolError::Serial(msg)),
                other => log::debug!("discarding stale transport event {:?}", other),
            }
        }
    }

    /// Close the serial port.
    pub fn close_port(&mut self) {
        let _ = self.commands.send(WorkerCommand::Close);
    }

    /// Submit a request. Returns the assigned request ID; the completion is
    /// collected with [`LinkController::wait`].
    pub fn submit(
        &mut self,
        header: Header,
        data: &[u8],
        response_timeout: Option<Duration>,
    ) -> Result<u64, ProtocolError> {
        if self.des_encrypted {
            return Err(ProtocolError::EncryptionUnsupported);
        }
        if self.checksum_16bit {
            return Err(ProtocolError::Checksum16Unsupported);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(data.len()));
        }

        let frame = Frame::new(self.address, HOST_ADDRESS, header.byte(), data.to_vec()).to_bytes();

        // Request IDs are strictly increasing and never zero; zero is
        // reserved for "no request".
        self.request_counter = self.request_counter.wrapping_add(1);
        if self.request_counter == 0 {
            self.request_counter = 1;
        }
        let id = self.request_counter;

        // Generous write budget: a frame takes ~1.04 ms per byte at 9600 baud.
        let write_timeout = Duration::from_millis(500 + 2 * frame.len() as u64);
        let response_timeout =
            response_timeout.unwrap_or(Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS));

        log::debug!(
            "> #{} {} to address {}, data {:02x?}",
            id,
            header.name(),
            self.address,
            data
        );

        self.commands
            .send(WorkerCommand::Send(Request {
                id,
                frame,
                needs_response: true,
                write_timeout,
                response_timeout,
            }))
            .map_err(|_| ProtocolError::WorkerGone)?;
        Ok(id)
    }

    /// Block until the request completes, then validate the reply frame.
    /// Invoked exactly once per accepted request.
    pub fn wait(&mut self, id: u64) -> Result<Reply, ProtocolError> {
        loop {
            let event = self.events.recv().map_err(|_| ProtocolError::WorkerGone)?;
            match event {
                TransportEvent::ResponseReceived(rid, raw) if rid == id => {
                    return self.validate_reply(id, &raw);
                }
                TransportEvent::ResponseTimeout(rid) if rid == id => {
                    return Err(ProtocolError::ResponseTimeout(id));
                }
                TransportEvent::WriteTimeout(rid) if rid == id => {
                    return Err(ProtocolError::WriteTimeout(id));
                }
                TransportEvent::RequestWritten(rid) if rid == id => {
                    return Ok(Reply {
                        request_id: id,
                        payload: Vec::new(),
                    });
                }
                TransportEvent::PortError(msg) => return Err(ProtocolError::Serial(msg)),
                other => log::debug!("discarding stale transport event {:?}", other),
            }
        }
    }

    /// Submit a request and wait for its completion.
    pub fn transfer(
        &mut self,
        header: Header,
        data: &[u8],
        response_timeout: Option<Duration>,
    ) -> Result<Reply, ProtocolError> {
        let id = self.submit(header, data, response_timeout)?;
        self.wait(id)
    }

    fn validate_reply(&self, id: u64, raw: &[u8]) -> Result<Reply, ProtocolError> {
        let frame = Frame::from_bytes(raw)?;

        // This driver is the only host on the bus.
        if frame.destination != HOST_ADDRESS {
            return Err(ProtocolError::BadDestination(frame.destination));
        }
        if self.address != 0 && frame.source != self.address {
            return Err(ProtocolError::BadSource {
                expected: self.address,
                actual: frame.source,
            });
        }
        // The device never initiates commands; every reply carries header 0.
        if frame.header != Header::Reply.byte() {
            return Err(ProtocolError::UnexpectedHeader(frame.header));
        }

        log::debug!("< #{} reply, data {:02x?}", id, frame.payload);
        Ok(Reply {
            request_id: id,
            payload: frame.payload,
        })
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
