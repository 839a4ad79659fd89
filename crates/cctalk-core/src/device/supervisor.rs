//! Device supervisor
//!
//! Owns the nine-state lifecycle of one polled device: cold boot through
//! self-identification into credit acceptance, with recovery from faults
//! and external resets. The supervisor runs on its own thread as a
//! channel-driven loop; the poll timer is the loop's receive deadline, so
//! ticks, control requests and sequencer steps never interleave.
//!
//! Hosts talk to the supervisor through the [`Device`] handle.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::DeviceConfig;
use crate::protocol::{
    commands, Header, LinkController, PortLink, ProtocolError, Reply, SerialLink,
};

use super::codes::{
    BillEventType, BillRoute, BillRouteStatus, BillSuccess, Category, CoinRejection, FaultCode,
};
use super::event::{counter_delta, decode_event_window, BillEvent, CoinEvent, EventRecord};
use super::identifier::{is_empty_slot, CountryScalingData, Identifier};
use super::sequencer::{Flow, Sequencer};
use super::state::DeviceState;

/// Default polling interval for the working states, used when the device
/// does not report a usable one.
const DEFAULT_NORMAL_POLL_MS: u64 = 100;

/// Polling interval while the device is down or unusable.
const NOT_ALIVE_POLL_MS: u64 = 1000;

/// Device-recommended intervals above this are considered invalid.
const MAX_DEVICE_POLL_MS: u64 = 1000;

/// Decides whether a bill held in escrow is accepted. Consulted once per
/// escrow event while in `NormalAccepting`.
pub type BillValidatorFn = Arc<dyn Fn(u8, &Identifier) -> bool + Send + Sync>;

/// Events published to host subscribers.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Human-readable driver trace.
    Log(String),
    /// The device state changed; fires only on a real change.
    StateChanged {
        old: DeviceState,
        new: DeviceState,
    },
    /// A credit is owed to the customer.
    CreditAccepted {
        position: u8,
        identifier: Identifier,
    },
    /// A reply was well-formed on the wire but not decodable as the
    /// expected command payload.
    DecodeError { request_id: u64, message: String },
}

/// Driver-level errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error(transparent)]
    Link(#[from] ProtocolError),

    #[error("Request #{request_id}: {message}")]
    Decode { request_id: u64, message: String },

    #[error("Operation not valid in state {0}")]
    InvalidState(DeviceState),

    #[error("Unsupported equipment category \"{0}\"")]
    UnsupportedCategory(String),

    #[error("Initialization aborted")]
    Aborted,

    #[error("The device supervisor is gone")]
    SupervisorGone,
}

/// Self-identification data collected during initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManufacturingInfo {
    /// Category name exactly as reported by the device.
    pub equipment_category: String,
    pub product_code: String,
    pub build_code: String,
    pub manufacturer: String,
    /// Serial number bytes in hex.
    pub serial_number: String,
    pub software_revision: String,
    /// ccTalk command set revision, e.g. "release 1, version 4.2".
    pub comms_revision: String,
}

/// Snapshot shared between the supervisor thread and the handle getters.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    state: DeviceState,
    category: Category,
    identifiers: BTreeMap<u8, Identifier>,
    polling_interval_ms: u64,
    manufacturing_info: ManufacturingInfo,
}

enum ControlMsg {
    Initialize(Sender<Result<(), DeviceError>>),
    Shutdown(Sender<Result<(), DeviceError>>),
    SwitchState(DeviceState, Sender<Result<(), DeviceError>>),
    Reset(Sender<Result<(), DeviceError>>),
    QueryMasterInhibit(Sender<Result<bool, DeviceError>>),
    SetBillValidator(BillValidatorFn),
    Subscribe(Sender<DeviceEvent>),
    Stop,
}

/// Handle to a supervised ccTalk device.
///
/// Control calls block until the supervisor has carried out the operation
/// and report its outcome exactly once. Getters read a snapshot and never
/// touch the wire.
pub struct Device {
    control: Sender<ControlMsg>,
    shared: Arc<Mutex<Snapshot>>,
    supervisor: Option<JoinHandle<()>>,
}

impl Device {
    /// Open the configured serial port and start the supervisor. The device
    /// starts in `ShutDown`; call [`Device::initialize`] to bring it up.
    pub fn open(config: DeviceConfig) -> Result<Device, DeviceError> {
        let link = PortLink::new(config.port_name.clone(), Some(config.baud_rate));
        Device::with_link(config, Box::new(link))
    }

    /// Start the supervisor over an arbitrary [`SerialLink`].
    pub fn with_link(
        config: DeviceConfig,
        link: Box<dyn SerialLink>,
    ) -> Result<Device, DeviceError> {
        let mut controller = LinkController::new(
            link,
            config.address,
            config.checksum_16bit,
            config.des_encrypted,
        )?;
        controller.open_port()?;

        let shared = Arc::new(Mutex::new(Snapshot::default()));
        let (control_tx, control_rx) = mpsc::channel();
        let supervisor = DeviceSupervisor::new(config, controller, shared.clone());
        let handle = thread::Builder::new()
            .name("cctalk-device".into())
            .spawn(move || supervisor.run(control_rx))
            .map_err(ProtocolError::Io)?;

        Ok(Device {
            control: control_tx,
            shared,
            supervisor: Some(handle),
        })
    }

    fn call(
        &self,
        make: impl FnOnce(Sender<Result<(), DeviceError>>) -> ControlMsg,
    ) -> Result<(), DeviceError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.control
            .send(make(reply_tx))
            .map_err(|_| DeviceError::SupervisorGone)?;
        reply_rx.recv().map_err(|_| DeviceError::SupervisorGone)?
    }

    /// Bring the device from `ShutDown` to `Initialized` and start polling.
    pub fn initialize(&self) -> Result<(), DeviceError> {
        self.call(ControlMsg::Initialize)
    }

    /// Switch the device to `ShutDown` from any state and stop polling.
    pub fn shutdown(&self) -> Result<(), DeviceError> {
        self.call(ControlMsg::Shutdown)
    }

    /// Request a state switch, e.g. into `NormalAccepting`.
    pub fn request_switch_state(&self, target: DeviceState) -> Result<(), DeviceError> {
        self.call(|reply| ControlMsg::SwitchState(target, reply))
    }

    /// Soft-reset the device; on ACK the state drops to
    /// `UninitializedDown` and the alive polling picks it back up.
    pub fn reset(&self) -> Result<(), DeviceError> {
        self.call(ControlMsg::Reset)
    }

    /// Read the master inhibit status back from the device. `true` means
    /// the device is rejecting everything.
    pub fn master_inhibit(&self) -> Result<bool, DeviceError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.control
            .send(ControlMsg::QueryMasterInhibit(reply_tx))
            .map_err(|_| DeviceError::SupervisorGone)?;
        reply_rx.recv().map_err(|_| DeviceError::SupervisorGone)?
    }

    /// Install the escrow decision function for bill validators.
    pub fn set_bill_validator(
        &self,
        validator: impl Fn(u8, &Identifier) -> bool + Send + Sync + 'static,
    ) {
        let _ = self
            .control
            .send(ControlMsg::SetBillValidator(Arc::new(validator)));
    }

    /// Subscribe to driver events. Each subscriber gets every event
    /// published after the subscription.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (event_tx, event_rx) = mpsc::channel();
        let _ = self.control.send(ControlMsg::Subscribe(event_tx));
        event_rx
    }

    fn snapshot(&self) -> Snapshot {
        self.shared.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Current device state.
    pub fn state(&self) -> DeviceState {
        self.snapshot().state
    }

    /// Equipment category, known once initialized.
    pub fn category(&self) -> Category {
        self.snapshot().category
    }

    /// Coin/bill identifiers by position, known once initialized.
    pub fn identifiers(&self) -> BTreeMap<u8, Identifier> {
        self.snapshot().identifiers
    }

    /// Effective polling interval for the working states, in milliseconds.
    pub fn polling_interval_ms(&self) -> u64 {
        self.snapshot().polling_interval_ms
    }

    /// Self-identification data, known once initialized.
    pub fn manufacturing_info(&self) -> ManufacturingInfo {
        self.snapshot().manufacturing_info
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let _ = self.control.send(ControlMsg::Stop);
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}

struct DeviceSupervisor {
    config: DeviceConfig,
    link: LinkController,
    shared: Arc<Mutex<Snapshot>>,

    state: DeviceState,
    category: Category,
    manufacturing_info: ManufacturingInfo,
    identifiers: BTreeMap<u8, Identifier>,
    country_scaling: BTreeMap<String, CountryScalingData>,

    normal_polling_interval: Duration,
    not_alive_polling_interval: Duration,
    poll_interval: Duration,
    next_tick: Option<Instant>,

    last_event_num: u8,
    event_log_read: bool,

    bill_validator: Option<BillValidatorFn>,
    subscribers: Vec<Sender<DeviceEvent>>,
}

impl DeviceSupervisor {
    fn new(config: DeviceConfig, link: LinkController, shared: Arc<Mutex<Snapshot>>) -> Self {
        Self {
            config,
            link,
            shared,
            state: DeviceState::ShutDown,
            category: Category::Unknown,
            manufacturing_info: ManufacturingInfo::default(),
            identifiers: BTreeMap::new(),
            country_scaling: BTreeMap::new(),
            normal_polling_interval: Duration::from_millis(DEFAULT_NORMAL_POLL_MS),
            not_alive_polling_interval: Duration::from_millis(NOT_ALIVE_POLL_MS),
            poll_interval: Duration::from_millis(NOT_ALIVE_POLL_MS),
            next_tick: None,
            last_event_num: 0,
            event_log_read: false,
            bill_validator: None,
            subscribers: Vec::new(),
        }
    }

    fn run(mut self, control: Receiver<ControlMsg>) {
        loop {
            let message = match self.next_tick {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.tick();
                        self.rearm_timer();
                        continue;
                    }
                    match control.recv_timeout(deadline.duration_since(now)) {
                        Ok(message) => Some(message),
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                None => match control.recv() {
                    Ok(message) => Some(message),
                    Err(_) => return,
                },
            };

            if let Some(message) = message {
                if !self.handle_control(message) {
                    return;
                }
            }
        }
    }

    fn handle_control(&mut self, message: ControlMsg) -> bool {
        match message {
            ControlMsg::Initialize(reply) => {
                let result = if self.state != DeviceState::ShutDown {
                    self.log(format!(
                        "Cannot initialize a device in {} state",
                        self.state
                    ));
                    Err(DeviceError::InvalidState(self.state))
                } else {
                    self.switch_to(DeviceState::Initialized)
                };
                let _ = reply.send(result);
            }
            ControlMsg::Shutdown(reply) => {
                let _ = reply.send(self.switch_to(DeviceState::ShutDown));
            }
            ControlMsg::SwitchState(target, reply) => {
                let _ = reply.send(self.request_switch(target));
            }
            ControlMsg::Reset(reply) => {
                let _ = reply.send(self.reset_device());
            }
            ControlMsg::QueryMasterInhibit(reply) => {
                let _ = reply.send(self.master_inhibit());
            }
            ControlMsg::SetBillValidator(validator) => {
                self.bill_validator = Some(validator);
            }
            ControlMsg::Subscribe(subscriber) => {
                self.subscribers.push(subscriber);
            }
            ControlMsg::Stop => return false,
        }
        true
    }

    // --- events and shared snapshot ---

    fn emit(&mut self, event: DeviceEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!("{message}");
        self.emit(DeviceEvent::Log(message));
    }

    fn decode_error(&mut self, request_id: u64, message: impl Into<String>) -> DeviceError {
        let message = message.into();
        self.emit(DeviceEvent::DecodeError {
            request_id,
            message: message.clone(),
        });
        self.emit(DeviceEvent::Log(message.clone()));
        DeviceError::Decode {
            request_id,
            message,
        }
    }

    fn sync_shared(&mut self) {
        if let Ok(mut shared) = self.shared.lock() {
            shared.state = self.state;
            shared.category = self.category;
            shared.identifiers = self.identifiers.clone();
            shared.polling_interval_ms = self.normal_polling_interval.as_millis() as u64;
            shared.manufacturing_info = self.manufacturing_info.clone();
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.state == state {
            return;
        }
        let old = self.state;
        self.state = state;
        self.sync_shared();
        self.log(format!("Device state changed to {state}"));
        self.emit(DeviceEvent::StateChanged { old, new: state });
    }

    // --- poll timer ---

    fn set_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
        if self.next_tick.is_some() {
            self.next_tick = Some(Instant::now() + interval);
        }
    }

    fn start_timer(&mut self) {
        self.log("Starting poll timer");
        // Tick immediately; the interval applies from the second tick on.
        self.next_tick = Some(Instant::now());
    }

    fn stop_timer(&mut self) {
        if self.next_tick.take().is_some() {
            self.log("Stopping poll timer");
        }
    }

    fn rearm_timer(&mut self) {
        if self.next_tick.is_some() {
            self.next_tick = Some(Instant::now() + self.poll_interval);
        }
    }

    // --- state machine ---

    fn request_switch(&mut self, target: DeviceState) -> Result<(), DeviceError> {
        if target == self.state {
            // Already there; switch_to logs and reports success.
            return self.switch_to(target);
        }

        let allowed = match target {
            DeviceState::ShutDown => true,
            DeviceState::Initialized => matches!(
                self.state,
                DeviceState::ShutDown
                    | DeviceState::UninitializedDown
                    | DeviceState::UnexpectedDown
                    | DeviceState::ExternalReset
            ),
            // Hosts only toggle between rejecting and accepting, and
            // between rejecting and diagnostics. The edges out of
            // Initialized are driven by the first poll tick's self check,
            // and a fault takes NormalAccepting to DiagnosticsPolling via
            // the event-log processor, never on request.
            DeviceState::NormalAccepting => self.state == DeviceState::NormalRejecting,
            DeviceState::NormalRejecting => matches!(
                self.state,
                DeviceState::NormalAccepting | DeviceState::DiagnosticsPolling
            ),
            DeviceState::DiagnosticsPolling => self.state == DeviceState::NormalRejecting,
            // Set by the supervisor itself, never on request.
            DeviceState::UninitializedDown
            | DeviceState::InitializationFailed
            | DeviceState::UnexpectedDown
            | DeviceState::ExternalReset => false,
        };

        if !allowed {
            self.log(format!(
                "Refusing state switch from {} to {}",
                self.state, target
            ));
            return Err(DeviceError::InvalidState(self.state));
        }
        self.switch_to(target)
    }

    fn switch_to(&mut self, target: DeviceState) -> Result<(), DeviceError> {
        if self.state == target {
            self.log(format!("Already in state {target}"));
            return Ok(());
        }
        self.log(format!(
            "Requested device state change from {} to {}",
            self.state, target
        ));

        match target {
            DeviceState::ShutDown => {
                if self.state == DeviceState::NormalAccepting {
                    if let Err(e) = self.set_master_inhibit(true) {
                        self.log(format!(
                            "Ignoring master inhibit failure during shutdown: {e}"
                        ));
                    }
                }
                self.set_state(DeviceState::ShutDown);
                self.stop_timer();
                // Identifiers, category and the polling interval only live
                // from Initialized to ShutDown.
                self.identifiers.clear();
                self.country_scaling.clear();
                self.category = Category::Unknown;
                self.manufacturing_info = ManufacturingInfo::default();
                self.normal_polling_interval = Duration::from_millis(DEFAULT_NORMAL_POLL_MS);
                self.sync_shared();
                Ok(())
            }

            DeviceState::UninitializedDown => {
                self.set_state(target);
                self.set_interval(self.not_alive_polling_interval);
                Ok(())
            }

            DeviceState::Initialized => match self.run_init_sequence() {
                Ok(()) => {
                    self.set_state(DeviceState::Initialized);
                    self.set_interval(self.normal_polling_interval);
                    self.start_timer();
                    Ok(())
                }
                Err((alive, error)) => {
                    self.log(format!("Initialization failed: {error}"));
                    let fallback = if alive {
                        DeviceState::InitializationFailed
                    } else {
                        DeviceState::UninitializedDown
                    };
                    let _ = self.switch_to(fallback);
                    // Keep polling: a down device is probed until it comes
                    // back; a terminal failure stops the timer on its first
                    // tick.
                    self.next_tick = Some(Instant::now() + self.poll_interval);
                    Err(error)
                }
            },

            DeviceState::InitializationFailed => {
                self.set_state(target);
                self.set_interval(self.not_alive_polling_interval);
                Ok(())
            }

            DeviceState::NormalAccepting => match self.set_master_inhibit(false) {
                Ok(()) => {
                    self.set_state(target);
                    Ok(())
                }
                Err(error) => {
                    let _ = self.switch_to(DeviceState::UnexpectedDown);
                    Err(error)
                }
            },

            DeviceState::NormalRejecting => match self.set_master_inhibit(true) {
                Ok(()) => {
                    self.set_state(target);
                    Ok(())
                }
                Err(error) => {
                    let _ = self.switch_to(DeviceState::UnexpectedDown);
                    Err(error)
                }
            },

            DeviceState::DiagnosticsPolling => {
                // The device has already inhibited itself on a fault; set it
                // anyway in case we got here through a driver decision.
                match self.set_master_inhibit(true) {
                    Ok(()) => {
                        self.set_state(target);
                        self.set_interval(self.normal_polling_interval);
                        Ok(())
                    }
                    Err(error) => {
                        let _ = self.switch_to(DeviceState::UnexpectedDown);
                        Err(error)
                    }
                }
            }

            DeviceState::UnexpectedDown | DeviceState::ExternalReset => {
                self.set_state(target);
                self.set_interval(self.not_alive_polling_interval);
                Ok(())
            }
        }
    }

    // --- poll tick ---

    fn tick(&mut self) {
        match self.state {
            DeviceState::ShutDown => {}

            // See if the device came back, and if so, initialize it.
            DeviceState::UninitializedDown => {
                if self.check_alive().is_ok() {
                    let _ = self.switch_to(DeviceState::Initialized);
                }
            }

            // Freshly initialized: one self check decides between normal
            // rejecting and diagnostics polling.
            DeviceState::Initialized => {
                let fault = self.self_check();
                let target = if fault.is_ok() {
                    DeviceState::NormalRejecting
                } else {
                    DeviceState::DiagnosticsPolling
                };
                let _ = self.switch_to(target);
            }

            DeviceState::InitializationFailed => {
                self.stop_timer();
            }

            DeviceState::NormalAccepting => {
                let first_read = !self.event_log_read;
                let window = self.read_buffered_events();
                self.process_event_log(true, first_read, window);
            }

            DeviceState::NormalRejecting => {
                let first_read = !self.event_log_read;
                let window = self.read_buffered_events();
                self.process_event_log(false, first_read, window);
            }

            // Poll the fault code until it clears.
            DeviceState::DiagnosticsPolling => {
                if self.self_check().is_ok() {
                    let _ = self.switch_to(DeviceState::NormalRejecting);
                }
            }

            // Do not reset the device here: the event log still holds any
            // unprocessed credits. Re-initialize instead.
            DeviceState::UnexpectedDown | DeviceState::ExternalReset => {
                let _ = self.switch_to(DeviceState::Initialized);
            }
        }
    }

    // --- initialization sequence ---

    fn run_init_sequence(&mut self) -> Result<(), (bool, DeviceError)> {
        struct InitRun<'a> {
            dev: &'a mut DeviceSupervisor,
            alive: bool,
            error: Option<DeviceError>,
        }

        let mut seq: Sequencer<'_, InitRun<'_>> = Sequencer::new();

        seq.step("alive check", |run| match run.dev.check_alive() {
            Ok(()) => {
                run.alive = true;
                Flow::Continue
            }
            Err(error) => {
                run.error = Some(error);
                Flow::Stop
            }
        });

        seq.step("manufacturing info", |run| {
            match run.dev.fetch_manufacturing_info() {
                Ok(category) if category.is_supported() => Flow::Continue,
                Ok(category) => {
                    run.error = Some(DeviceError::UnsupportedCategory(category.to_string()));
                    Flow::Stop
                }
                Err(error) => {
                    run.error = Some(error);
                    Flow::Stop
                }
            }
        });

        seq.step("polling interval", |run| {
            match run.dev.fetch_polling_interval() {
                Ok(reported_ms) => {
                    run.dev.apply_polling_interval(reported_ms);
                    Flow::Continue
                }
                Err(error) => {
                    run.error = Some(error);
                    Flow::Stop
                }
            }
        });

        seq.step("identifiers", |run| match run.dev.fetch_identifiers() {
            Ok(()) => Flow::Continue,
            Err(error) => {
                run.error = Some(error);
                Flow::Stop
            }
        });

        seq.step("bill operating mode", |run| {
            if run.dev.category != Category::BillValidator {
                return Flow::Continue;
            }
            match run.dev.set_bill_operating_mode(true, true) {
                Ok(()) => Flow::Continue,
                Err(error) => {
                    run.error = Some(error);
                    Flow::Stop
                }
            }
        });

        // The specification says coin acceptors don't need this, but some
        // firmware does.
        seq.step("inhibit status", |run| {
            match run.dev.set_inhibit_status(0xff, 0xff) {
                Ok(()) => Flow::Continue,
                Err(error) => {
                    run.error = Some(error);
                    Flow::Stop
                }
            }
        });

        let mut run = InitRun {
            dev: self,
            alive: false,
            error: None,
        };
        let completed = seq.run(&mut run);
        let alive = run.alive;
        match (completed, run.error) {
            (true, None) => Ok(()),
            (_, Some(error)) => Err((alive, error)),
            (false, None) => Err((alive, DeviceError::Aborted)),
        }
    }

    fn apply_polling_interval(&mut self, reported_ms: u64) {
        let override_ms = self.config.poll_interval_ms;
        let chosen = if let Some(ms) = override_ms {
            self.log(format!("Using configured polling interval override: {ms} ms"));
            ms
        } else if reported_ms == 0 || reported_ms > MAX_DEVICE_POLL_MS {
            self.log(format!(
                "Device-recommended polling interval is unusable ({reported_ms} ms), using default {DEFAULT_NORMAL_POLL_MS} ms"
            ));
            DEFAULT_NORMAL_POLL_MS
        } else {
            self.log(format!("Device-recommended polling interval: {reported_ms} ms"));
            reported_ms
        };
        self.normal_polling_interval = Duration::from_millis(chosen);
        self.sync_shared();
    }

    // --- typed requests ---

    fn command(&mut self, header: Header, data: &[u8]) -> Result<Reply, DeviceError> {
        Ok(self.link.transfer(header, data, None)?)
    }

    fn expect_ack(&mut self, reply: Reply) -> Result<(), DeviceError> {
        if reply.is_ack() {
            Ok(())
        } else {
            Err(self.decode_error(
                reply.request_id,
                "Non-empty data received while waiting for ACK",
            ))
        }
    }

    /// `SimplePoll`; any failure means "not alive".
    fn check_alive(&mut self) -> Result<(), DeviceError> {
        match self.command(Header::SimplePoll, &[]) {
            Ok(reply) => {
                self.expect_ack(reply)?;
                self.log("Device is alive (answered the simple poll)");
                Ok(())
            }
            Err(error) => {
                self.log(format!("Alive check failed: {error}"));
                Err(error)
            }
        }
    }

    fn ascii_reply(&mut self, header: Header) -> Result<String, DeviceError> {
        let reply = self.command(header, &[])?;
        Ok(String::from_utf8_lossy(&reply.payload).trim().to_string())
    }

    fn fetch_manufacturing_info(&mut self) -> Result<Category, DeviceError> {
        let reported = self.ascii_reply(Header::GetEquipmentCategory)?;
        let category = Category::from_reported_name(&reported);

        let mut info = ManufacturingInfo {
            equipment_category: reported,
            ..ManufacturingInfo::default()
        };
        info.product_code = self.ascii_reply(Header::GetProductCode)?;
        info.build_code = self.ascii_reply(Header::GetBuildCode)?;
        info.manufacturer = self.ascii_reply(Header::GetManufacturer)?;

        let serial = self.command(Header::GetSerialNumber, &[])?;
        info.serial_number = hex_string(&serial.payload);

        info.software_revision = self.ascii_reply(Header::GetSoftwareRevision)?;

        let comms = self.command(Header::GetCommsRevision, &[])?;
        info.comms_revision = match commands::decode_comms_revision(&comms.payload) {
            Some(rev) => format!("release {}, version {}.{}", rev.release, rev.major, rev.minor),
            None => hex_string(&comms.payload),
        };

        self.log(format!(
            "Manufacturing information:\n  equipment category: {}\n  product code: {}\n  build code: {}\n  manufacturer: {}\n  serial number: {}\n  software revision: {}\n  comms revision: {}",
            info.equipment_category,
            info.product_code,
            info.build_code,
            info.manufacturer,
            info.serial_number,
            info.software_revision,
            info.comms_revision,
        ));

        self.category = category;
        self.manufacturing_info = info;
        self.sync_shared();
        Ok(category)
    }

    fn fetch_polling_interval(&mut self) -> Result<u64, DeviceError> {
        let reply = self.command(Header::GetPollingPriority, &[])?;
        match commands::decode_polling_interval(&reply.payload) {
            Some(ms) => Ok(ms),
            None => Err(self.decode_error(reply.request_id, "Invalid polling interval reply")),
        }
    }

    /// `GetVariableSet`; optional, failures fall back to the default.
    fn query_bill_type_count(&mut self) -> Option<u8> {
        match self.command(Header::GetVariableSet, &[]) {
            Ok(reply) => match commands::decode_bill_type_count(&reply.payload) {
                Some(count) => {
                    self.log(format!("Number of bill types currently supported: {count}"));
                    Some(count)
                }
                None => {
                    self.log("Could not get the number of supported bill types, falling back to 16");
                    None
                }
            },
            Err(error) => {
                self.log(format!(
                    "Optional variable set query failed ({error}), falling back to 16 bill types"
                ));
                None
            }
        }
    }

    fn fetch_identifiers(&mut self) -> Result<(), DeviceError> {
        let positions = match self.category {
            Category::BillValidator => self.query_bill_type_count().unwrap_or(16),
            _ => 16,
        };
        let id_header = if self.category == Category::CoinAcceptor {
            Header::GetCoinId
        } else {
            Header::GetBillId
        };

        self.identifiers.clear();
        self.country_scaling.clear();

        for position in 1..=positions {
            let reply = self.command(id_header, &[position])?;
            if is_empty_slot(&reply.payload) {
                continue;
            }
            let Some(mut identifier) = Identifier::parse(&reply.payload) else {
                self.decode_error(
                    reply.request_id,
                    format!(
                        "Malformed identifier at position {position}: {:02x?}",
                        reply.payload
                    ),
                );
                continue;
            };

            if !self.country_scaling.contains_key(&identifier.country) {
                self.fetch_country_scaling(&identifier.country)?;
            }
            if let Some(scaling) = self.country_scaling.get(&identifier.country) {
                identifier.scaling = *scaling;
            }
            self.identifiers.insert(position, identifier);
        }

        if self.identifiers.is_empty() {
            self.log("No non-empty identifiers received");
        } else {
            let mut lines = vec!["Identifiers:".to_string()];
            for (position, identifier) in &self.identifiers {
                lines.push(format!("  position {position}: {identifier}"));
            }
            self.log(lines.join("\n"));
        }

        self.sync_shared();
        Ok(())
    }

    /// Fill the country scaling cache for one country. Bills ask the
    /// device; coins use the caller-supplied table, since coin acceptors do
    /// not report scaling.
    fn fetch_country_scaling(&mut self, country: &str) -> Result<(), DeviceError> {
        if country.is_empty() {
            return Ok(());
        }

        match self.category {
            Category::CoinAcceptor => {
                let supplied = self.config.coin_scaling.get(country).copied();
                if let Some(data) = supplied {
                    self.country_scaling.insert(country.to_string(), data);
                    self.log(format!(
                        "Using caller-supplied scaling for {country}: factor {}, {} decimal places",
                        data.scaling_factor, data.decimal_places
                    ));
                }
                Ok(())
            }
            Category::BillValidator => {
                let reply = self.command(Header::GetCountryScalingFactor, country.as_bytes())?;
                match commands::decode_country_scaling(&reply.payload) {
                    Some((scaling_factor, decimal_places)) => {
                        let data = CountryScalingData {
                            scaling_factor,
                            decimal_places,
                        };
                        if data.is_valid() {
                            self.country_scaling.insert(country.to_string(), data);
                            self.log(format!(
                                "Country scaling for {country}: factor {scaling_factor}, {decimal_places} decimal places"
                            ));
                        } else {
                            self.log(format!(
                                "Country {country} is not supported by the device (zero scaling data)"
                            ));
                        }
                        Ok(())
                    }
                    None => {
                        self.decode_error(
                            reply.request_id,
                            format!("Invalid scaling data for country {country}"),
                        );
                        Ok(())
                    }
                }
            }
            _ => Ok(()),
        }
    }

    fn set_inhibit_status(&mut self, mask_lo: u8, mask_hi: u8) -> Result<(), DeviceError> {
        let reply = self.command(Header::SetInhibitStatus, &[mask_lo, mask_hi])?;
        self.expect_ack(reply)?;
        self.log(format!("Inhibit status set: {mask_lo:#04x}, {mask_hi:#04x}"));
        Ok(())
    }

    fn set_master_inhibit(&mut self, inhibit: bool) -> Result<(), DeviceError> {
        // Bit 0 set means accept.
        let reply = self.command(Header::SetMasterInhibitStatus, &[u8::from(!inhibit)])?;
        self.expect_ack(reply)?;
        self.log(format!(
            "Master inhibit status set to {}",
            if inhibit { "reject" } else { "accept" }
        ));
        Ok(())
    }

    /// Read the master inhibit status back. Not used by the polling loop.
    fn master_inhibit(&mut self) -> Result<bool, DeviceError> {
        let reply = self.command(Header::GetMasterInhibitStatus, &[])?;
        if reply.payload.len() != 1 {
            return Err(self.decode_error(
                reply.request_id,
                "Invalid data received for GetMasterInhibitStatus",
            ));
        }
        Ok(reply.payload[0] & 1 == 0)
    }

    fn set_bill_operating_mode(
        &mut self,
        use_stacker: bool,
        use_escrow: bool,
    ) -> Result<(), DeviceError> {
        let mask = u8::from(use_stacker) | (u8::from(use_escrow) << 1);
        let reply = self.command(Header::SetBillOperatingMode, &[mask])?;
        self.expect_ack(reply)?;
        self.log(format!("Bill validator operating mode set to {mask:#04x}"));
        Ok(())
    }

    /// `PerformSelfCheck`. Command failures report
    /// [`FaultCode::COMMAND_ERROR`] so callers treat them as a fault.
    fn self_check(&mut self) -> FaultCode {
        match self.command(Header::PerformSelfCheck, &[]) {
            Ok(reply) => {
                if reply.payload.len() != 1 {
                    self.decode_error(reply.request_id, "Invalid data received for PerformSelfCheck");
                    return FaultCode::COMMAND_ERROR;
                }
                let fault = FaultCode(reply.payload[0]);
                self.log(format!("Self-check fault code: {fault}"));
                fault
            }
            Err(error) => {
                self.log(format!("Self check failed: {error}"));
                FaultCode::COMMAND_ERROR
            }
        }
    }

    fn route_bill(&mut self, route: BillRoute) -> BillRouteStatus {
        match self.command(Header::RouteBill, &[route.byte()]) {
            Ok(reply) => match reply.payload.len() {
                0 => BillRouteStatus::Routed,
                1 => BillRouteStatus::from(reply.payload[0]),
                _ => {
                    self.decode_error(reply.request_id, "Invalid data received for RouteBill");
                    BillRouteStatus::FailedToRoute
                }
            },
            Err(error) => {
                self.log(format!("RouteBill command failed: {error}"));
                BillRouteStatus::FailedToRoute
            }
        }
    }

    fn reset_device(&mut self) -> Result<(), DeviceError> {
        if self.state == DeviceState::ShutDown {
            return Err(DeviceError::InvalidState(self.state));
        }
        let reply = self.command(Header::ResetDevice, &[])?;
        self.expect_ack(reply)?;
        self.log("Soft reset acknowledged, waiting for the device to come back up");
        self.switch_to(DeviceState::UninitializedDown)
    }

    // --- event log ---

    /// Read the buffered event window. Errors and timeouts are logged and
    /// reported as `None`: per the polling rules they mean "no events".
    fn read_buffered_events(&mut self) -> Option<(u8, Vec<EventRecord>)> {
        let kind = if self.category == Category::CoinAcceptor {
            "coin"
        } else {
            "bill"
        };
        let header = if self.category == Category::CoinAcceptor {
            Header::ReadBufferedCredit
        } else {
            Header::ReadBufferedBillEvents
        };

        let reply = match self.command(header, &[]) {
            Ok(reply) => reply,
            Err(error) => {
                self.log(format!("Error reading buffered {kind} events: {error}"));
                return None;
            }
        };

        match decode_event_window(&reply.payload) {
            Some((counter, events)) => {
                if !self.event_log_read || self.last_event_num != counter {
                    let mut lines = vec![format!(
                        "Buffered {kind} event table (newest first): host counter {}, device counter {counter}",
                        self.last_event_num
                    )];
                    for event in &events {
                        lines.push(format!(
                            "  result A: {}, result B: {}",
                            event.result_a, event.result_b
                        ));
                    }
                    self.log(lines.join("\n"));
                    self.event_log_read = true;
                }
                Some((counter, events))
            }
            None => {
                self.decode_error(
                    reply.request_id,
                    format!(
                        "Invalid {kind} event window of {} bytes received",
                        reply.payload.len()
                    ),
                );
                None
            }
        }
    }

    /// Interpret the freshly read event window and emit credits, schedule
    /// escrow routing and escalate faults. `first_read` marks the first
    /// window decoded since boot.
    fn process_event_log(
        &mut self,
        accepting: bool,
        first_read: bool,
        window: Option<(u8, Vec<EventRecord>)>,
    ) {
        // Read errors and timeouts are ignored by specification.
        let Some((counter, events)) = window else {
            return;
        };
        if counter == 0 && events.is_empty() {
            return;
        }

        // All zeroes since boot: nothing has happened yet.
        if self.last_event_num == 0 && counter == 0 {
            return;
        }

        // A counter that drops back to zero means the device was reset
        // behind our back, with possible loss of credit.
        if self.last_event_num != 0 && counter == 0 {
            self.log("The device appears to have been reset, possible loss of credit");
            let _ = self.switch_to(DeviceState::ExternalReset);
            self.last_event_num = 0;
            return;
        }

        if self.last_event_num == counter {
            return;
        }

        // A non-zero counter on the very first decoded window means the
        // device was up and generating events before this host: those were
        // handled by the previous run, never credit them.
        let startup = first_read && self.last_event_num == 0;
        if startup {
            self.log("Device was up before host startup; ignoring \"credit accepted\" events");
        }

        let new_count = usize::from(counter_delta(self.last_event_num, counter));
        self.last_event_num = counter;

        if new_count > events.len() {
            self.log(format!(
                "Event counter difference {new_count} exceeds the {}-slot buffer, possible loss of credit",
                events.len()
            ));
        }

        let new_events: Vec<EventRecord> = events[..new_count.min(events.len())].to_vec();
        self.log(format!(
            "Found {} new event(s); processing oldest to newest",
            new_events.len()
        ));

        let mut self_check_requested = false;
        let mut routing_event: Option<EventRecord> = None;
        let mut force_reject = false;

        for (index, event) in new_events.iter().enumerate().rev() {
            let newest = index == 0;
            match self.category {
                Category::CoinAcceptor => match event.coin_event() {
                    CoinEvent::Status(code) => {
                        let rejection = code.rejection();
                        self.log(format!(
                            "Coin status/error event {code}, classified {rejection:?}"
                        ));
                        // Not clearly accepted or rejected: worth a self check.
                        if rejection == CoinRejection::Unknown {
                            self_check_requested = true;
                        }
                    }
                    CoinEvent::Credit {
                        position,
                        sorter_path,
                    } => {
                        let identifier = self
                            .identifiers
                            .get(&position)
                            .cloned()
                            .unwrap_or_default();
                        if startup {
                            self.log(format!(
                                "Startup event: coin (position {position}, ID {identifier}) was accepted to sorter path {sorter_path}; not crediting"
                            ));
                            continue;
                        }
                        self.log(format!(
                            "Coin (position {position}, ID {identifier}) has been accepted to sorter path {sorter_path}"
                        ));
                        if !accepting {
                            self.log("Coin accepted even though we're in rejecting mode; internal error");
                        }
                        self.emit(DeviceEvent::CreditAccepted {
                            position,
                            identifier,
                        });
                    }
                },

                Category::BillValidator => match event.bill_event() {
                    BillEvent::Status(code) => {
                        let event_type = code.event_type();
                        self.log(format!(
                            "Bill status/error event {code}, type {event_type:?}"
                        ));
                        if !matches!(event_type, BillEventType::Status | BillEventType::Reject) {
                            self_check_requested = true;
                        }
                    }
                    BillEvent::Credit { position, code } => {
                        let identifier = self
                            .identifiers
                            .get(&position)
                            .cloned()
                            .unwrap_or_default();
                        match code {
                            BillSuccess::HeldInEscrow => {
                                // Route only on the newest event; anything
                                // older may have been superseded already.
                                if !newest {
                                    self.log(format!(
                                        "Bill (position {position}, ID {identifier}) is or was in escrow, too late to process an old event; ignoring"
                                    ));
                                    continue;
                                }
                                if !accepting {
                                    self.log(format!(
                                        "Bill (position {position}, ID {identifier}) is in escrow even though we're in rejecting mode; will return it"
                                    ));
                                    force_reject = true;
                                }
                                routing_event = Some(*event);
                            }
                            BillSuccess::Accepted => {
                                if startup {
                                    self.log(format!(
                                        "Startup event: bill (position {position}, ID {identifier}) was accepted; not crediting"
                                    ));
                                    continue;
                                }
                                self.log(format!(
                                    "Bill (position {position}, ID {identifier}) has been accepted"
                                ));
                                if !accepting {
                                    self.log("Bill accepted even though we're in rejecting mode; internal error");
                                }
                                self.emit(DeviceEvent::CreditAccepted {
                                    position,
                                    identifier,
                                });
                            }
                            BillSuccess::Other(raw) => {
                                self.log(format!(
                                    "Unexpected bill success code {raw} at position {position}; ignoring"
                                ));
                            }
                        }
                    }
                },

                _ => {}
            }
        }

        if !self_check_requested && routing_event.is_none() {
            return;
        }

        // Follow-up mini-sequence: an optional self check, the escrow
        // routing decision, then fault escalation.
        struct FollowUp<'a> {
            dev: &'a mut DeviceSupervisor,
            fault: FaultCode,
        }

        let mut seq: Sequencer<'_, FollowUp<'_>> = Sequencer::new();

        if self_check_requested {
            seq.step("self check", |run| {
                run.dev
                    .log("At least one new event carries an error code; running a self check");
                run.fault = run.dev.self_check();
                Flow::Continue
            });
        }

        if let Some(event) = routing_event {
            seq.step("escrow routing", move |run| {
                let position = event.result_a;
                let identifier = run
                    .dev
                    .identifiers
                    .get(&position)
                    .cloned()
                    .unwrap_or_default();

                let accept = if !run.fault.is_ok() {
                    run.dev
                        .log("Self check returned a fault; the bill in escrow will be returned");
                    false
                } else if force_reject {
                    false
                } else {
                    match run.dev.bill_validator.clone() {
                        Some(validator) => {
                            let accept = validator(position, &identifier);
                            run.dev.log(format!(
                                "Bill validation function says: {}",
                                if accept { "accept" } else { "reject" }
                            ));
                            accept
                        }
                        None => {
                            run.dev
                                .log("No bill validation function registered; returning the bill");
                            false
                        }
                    }
                };

                let route = if accept {
                    BillRoute::ToStacker
                } else {
                    BillRoute::Return
                };
                run.dev.log(format!(
                    "Bill (position {position}, ID {identifier}) is in escrow, requesting {route:?}"
                ));
                let status = run.dev.route_bill(route);
                run.dev.log(format!(
                    "Bill (position {position}, ID {identifier}) routing status: {status:?}"
                ));
                Flow::Continue
            });
        }

        if self_check_requested {
            seq.step("fault escalation", |run| {
                if !run.fault.is_ok() {
                    run.dev.log(
                        "Self check returned a fault code, switching to diagnostics polling",
                    );
                    let _ = run.dev.switch_to(DeviceState::DiagnosticsPolling);
                }
                Flow::Continue
            });
        }

        let mut run = FollowUp {
            dev: self,
            fault: FaultCode::OK,
        };
        seq.run(&mut run);
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formatting() {
        assert_eq!(hex_string(&[0x01, 0xab, 0x00]), "01ab00");
        assert_eq!(hex_string(&[]), "");
    }
}
