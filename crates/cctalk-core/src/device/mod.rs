//! Device model and supervisor
//!
//! Everything above the wire protocol: the lifecycle state machine, the
//! code tables the device reports, coin/bill identifiers, event-window
//! interpretation and the polling supervisor itself.

pub mod codes;
pub mod event;
pub mod identifier;
pub mod sequencer;
pub mod state;
pub mod supervisor;

pub use codes::{
    BillErrorCode, BillEventType, BillRoute, BillRouteStatus, BillSuccess, Category, CoinEventCode,
    CoinRejection, FaultCode,
};
pub use event::{counter_delta, decode_event_window, BillEvent, CoinEvent, EventRecord};
pub use identifier::{CountryScalingData, Identifier};
pub use sequencer::{Flow, Sequencer};
pub use state::DeviceState;
pub use supervisor::{
    BillValidatorFn, Device, DeviceError, DeviceEvent, ManufacturingInfo,
};
