//! Host-side acquisition core for Pico-class logic analyzers: wire framing,
//! device handshake and session management, capture planning/validation,
//! sample-payload parsing, multi-device synchronization, and a drop-in
//! external-CLI capture provider.
//!
//! Modules split along the same seams the original protocol does: [`frame`]
//! and [`wire`] are pure codec (no I/O), [`transport`] and [`device`] own
//! the live connection, [`planner`] and [`parser`] are pure data
//! transforms, and [`capture`]/[`multi`] drive the protocol sequences on
//! top of the rest.

pub mod addr;
pub mod capture;
pub mod cli_adapter;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;
pub mod identity;
pub mod multi;
pub mod parser;
pub mod planner;
pub mod session;
pub mod transport;
pub mod wire;

pub use addr::DeviceTarget;
pub use capture::{start as start_capture, stop as stop_capture};
pub use device::{DeviceSession, SessionStatus};
pub use error::{CaptureError, CaptureErrorCode, CliError, DeviceError, WireError};
pub use events::CaptureEvent;
pub use identity::DeviceIdentity;
pub use multi::{connect as connect_multi, start as start_multi, AggregateCapabilities, MultiDeviceSession};
pub use session::{BurstInfo, Channel, CaptureSession, PackingMode, TriggerType};
