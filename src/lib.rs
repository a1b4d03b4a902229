//! # Flicker DAQ
//!
//! Host-side driver for the flicker rig controller: a microcontroller on a
//! serial link that reports two sensor channels and switches a magnet and an
//! AC supply. Commands are single characters, replies are `\n`-terminated
//! text lines.
//!
//! ## Crate Structure
//!
//! - **`device`**: the [`Device`] facade callers hold; port lifecycle plus
//!   the typed operations (`read_sensor`, `magnet_on`, ...).
//! - **`protocol`**: framing, dispatch, the single-command gate and
//!   command/reply correlation.
//! - **`connection`**: one open transport with its background reader.
//! - **`serial`**: serial port parameters and async opening.
//! - **`discovery`**: port enumeration and the `PortSelector` seam.
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: the `DeviceError` enum.

pub mod config;
pub mod connection;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod serial;

pub use device::Device;
pub use discovery::{FirstPort, FixedPort, PortCandidate, PortSelector};
pub use error::{DeviceError, DeviceResult, StreamFault};
pub use protocol::{Command, SensorReading};
