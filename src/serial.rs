//! Serial Port Abstractions
//!
//! Shared types for async serial communication. The protocol engine never
//! talks to `tokio_serial` directly: it works on [`DynSerial`], so unit tests
//! can substitute `tokio::io::DuplexStream` for a real port.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite for serial ports
//! - [`DynSerial`]: Type-erased boxed serial port
//! - [`SerialParams`]: Fixed line settings (8N1, hardware flow control)
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking

use crate::error::{DeviceError, DeviceResult};
use tokio::io::{AsyncRead, AsyncWrite};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

// =============================================================================
// Line Settings
// =============================================================================

/// Transport parameters for the rig controller.
///
/// Only the baud rate is caller-supplied. Framing is always 8 data bits,
/// no parity, 1 stop bit with RTS/CTS flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    /// Line speed in baud
    pub baud_rate: u32,
}

impl SerialParams {
    /// Data bits per character.
    pub const DATA_BITS: tokio_serial::DataBits = tokio_serial::DataBits::Eight;
    /// Parity mode.
    pub const PARITY: tokio_serial::Parity = tokio_serial::Parity::None;
    /// Stop bits per character.
    pub const STOP_BITS: tokio_serial::StopBits = tokio_serial::StopBits::One;
    /// Flow control mode.
    pub const FLOW_CONTROL: tokio_serial::FlowControl = tokio_serial::FlowControl::Hardware;

    /// Parameters with the given baud rate.
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialParams {
    fn default() -> Self {
        Self::new(9600)
    }
}

/// Open a serial port asynchronously using spawn_blocking.
///
/// Opening a tty can block (e.g. waiting on modem lines), so it is moved off
/// the async runtime. The port is only opened here; building the settings
/// never touches the device.
///
/// # Errors
///
/// Returns [`DeviceError::Open`] carrying the path and the OS cause if the
/// device is missing, busy, or not accessible.
pub async fn open_serial_async(
    port_path: &str,
    params: SerialParams,
) -> DeviceResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let opened = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, params.baud_rate)
            .data_bits(SerialParams::DATA_BITS)
            .parity(SerialParams::PARITY)
            .stop_bits(SerialParams::STOP_BITS)
            .flow_control(SerialParams::FLOW_CONTROL)
            .open_native_async()
    })
    .await
    .map_err(|join_err| DeviceError::Open {
        path: port_path.to_string(),
        source: std::io::Error::other(join_err),
    })?;

    opened.map_err(|source| DeviceError::Open {
        path: port_path.to_string(),
        source: source.into(),
    })
}
