//! Device facade.
//!
//! [`Device`] is what callers hold: it owns the subscriber channels for the
//! whole session and swaps the underlying [`Connection`] on open, port change
//! and close. Protocol operations go through a [`Correlator`] bound to the
//! current connection, so they always see that connection's gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use flicker_daq::{config::Config, discovery::FirstPort, Device};
//!
//! let device = Device::new(&Config::load()?)?;
//! device.initialize(&FirstPort).await?;
//! device.magnet_on().await?;
//! let reading = device.read_sensor().await?;
//! println!("{} {}", reading.value1, reading.value2);
//! device.close().await?;
//! ```

use crate::config::Config;
use crate::connection::Connection;
use crate::discovery::{available_ports, PortCandidate, PortSelector};
use crate::error::{DeviceError, DeviceResult, StreamFault};
use crate::protocol::{Command, Correlator, GateTiming, ResponseDispatcher, SensorReading};
use crate::serial::{DynSerial, SerialParams};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::instrument;

/// Handle to the serial instrument.
pub struct Device {
    params: SerialParams,
    timing: GateTiming,
    response_timeout: Duration,
    dispatcher: ResponseDispatcher,
    link: RwLock<Option<Arc<Connection>>>,
}

impl Device {
    /// Closed device using the serial and protocol settings from `config`.
    ///
    /// # Errors
    /// [`DeviceError::Configuration`] if `config` fails validation.
    pub fn new(config: &Config) -> DeviceResult<Self> {
        config.validate()?;
        Ok(Self {
            params: SerialParams::new(config.serial.baud_rate),
            timing: GateTiming::from(&config.protocol),
            response_timeout: config.protocol.response_timeout(),
            dispatcher: ResponseDispatcher::new(config.protocol.channel_capacity),
            link: RwLock::new(None),
        })
    }

    /// Enumerate ports, let `selector` choose one and open it.
    ///
    /// # Errors
    /// [`DeviceError::NoPorts`] if the OS reports no serial ports, otherwise
    /// whatever the selector or [`Device::open`] returns.
    pub async fn initialize(&self, selector: &dyn PortSelector) -> DeviceResult<PortCandidate> {
        let candidates = available_ports()?;
        self.initialize_from(candidates, selector).await
    }

    /// Like [`Device::initialize`] with a pre-enumerated candidate list.
    #[instrument(skip(self, candidates, selector), fields(candidates = candidates.len()), err)]
    pub async fn initialize_from(
        &self,
        candidates: Vec<PortCandidate>,
        selector: &dyn PortSelector,
    ) -> DeviceResult<PortCandidate> {
        if candidates.is_empty() {
            return Err(DeviceError::NoPorts);
        }
        let chosen = selector.select(&candidates).await?;
        self.open(&chosen.path).await?;
        Ok(chosen)
    }

    /// Open `path` with the configured parameters, closing any current port.
    ///
    /// # Errors
    /// [`DeviceError::Open`] if the port cannot be opened.
    #[instrument(skip(self), err)]
    pub async fn open(&self, path: &str) -> DeviceResult<()> {
        let mut link = self.link.write().await;
        if let Some(previous) = link.take() {
            previous.close().await?;
        }
        let conn = Connection::open(path, self.params, self.dispatcher.clone(), self.timing).await?;
        *link = Some(Arc::new(conn));
        Ok(())
    }

    /// Use an already-open byte stream as the transport.
    ///
    /// Serves loopback rigs and tests; the stream is treated exactly like an
    /// opened port.
    pub async fn attach(&self, label: &str, stream: DynSerial) -> DeviceResult<()> {
        let mut link = self.link.write().await;
        if let Some(previous) = link.take() {
            previous.close().await?;
        }
        let conn = Connection::from_stream(label, stream, self.dispatcher.clone(), self.timing);
        tracing::info!(port = label, "attached byte stream");
        *link = Some(Arc::new(conn));
        Ok(())
    }

    /// Close the current port and run port selection again.
    ///
    /// The new connection starts with an empty frame buffer and a free gate.
    #[instrument(skip(self, selector), err)]
    pub async fn change_port(&self, selector: &dyn PortSelector) -> DeviceResult<PortCandidate> {
        self.close().await?;
        self.initialize(selector).await
    }

    /// Close the port. No-op if nothing is open.
    ///
    /// # Errors
    /// [`DeviceError::Close`] if the transport reports a shutdown failure.
    pub async fn close(&self) -> DeviceResult<()> {
        let current = self.link.write().await.take();
        match current {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Path of the open port, if any.
    pub async fn port(&self) -> Option<String> {
        self.link
            .read()
            .await
            .as_ref()
            .map(|conn| conn.path().to_string())
    }

    /// Whether a command is currently outstanding.
    pub async fn is_busy(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .is_some_and(|conn| conn.gate().is_busy())
    }

    /// Request both sensor channels.
    ///
    /// # Errors
    /// [`DeviceError::Parse`] if the reply is not a two-value reading,
    /// [`DeviceError::Timeout`] if no reply arrives in time.
    #[instrument(skip(self), err)]
    pub async fn read_sensor(&self) -> DeviceResult<SensorReading> {
        let conn = self.connection().await?;
        Correlator::new(&conn, self.response_timeout)
            .read_sensor()
            .await
    }

    /// Energise the magnet.
    #[instrument(skip(self), err)]
    pub async fn magnet_on(&self) -> DeviceResult<()> {
        self.actuate(Command::MagnetOn).await
    }

    /// Release the magnet.
    #[instrument(skip(self), err)]
    pub async fn magnet_off(&self) -> DeviceResult<()> {
        self.actuate(Command::MagnetOff).await
    }

    /// Switch the AC supply on.
    #[instrument(skip(self), err)]
    pub async fn ac_on(&self) -> DeviceResult<()> {
        self.actuate(Command::AcOn).await
    }

    /// Switch the AC supply off.
    #[instrument(skip(self), err)]
    pub async fn ac_off(&self) -> DeviceResult<()> {
        self.actuate(Command::AcOff).await
    }

    /// Subscribe to structured sensor readings.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<SensorReading> {
        self.dispatcher.subscribe_readings()
    }

    /// Subscribe to every non-empty response line.
    pub fn subscribe_responses(&self) -> broadcast::Receiver<String> {
        self.dispatcher.subscribe_responses()
    }

    /// Subscribe to transport read faults.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<StreamFault> {
        self.dispatcher.subscribe_errors()
    }

    async fn actuate(&self, command: Command) -> DeviceResult<()> {
        let conn = self.connection().await?;
        Correlator::new(&conn, self.response_timeout)
            .execute(command)
            .await
            .map(drop)
    }

    // Clone the Arc out so the lock is not held across protocol waits.
    async fn connection(&self) -> DeviceResult<Arc<Connection>> {
        self.link
            .read()
            .await
            .clone()
            .ok_or(DeviceError::NotConnected)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("params", &self.params)
            .field("timing", &self.timing)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}
