//! Serial port discovery and selection.
//!
//! Enumeration goes through `serialport`; choosing among the candidates is
//! delegated to a [`PortSelector`] so the library never prompts. The CLI
//! supplies an interactive selector, scripts use [`FixedPort`] or
//! [`FirstPort`].

use crate::error::{DeviceError, DeviceResult};
use async_trait::async_trait;
use serialport::SerialPortType;
use std::fmt;

/// A port that could host the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    /// OS path, e.g. "/dev/ttyACM0" or "COM4"
    pub path: String,
    /// Human-readable description for prompts
    pub description: String,
    /// Whether the port is a USB serial adapter
    pub usb: bool,
}

impl PortCandidate {
    /// Candidate with a plain description.
    pub fn new(path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
            usb: false,
        }
    }
}

impl fmt::Display for PortCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.description)
    }
}

/// List the serial ports the OS knows about.
///
/// # Errors
/// [`DeviceError::PortEnumeration`] if the OS query fails. An empty list is
/// not an error here.
pub fn available_ports() -> DeviceResult<Vec<PortCandidate>> {
    let ports = serialport::available_ports()?;
    let candidates: Vec<PortCandidate> = ports
        .into_iter()
        .map(|info| PortCandidate {
            description: describe(&info.port_type),
            usb: matches!(info.port_type, SerialPortType::UsbPort(_)),
            path: info.port_name,
        })
        .collect();
    tracing::debug!(count = candidates.len(), "enumerated serial ports");
    Ok(candidates)
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let name = usb
                .product
                .clone()
                .or_else(|| usb.manufacturer.clone())
                .unwrap_or_else(|| "USB serial".to_string());
            format!("{} [{:04x}:{:04x}]", name, usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "serial".to_string(),
    }
}

/// Chooses the port to open from the enumerated candidates.
#[async_trait]
pub trait PortSelector: Send + Sync {
    /// Pick one candidate.
    ///
    /// # Errors
    /// [`DeviceError::NoPorts`] for an empty list,
    /// [`DeviceError::InvalidSelection`] if nothing acceptable was chosen.
    async fn select(&self, candidates: &[PortCandidate]) -> DeviceResult<PortCandidate>;
}

/// Select a specific path, which must be among the candidates.
#[derive(Debug, Clone)]
pub struct FixedPort(pub String);

#[async_trait]
impl PortSelector for FixedPort {
    async fn select(&self, candidates: &[PortCandidate]) -> DeviceResult<PortCandidate> {
        if candidates.is_empty() {
            return Err(DeviceError::NoPorts);
        }
        candidates
            .iter()
            .find(|c| c.path == self.0)
            .cloned()
            .ok_or_else(|| {
                let known: Vec<&str> = candidates.iter().map(|c| c.path.as_str()).collect();
                DeviceError::InvalidSelection(format!(
                    "{} is not one of: {}",
                    self.0,
                    known.join(", ")
                ))
            })
    }
}

/// Select the first USB adapter, or the first port if there is none.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstPort;

#[async_trait]
impl PortSelector for FirstPort {
    async fn select(&self, candidates: &[PortCandidate]) -> DeviceResult<PortCandidate> {
        candidates
            .iter()
            .find(|c| c.usb)
            .or_else(|| candidates.first())
            .cloned()
            .ok_or(DeviceError::NoPorts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<PortCandidate> {
        vec![
            PortCandidate::new("/dev/ttyS0", "serial"),
            PortCandidate {
                path: "/dev/ttyACM0".into(),
                description: "Arduino Uno [2341:0043]".into(),
                usb: true,
            },
        ]
    }

    #[tokio::test]
    async fn first_port_prefers_usb() {
        let chosen = FirstPort.select(&candidates()).await.unwrap();
        assert_eq!(chosen.path, "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn first_port_falls_back_to_first_entry() {
        let only_builtin = vec![PortCandidate::new("/dev/ttyS1", "serial")];
        let chosen = FirstPort.select(&only_builtin).await.unwrap();
        assert_eq!(chosen.path, "/dev/ttyS1");
    }

    #[tokio::test]
    async fn selectors_report_no_ports() {
        assert!(matches!(FirstPort.select(&[]).await, Err(DeviceError::NoPorts)));
        assert!(matches!(
            FixedPort("/dev/ttyACM0".into()).select(&[]).await,
            Err(DeviceError::NoPorts)
        ));
    }

    #[tokio::test]
    async fn fixed_port_must_be_listed() {
        let selector = FixedPort("/dev/ttyUSB9".into());
        match selector.select(&candidates()).await {
            Err(DeviceError::InvalidSelection(msg)) => assert!(msg.contains("/dev/ttyACM0")),
            other => panic!("unexpected result: {other:?}"),
        }

        let chosen = FixedPort("/dev/ttyS0".into())
            .select(&candidates())
            .await
            .unwrap();
        assert_eq!(chosen.description, "serial");
    }

    #[test]
    fn usb_description_includes_ids() {
        let port_type = SerialPortType::UsbPort(serialport::UsbPortInfo {
            vid: 0x2341,
            pid: 0x0043,
            serial_number: None,
            manufacturer: Some("Arduino".into()),
            product: None,
        });
        assert_eq!(describe(&port_type), "Arduino [2341:0043]");
    }
}
