//! Configuration loading and its effect on device timing.

use flicker_daq::config::{Config, DEFAULT_CONFIG_PATH};
use flicker_daq::{Device, DeviceError};
use std::time::Duration;

#[test]
fn test_shipped_config_is_valid() {
    let config = Config::load_from(DEFAULT_CONFIG_PATH).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_empty_port_rejected() {
    let mut config = Config::default();
    config.serial.port = Some("  ".to_string());
    let err_msg = config.validate().unwrap_err().to_string();
    assert!(err_msg.contains("serial.port"));
}

#[test]
fn test_zero_poll_interval_rejected() {
    let mut config = Config::default();
    config.protocol.gate_poll_interval_ms = 0;
    let err_msg = config.validate().unwrap_err().to_string();
    assert!(err_msg.contains("gate_poll_interval_ms"));
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_reaches_device() {
    let mut config = Config::default();
    config.protocol.response_timeout_ms = 250;
    let device = Device::new(&config).unwrap();

    let (_controller, link) = tokio::io::duplex(64);
    device.attach("loopback", Box::new(link)).await.unwrap();

    match device.read_sensor().await {
        Err(DeviceError::Timeout { after, .. }) => assert_eq!(after, Duration::from_millis(250)),
        other => panic!("expected timeout, got {other:?}"),
    }
}
