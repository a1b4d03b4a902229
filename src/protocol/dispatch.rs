//! Frame classification and fan-out.
//!
//! Every non-empty frame is published on the "any response" channel. Frames
//! that match the two-value grammar are additionally decoded into a
//! [`SensorReading`] and published on the "sensor data" channel. Stream
//! faults from the reader go out on the "error" channel.
//!
//! All three channels are `tokio::sync::broadcast`: publication with no
//! subscribers simply drops the value, and a subscriber only sees values
//! published after it subscribed.

use crate::error::StreamFault;
use crate::protocol::framer::Frame;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;
use tokio::sync::broadcast;

/// `<digits>.<digits>,<optional whitespace><digits>.<digits>`, anchored.
///
/// ASCII digits only; integers and exponent forms are unstructured text.
#[allow(clippy::expect_used)]
static READING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+\.[0-9]+),\s*([0-9]+\.[0-9]+)$").expect("reading pattern is valid")
});

/// A structured reply carrying the rig's two sensor channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    /// First channel
    pub value1: f64,
    /// Second channel
    pub value2: f64,
}

impl SensorReading {
    /// Decode a frame if it matches the two-value grammar.
    ///
    /// Returns `None` for anything else, including values that overflow to
    /// infinity.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = READING_PATTERN.captures(text)?;
        let value1 = f64::from_str(&caps[1]).ok()?;
        let value2 = f64::from_str(&caps[2]).ok()?;
        if value1.is_finite() && value2.is_finite() {
            Some(Self { value1, value2 })
        } else {
            None
        }
    }
}

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Blank frame; nothing published.
    Discarded,
    /// Published on the generic channel only.
    Text(String),
    /// Published on both the sensor and generic channels.
    Reading(SensorReading),
}

/// Fan-out hub for responses, readings and stream faults.
///
/// Cloning yields another handle onto the same channels.
#[derive(Debug, Clone)]
pub struct ResponseDispatcher {
    responses: broadcast::Sender<String>,
    readings: broadcast::Sender<SensorReading>,
    errors: broadcast::Sender<StreamFault>,
}

impl ResponseDispatcher {
    /// Create a dispatcher whose channels each buffer `capacity` values per
    /// subscriber. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (responses, _) = broadcast::channel(capacity);
        let (readings, _) = broadcast::channel(capacity);
        let (errors, _) = broadcast::channel(capacity);
        Self {
            responses,
            readings,
            errors,
        }
    }

    /// Classify and publish one frame.
    pub fn dispatch(&self, frame: Frame) -> Dispatched {
        if frame.is_empty() {
            return Dispatched::Discarded;
        }

        let text = frame.into_string();
        match SensorReading::parse(&text) {
            Some(reading) => {
                tracing::trace!(value1 = reading.value1, value2 = reading.value2, "sensor data");
                let _ = self.readings.send(reading);
                let _ = self.responses.send(text);
                Dispatched::Reading(reading)
            }
            None => {
                tracing::trace!(response = %text, "generic response");
                let _ = self.responses.send(text.clone());
                Dispatched::Text(text)
            }
        }
    }

    /// Publish a stream-level fault.
    pub fn publish_error(&self, fault: StreamFault) {
        tracing::warn!(error = %fault, "serial stream fault");
        let _ = self.errors.send(fault);
    }

    /// Subscribe to every non-empty response line.
    pub fn subscribe_responses(&self) -> broadcast::Receiver<String> {
        self.responses.subscribe()
    }

    /// Subscribe to decoded sensor readings.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<SensorReading> {
        self.readings.subscribe()
    }

    /// Subscribe to stream faults.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<StreamFault> {
        self.errors.subscribe()
    }
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(64)
    }
}
