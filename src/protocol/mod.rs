//! Command/response protocol engine.
//!
//! - [`framer`]: reassembles `\n`-terminated frames from raw reads
//! - [`dispatch`]: classifies frames and fans them out to subscribers
//! - [`gate`]: keeps at most one command outstanding
//! - [`correlator`]: pairs each command with its reply, fault or timeout
//! - [`command`]: the controller's command characters

pub mod command;
pub mod correlator;
pub mod dispatch;
pub mod framer;
pub mod gate;

pub use command::Command;
pub use correlator::{CorrelationState, Correlator, PendingCorrelation};
pub use dispatch::{Dispatched, ResponseDispatcher, SensorReading};
pub use framer::{Frame, FrameReassembler, LINE_TERMINATOR};
pub use gate::{CommandGate, GatePermit, GateTiming};
