//! Command/response correlation.
//!
//! Replies carry no tag, so "the reply to this command" means "the next
//! response published after this command was written". The correlator
//! subscribes before writing, then races four events:
//!
//! - the next frame on the "any response" channel (resolved),
//! - a stream fault on the error channel (failed),
//! - the connection being closed underneath it (failed),
//! - the response deadline (timed out).
//!
//! `tokio::select!` polls all four and completes with exactly one; the
//! losing subscriptions are dropped with it, so a reply that arrives after a
//! timeout is published as an unsolicited response instead of being charged to
//! this command. Every outcome releases the gate.
//!
//! Known gap: if a late reply to command A lands after command B has been
//! written, B will take it as its own. Fixing that needs sequence numbers in
//! the controller firmware.

use crate::connection::Connection;
use crate::error::{DeviceError, DeviceResult, StreamFault};
use crate::protocol::command::Command;
use crate::protocol::dispatch::SensorReading;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of one command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    /// Created, nothing written yet
    Idle,
    /// Written; waiting for an outcome
    Sent,
    /// A reply arrived
    Resolved,
    /// The deadline elapsed first
    TimedOut,
    /// A write error or stream fault ended the exchange
    Failed,
}

impl CorrelationState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CorrelationState::Resolved | CorrelationState::TimedOut | CorrelationState::Failed
        )
    }
}

/// Result cell for one in-flight command; it settles at most once.
#[derive(Debug)]
pub struct PendingCorrelation {
    command: Command,
    state: CorrelationState,
    sent_at: Option<Instant>,
}

impl PendingCorrelation {
    /// New, idle correlation.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            state: CorrelationState::Idle,
            sent_at: None,
        }
    }

    /// Command being correlated.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Current state.
    pub fn state(&self) -> CorrelationState {
        self.state
    }

    /// Record that the command reached the transport.
    pub fn mark_sent(&mut self) {
        if self.state == CorrelationState::Idle {
            self.state = CorrelationState::Sent;
            self.sent_at = Some(Instant::now());
        }
    }

    /// Move to a terminal state. Returns `false` if already settled or if
    /// `outcome` is not terminal.
    pub fn settle(&mut self, outcome: CorrelationState) -> bool {
        if self.state.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        // A write failure settles straight from Idle; everything else needs Sent.
        if self.state == CorrelationState::Idle && outcome != CorrelationState::Failed {
            return false;
        }
        self.state = outcome;
        let elapsed_ms = self
            .sent_at
            .map(|at| at.elapsed().as_millis() as u64)
            .unwrap_or_default();
        tracing::debug!(command = %self.command, state = ?outcome, elapsed_ms, "command settled");
        true
    }
}

/// Issues commands over one connection and pairs them with their outcomes.
#[derive(Debug)]
pub struct Correlator<'a> {
    link: &'a Connection,
    response_timeout: Duration,
}

impl<'a> Correlator<'a> {
    /// Correlator over `link` with the given reply deadline.
    pub fn new(link: &'a Connection, response_timeout: Duration) -> Self {
        Self {
            link,
            response_timeout,
        }
    }

    /// Send a command and wait for the next response line.
    pub async fn query(&self, command: Command) -> DeviceResult<String> {
        let mut pending = PendingCorrelation::new(command);
        let permit = self.link.gate().acquire().await;

        // Subscribe before writing so a fast reply cannot slip past.
        let mut responses = self.link.dispatcher().subscribe_responses();
        let mut faults = self.link.dispatcher().subscribe_errors();
        let mut closed = self.link.closed();

        if let Err(err) = self.link.write(&command.wire()).await {
            pending.settle(CorrelationState::Failed);
            return Err(err);
        }
        pending.mark_sent();
        permit.mark_sent();
        tracing::debug!(command = %command, "command sent, awaiting reply");

        let outcome = tokio::select! {
            biased;
            reply = next_response(&mut responses) => reply,
            fault = next_fault(&mut faults) => Err(DeviceError::Stream(fault)),
            _ = until_closed(&mut closed) => Err(DeviceError::NotConnected),
            _ = tokio::time::sleep(self.response_timeout) => Err(DeviceError::Timeout {
                command: command.code(),
                after: self.response_timeout,
            }),
        };

        pending.settle(match &outcome {
            Ok(_) => CorrelationState::Resolved,
            Err(DeviceError::Timeout { .. }) => CorrelationState::TimedOut,
            Err(_) => CorrelationState::Failed,
        });
        permit.release();

        if let Err(DeviceError::Timeout { .. }) = &outcome {
            tracing::warn!(command = %command, timeout_ms = self.response_timeout.as_millis() as u64, "no reply before deadline");
        }
        outcome
    }

    /// Send a sensor read and decode the two-value reply.
    pub async fn read_sensor(&self) -> DeviceResult<SensorReading> {
        let reply = self.query(Command::ReadSensor).await?;
        SensorReading::parse(&reply).ok_or(DeviceError::Parse { frame: reply })
    }

    /// Issue any command, waiting for a reply only if it expects one.
    pub async fn execute(&self, command: Command) -> DeviceResult<Option<String>> {
        if command.expects_reply() {
            self.query(command).await.map(Some)
        } else {
            self.send(command).await.map(|()| None)
        }
    }

    /// Send a command that needs no reply; done once the write is accepted.
    pub async fn send(&self, command: Command) -> DeviceResult<()> {
        let mut pending = PendingCorrelation::new(command);
        let permit = self.link.gate().acquire().await;

        let result = self.link.write(&command.wire()).await;
        match result {
            Ok(()) => {
                pending.mark_sent();
                pending.settle(CorrelationState::Resolved);
            }
            Err(_) => {
                pending.settle(CorrelationState::Failed);
            }
        }
        permit.release();
        result
    }
}

async fn next_response(rx: &mut broadcast::Receiver<String>) -> DeviceResult<String> {
    loop {
        match rx.recv().await {
            Ok(reply) => return Ok(reply),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "response subscriber lagged");
            }
            Err(RecvError::Closed) => return Err(DeviceError::Disconnected),
        }
    }
}

async fn until_closed(rx: &mut watch::Receiver<bool>) {
    // A dropped sender means the connection itself is gone.
    let _ = rx.wait_for(|closed| *closed).await;
}

async fn next_fault(rx: &mut broadcast::Receiver<StreamFault>) -> StreamFault {
    loop {
        match rx.recv().await {
            Ok(fault) => return fault,
            Err(RecvError::Lagged(_)) => continue,
            // No publisher left; only the response channel or deadline can finish.
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settles_exactly_once() {
        let mut pending = PendingCorrelation::new(Command::ReadSensor);
        pending.mark_sent();
        assert_eq!(pending.state(), CorrelationState::Sent);

        assert!(pending.settle(CorrelationState::TimedOut));
        assert!(!pending.settle(CorrelationState::Resolved));
        assert_eq!(pending.state(), CorrelationState::TimedOut);
    }

    #[test]
    fn only_terminal_states_settle() {
        let mut pending = PendingCorrelation::new(Command::AcOn);
        pending.mark_sent();
        assert!(!pending.settle(CorrelationState::Sent));
        assert!(!pending.settle(CorrelationState::Idle));
        assert_eq!(pending.state(), CorrelationState::Sent);
    }

    #[test]
    fn unsent_command_can_only_fail() {
        let mut pending = PendingCorrelation::new(Command::MagnetOn);
        assert!(!pending.settle(CorrelationState::Resolved));
        assert!(!pending.settle(CorrelationState::TimedOut));
        assert!(pending.settle(CorrelationState::Failed));
        assert_eq!(pending.command(), Command::MagnetOn);
    }

    #[test]
    fn mark_sent_is_ignored_after_settling() {
        let mut pending = PendingCorrelation::new(Command::ReadSensor);
        pending.settle(CorrelationState::Failed);
        pending.mark_sent();
        assert_eq!(pending.state(), CorrelationState::Failed);
    }
}
