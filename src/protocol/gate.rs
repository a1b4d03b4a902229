//! Single-command concurrency gate.
//!
//! The controller protocol carries no command identifiers; the only way to
//! pair a reply with its request is that nothing else was sent in between.
//! [`CommandGate`] keeps at most one command outstanding per connection.
//!
//! It is a best-effort lock, not a mutex. `acquire` polls while the gate is
//! busy, and when the wait ceiling is reached it logs a warning and takes the
//! gate anyway: a lost reply must never wedge every later command. A watchdog
//! started by [`GatePermit::mark_sent`] frees the gate shortly after a send
//! even if the caller is still waiting for its reply.
//!
//! Each acquisition gets an epoch. Permit drops and watchdogs only clear the
//! acquisition they belong to; [`CommandGate::release`] (an inbound response)
//! clears whatever is current.

use crate::config::ProtocolConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Gate polling and watchdog timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTiming {
    /// Sleep between busy checks
    pub poll_interval: Duration,
    /// Total wait before the gate is forced open
    pub wait_ceiling: Duration,
    /// Delay after a send before the watchdog clears the gate
    pub watchdog: Duration,
}

impl Default for GateTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            wait_ceiling: Duration::from_millis(1000),
            watchdog: Duration::from_millis(100),
        }
    }
}

impl From<&ProtocolConfig> for GateTiming {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            poll_interval: config.gate_poll_interval(),
            wait_ceiling: config.gate_wait_ceiling(),
            watchdog: config.watchdog(),
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    busy: bool,
    epoch: u64,
}

#[derive(Debug)]
struct GateShared {
    state: Mutex<GateState>,
    timing: GateTiming,
}

/// Best-effort mutual exclusion for command issuance on one connection.
#[derive(Debug, Clone)]
pub struct CommandGate {
    shared: Arc<GateShared>,
}

impl CommandGate {
    /// New, free gate.
    pub fn new(timing: GateTiming) -> Self {
        Self {
            shared: Arc::new(GateShared {
                state: Mutex::new(GateState::default()),
                timing,
            }),
        }
    }

    /// Configured timings.
    pub fn timing(&self) -> GateTiming {
        self.shared.timing
    }

    /// Whether a command is currently considered outstanding.
    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().busy
    }

    /// Take the gate without waiting.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        let mut state = self.shared.state.lock();
        if state.busy {
            return None;
        }
        state.busy = true;
        state.epoch += 1;
        Some(self.permit(state.epoch, false))
    }

    /// Take the gate, polling while busy and forcing it at the wait ceiling.
    pub async fn acquire(&self) -> GatePermit {
        let timing = self.shared.timing;
        let mut waited = Duration::ZERO;

        loop {
            if let Some(permit) = self.try_acquire() {
                if !waited.is_zero() {
                    tracing::trace!(waited_ms = waited.as_millis() as u64, "command gate acquired");
                }
                return permit;
            }

            if waited >= timing.wait_ceiling {
                let epoch = {
                    let mut state = self.shared.state.lock();
                    state.busy = true;
                    state.epoch += 1;
                    state.epoch
                };
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    "command gate stuck busy, forcing it open; replies may be misattributed"
                );
                return self.permit(epoch, true);
            }

            tokio::time::sleep(timing.poll_interval).await;
            waited += timing.poll_interval;
        }
    }

    /// Clear the gate regardless of which acquisition holds it.
    ///
    /// Called when a definitive outcome is observed outside any permit, such
    /// as an inbound response or a stream fault.
    pub fn release(&self) {
        let mut state = self.shared.state.lock();
        state.busy = false;
    }

    fn release_epoch(&self, epoch: u64) -> bool {
        let mut state = self.shared.state.lock();
        if state.busy && state.epoch == epoch {
            state.busy = false;
            true
        } else {
            false
        }
    }

    fn permit(&self, epoch: u64, forced: bool) -> GatePermit {
        GatePermit {
            gate: self.clone(),
            epoch,
            forced,
        }
    }
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new(GateTiming::default())
    }
}

/// Proof of one gate acquisition. Dropping it releases the gate if this
/// acquisition still holds it.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    gate: CommandGate,
    epoch: u64,
    forced: bool,
}

impl GatePermit {
    /// Start the watchdog for a command that has just been written.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mark_sent(&self) {
        let gate = self.gate.clone();
        let epoch = self.epoch;
        let delay = gate.shared.timing.watchdog;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if gate.release_epoch(epoch) {
                tracing::debug!(epoch, "watchdog cleared command gate");
            }
        });
    }

    /// Whether this acquisition was forced past a stuck gate.
    pub fn was_forced(&self) -> bool {
        self.forced
    }

    /// Release now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release_epoch(self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    #[tokio::test(start_paused = true)]
    async fn free_gate_is_taken_immediately() {
        let gate = CommandGate::default();
        let start = Instant::now();
        let permit = gate.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(gate.is_busy());
        assert!(!permit.was_forced());

        permit.release();
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_proceeds_once_holder_releases() {
        let gate = CommandGate::default();
        let holder = gate.acquire().await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            holder.release();
        });

        let start = Instant::now();
        let permit = gate.acquire().await;
        assert!(!permit.was_forced());
        assert!(start.elapsed() >= Duration::from_millis(35));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn stuck_gate_is_forced_after_ceiling() {
        let gate = CommandGate::default();
        let _stuck = gate.acquire().await;

        let start = Instant::now();
        let permit = gate.acquire().await;
        assert!(permit.was_forced());
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(gate.is_busy());
        assert!(logs_contain("forcing it open"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_cannot_release_forced_acquisition() {
        let gate = CommandGate::default();
        let stuck = gate.acquire().await;
        let forced = gate.acquire().await;

        drop(stuck);
        assert!(gate.is_busy());
        drop(forced);
        assert!(!gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_clears_gate_after_send() {
        let gate = CommandGate::default();
        let permit = gate.acquire().await;
        permit.mark_sent();

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(gate.is_busy());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!gate.is_busy());

        // A new command can go out while the first caller still holds its permit.
        let next = gate.try_acquire();
        assert!(next.is_some());
        drop(permit);
        assert!(gate.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_watchdog_leaves_next_command_alone() {
        let gate = CommandGate::default();
        let first = gate.acquire().await;
        first.mark_sent();
        first.release();

        let _second = gate.acquire().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(gate.is_busy());
    }

    #[tokio::test]
    async fn inbound_release_clears_current_holder() {
        let gate = CommandGate::default();
        let _permit = gate.acquire().await;
        gate.release();
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn timing_follows_protocol_config() {
        let config = ProtocolConfig {
            gate_poll_interval_ms: 5,
            gate_wait_ceiling_ms: 250,
            watchdog_ms: 40,
            ..ProtocolConfig::default()
        };
        let timing = GateTiming::from(&config);
        assert_eq!(timing.poll_interval, Duration::from_millis(5));
        assert_eq!(timing.wait_ceiling, Duration::from_millis(250));
        assert_eq!(timing.watchdog, Duration::from_millis(40));
    }
}
