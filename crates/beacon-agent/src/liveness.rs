//! Heartbeat liveness monitoring and link recovery

use crate::channel::ControlChannel;
use beacon_proto::Envelope;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Heartbeat timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Period between heartbeat ticks
    pub interval: Duration,
    /// Silence after which the link is considered dead
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::with_interval(Duration::from_millis(2000))
    }
}

impl HeartbeatConfig {
    /// Config with the given interval and a timeout of twice the interval
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * 2,
        }
    }
}

/// Time of the last heartbeat seen from the controller.
///
/// Cloned into the heartbeat handler, which writes it, and read by the
/// monitor on each tick.
#[derive(Debug, Clone, Default)]
pub struct LivenessState {
    last_heartbeat: Arc<Mutex<Option<Instant>>>,
}

impl LivenessState {
    /// Create a state with no heartbeat recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat now
    pub fn mark(&self) {
        self.mark_at(Instant::now());
    }

    /// Record a heartbeat at a given instant
    pub fn mark_at(&self, at: Instant) {
        *self.last_heartbeat.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
    }

    /// Last recorded heartbeat
    pub fn last(&self) -> Option<Instant> {
        *self.last_heartbeat.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Monitor phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Link believed healthy
    Live,
    /// Link lost; every tick tries to reestablish
    Recovering,
}

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Heartbeat sent, no recovery needed
    Healthy,
    /// The link was torn down and reestablished
    Recovered,
    /// Reestablishment failed; the next tick retries
    StillRecovering,
}

/// Detects a dead link from heartbeat silence and rebuilds it.
///
/// Ticks run on the agent event loop, so at most one recovery cycle is in
/// flight at any time.
pub struct LivenessMonitor {
    /// Channel being watched
    channel: Arc<ControlChannel>,
    /// Written by the heartbeat handler
    state: LivenessState,
    /// Timing
    config: HeartbeatConfig,
    /// Current phase
    phase: Phase,
}

impl LivenessMonitor {
    /// Create a monitor in the `Live` phase
    pub fn new(channel: Arc<ControlChannel>, state: LivenessState, config: HeartbeatConfig) -> Self {
        Self {
            channel,
            state,
            config,
            phase: Phase::Live,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Timing in use
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Force the monitor into recovery, e.g. when the first establishment
    /// failed
    pub fn enter_recovery(&mut self) {
        self.phase = Phase::Recovering;
    }

    /// One heartbeat period: ping the controller, then check for a timeout
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        self.channel.send(Envelope::ping()).await;

        match self.phase {
            Phase::Recovering => self.recover().await,
            Phase::Live => match self.state.last() {
                Some(last) if now.saturating_duration_since(last) > self.config.timeout => {
                    warn!(
                        "No heartbeat for {:?} (timeout {:?}), recovering control channel",
                        now.saturating_duration_since(last),
                        self.config.timeout
                    );
                    self.phase = Phase::Recovering;
                    self.recover().await
                }
                _ => TickOutcome::Healthy,
            },
        }
    }

    async fn recover(&mut self) -> TickOutcome {
        self.channel.teardown().await;

        match self.channel.establish().await {
            Ok(()) => {
                info!("Control channel recovered");
                self.phase = Phase::Live;
                self.state.mark();
                TickOutcome::Recovered
            }
            Err(e) => {
                error!("Failed to reestablish control channel: {}", e);
                debug!("Staying in recovery, retrying on next tick");
                TickOutcome::StillRecovering
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{channel_with, MockFactory};

    fn monitor_for(factory: &Arc<MockFactory>) -> (LivenessMonitor, LivenessState) {
        let (channel, _rx) = channel_with(&[(10, factory.clone())]);
        let state = LivenessState::new();
        let monitor = LivenessMonitor::new(channel, state.clone(), HeartbeatConfig::default());
        (monitor, state)
    }

    #[test]
    fn test_default_timing() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_millis(2000));
        assert_eq!(config.timeout, Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sends_ping() {
        let factory = MockFactory::new("mock");
        let (mut monitor, _state) = monitor_for(&factory);
        monitor.channel.establish().await.unwrap();

        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Healthy);
        assert_eq!(factory.sent_operations(), vec!["connect", "heartbeat"]);
        assert!(factory.sent().last().unwrap().contains(r#""data":"ping""#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_yet_never_times_out() {
        let factory = MockFactory::new("mock");
        let (mut monitor, _state) = monitor_for(&factory);
        monitor.channel.establish().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Healthy);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_single_recovery() {
        let factory = MockFactory::new("mock");
        let (mut monitor, state) = monitor_for(&factory);
        monitor.channel.establish().await.unwrap();
        state.mark();

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Healthy);

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Recovered);
        assert_eq!(factory.teardowns(), 1);
        assert_eq!(factory.connects(), 2);
        assert_eq!(monitor.phase(), Phase::Live);

        // Reestablishment resets the clock, so the next tick is healthy
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Healthy);
        assert_eq!(factory.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_recovery_retries_every_tick() {
        let factory = MockFactory::new("mock");
        let (mut monitor, state) = monitor_for(&factory);
        monitor.channel.establish().await.unwrap();
        state.mark();

        factory.set_available(false);
        tokio::time::advance(Duration::from_millis(4500)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::StillRecovering);
        assert_eq!(monitor.phase(), Phase::Recovering);
        assert!(!monitor.channel.is_established().await);

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::StillRecovering);

        factory.set_available(true);
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Recovered);
        assert_eq!(monitor.phase(), Phase::Live);
        assert_eq!(factory.connects(), 4);
        assert!(state.last().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_heartbeat_keeps_link() {
        let factory = MockFactory::new("mock");
        let (mut monitor, state) = monitor_for(&factory);
        monitor.channel.establish().await.unwrap();

        for _ in 0..5 {
            state.mark();
            tokio::time::advance(Duration::from_millis(2000)).await;
            assert_eq!(monitor.tick(Instant::now()).await, TickOutcome::Healthy);
        }
        assert_eq!(factory.teardowns(), 0);
    }
}
