//! Ping/pong heartbeat bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

/// Consecutive unanswered PINGs after which the transport is considered dead.
pub const MAX_MISSED_PONGS: u32 = 2;

/// Heartbeat configuration
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between pings
    pub ping_interval: Duration,
    /// Time a pong has to arrive after its ping
    pub ping_timeout: Duration,
}

/// What the session should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a PING now.
    SendPing,
    /// A PING is outstanding and still within its deadline.
    Wait,
    /// Too many PONGs were missed; close the session.
    Expired,
}

/// Tracks outstanding PINGs for one session.
///
/// Driven by the session task: [`on_tick`](Self::on_tick) on every interval
/// tick, [`on_pong`](Self::on_pong) whenever a PONG arrives.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    outstanding: Option<Instant>,
    missed: u32,
}

impl HeartbeatMonitor {
    /// Creates a monitor with no outstanding ping.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            outstanding: None,
            missed: 0,
        }
    }

    /// The tick period the session should use.
    pub fn interval(&self) -> Duration {
        self.config.ping_interval
    }

    /// Number of consecutive PINGs that went unanswered.
    pub fn missed(&self) -> u32 {
        self.missed
    }

    /// Decides the heartbeat step at `now`.
    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(sent_at) = self.outstanding {
            if now.saturating_duration_since(sent_at) < self.config.ping_timeout {
                return HeartbeatAction::Wait;
            }
            self.missed += 1;
            self.outstanding = None;
            if self.missed >= MAX_MISSED_PONGS {
                return HeartbeatAction::Expired;
            }
        }

        self.outstanding = Some(now);
        HeartbeatAction::SendPing
    }

    /// Records a PONG, clearing the outstanding ping and the miss count.
    pub fn on_pong(&mut self) {
        self.outstanding = None;
        self.missed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig {
            ping_interval: Duration::from_millis(100),
            ping_timeout: Duration::from_millis(50),
        })
    }

    #[test]
    fn test_two_missed_pongs_expire() {
        let start = Instant::now();
        let mut hb = monitor();

        assert_eq!(hb.on_tick(start), HeartbeatAction::SendPing);
        assert_eq!(
            hb.on_tick(start + Duration::from_millis(100)),
            HeartbeatAction::SendPing
        );
        assert_eq!(hb.missed(), 1);
        assert_eq!(
            hb.on_tick(start + Duration::from_millis(200)),
            HeartbeatAction::Expired
        );
        assert_eq!(hb.missed(), 2);
    }

    #[test]
    fn test_pong_resets_misses() {
        let start = Instant::now();
        let mut hb = monitor();

        hb.on_tick(start);
        hb.on_tick(start + Duration::from_millis(100));
        assert_eq!(hb.missed(), 1);

        hb.on_pong();
        assert_eq!(hb.missed(), 0);
        assert_eq!(
            hb.on_tick(start + Duration::from_millis(200)),
            HeartbeatAction::SendPing
        );
        assert_eq!(
            hb.on_tick(start + Duration::from_millis(300)),
            HeartbeatAction::SendPing
        );
        assert_eq!(hb.missed(), 1);
    }

    #[test]
    fn test_waits_inside_deadline() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatConfig {
            ping_interval: Duration::from_millis(10),
            ping_timeout: Duration::from_millis(50),
        });

        assert_eq!(hb.on_tick(start), HeartbeatAction::SendPing);
        assert_eq!(
            hb.on_tick(start + Duration::from_millis(10)),
            HeartbeatAction::Wait
        );
        assert_eq!(hb.missed(), 0);
    }
}
