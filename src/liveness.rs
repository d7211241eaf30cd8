use std::time::Duration;

use tokio::time::{delay_for, interval_at, Delay, Instant, Interval};

/// Owns the three independent timers the connection engine drives: the
/// phone-probe interval, the idle-debounce deadline, and a cancellation
/// hook for the keep-alive ping the handshake layer owns.
pub(crate) struct LivenessController {
    phone_probe: Option<Interval>,
    phone_response_ms: u64,
    idle_debounce: Option<Delay>,
    max_idle_ms: u64,
    phone_connected: bool,
    /// Whether a keep-alive ping is currently considered armed. The ping
    /// itself is driven by the handshake layer, not a timer owned here;
    /// this is the slot that layer's cancellation hook clears through
    /// `cancel_keepalive()`.
    keepalive_armed: bool,
}

impl LivenessController {
    pub(crate) fn new(phone_response_ms: u64, max_idle_ms: u64) -> Self {
        LivenessController {
            phone_probe: None,
            phone_response_ms,
            idle_debounce: None,
            max_idle_ms,
            phone_connected: true,
            keepalive_armed: false,
        }
    }

    /// Arms the phone-probe interval if it is not already running. Using
    /// `interval_at(now + period, period)` rather than plain `interval`
    /// avoids tokio's immediate first tick, so the cadence genuinely
    /// reflects `phone_response_ms` instead of firing at t=0.
    pub(crate) fn arm_phone_probe(&mut self) {
        if self.phone_probe.is_none() {
            let period = Duration::from_millis(self.phone_response_ms);
            self.phone_probe = Some(interval_at(Instant::now() + period, period));
        }
    }

    pub(crate) fn disarm_phone_probe(&mut self) {
        self.phone_probe = None;
    }

    pub(crate) fn start_debounce(&mut self) {
        self.idle_debounce = Some(delay_for(Duration::from_millis(self.max_idle_ms)));
    }

    pub(crate) fn reset_debounce(&mut self) {
        if self.idle_debounce.is_some() {
            self.start_debounce();
        }
    }

    pub(crate) fn cancel_debounce(&mut self) {
        self.idle_debounce = None;
    }

    pub(crate) fn set_phone_connected(&mut self, connected: bool) {
        self.phone_connected = connected;
    }

    pub(crate) fn phone_connected(&self) -> bool {
        self.phone_connected
    }

    pub(crate) fn arm_keepalive(&mut self) {
        self.keepalive_armed = true;
    }

    /// Cancels the keep-alive ping. Exposed so the handshake layer can tear
    /// it down without reaching into this controller's other timers.
    pub(crate) fn cancel_keepalive(&mut self) {
        self.keepalive_armed = false;
    }

    pub(crate) fn keepalive_armed(&self) -> bool {
        self.keepalive_armed
    }

    /// Releases every timer. Called on state exit from `Open`.
    pub(crate) fn cancel_all(&mut self) {
        self.phone_probe = None;
        self.idle_debounce = None;
        self.cancel_keepalive();
    }

    /// Ticks the phone-probe interval, if armed. Intended for use inside a
    /// `tokio::select!` branch in the actor's run loop.
    pub(crate) async fn tick_phone_probe(&mut self) {
        match &mut self.phone_probe {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Waits for the idle-debounce deadline, if armed.
    pub(crate) async fn tick_debounce(&mut self) {
        match &mut self.idle_debounce {
            Some(delay) => delay.await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_phone_connected_true() {
        let liveness = LivenessController::new(50, 30);
        assert!(liveness.phone_connected());
    }

    #[test]
    fn arming_probe_twice_does_not_replace_the_interval() {
        let mut liveness = LivenessController::new(50, 30);
        liveness.arm_phone_probe();
        assert!(liveness.phone_probe.is_some());
        liveness.arm_phone_probe();
        assert!(liveness.phone_probe.is_some());
    }

    #[test]
    fn cancel_all_releases_every_timer() {
        let mut liveness = LivenessController::new(50, 30);
        liveness.arm_phone_probe();
        liveness.start_debounce();
        liveness.arm_keepalive();
        liveness.cancel_all();
        assert!(liveness.phone_probe.is_none());
        assert!(liveness.idle_debounce.is_none());
        assert!(!liveness.keepalive_armed());
    }

    #[test]
    fn cancel_keepalive_clears_the_armed_flag() {
        let mut liveness = LivenessController::new(50, 30);
        liveness.arm_keepalive();
        assert!(liveness.keepalive_armed());
        liveness.cancel_keepalive();
        assert!(!liveness.keepalive_armed());
    }

    #[tokio::test]
    async fn phone_probe_ticks_once_the_period_elapses() {
        tokio::time::pause();
        let mut liveness = LivenessController::new(50, 1_000);
        liveness.arm_phone_probe();
        // Paused time auto-advances to the nearest pending timer, so this
        // resolves without a real 50ms wait.
        liveness.tick_phone_probe().await;
    }

    #[tokio::test]
    async fn debounce_does_not_fire_before_max_idle_ms() {
        tokio::time::pause();
        let mut liveness = LivenessController::new(50, 1_000);
        liveness.start_debounce();
        let result =
            tokio::time::timeout(Duration::from_millis(10), liveness.tick_debounce()).await;
        assert!(
            result.is_err(),
            "debounce fired before max_idle_ms elapsed"
        );
    }
}
