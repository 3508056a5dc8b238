use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::state::SessionState;
use crate::traits::loopback::SessionProbe;

/// An observed change of the target session's activity state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTransition {
    pub from: Option<SessionState>,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

/// Tracks the loopback target's session state from inside the capture loop.
///
/// Purely observational: transitions are reported, never acted on. Capture
/// keeps decoding packets in every state until stopped.
pub struct CaptureSessionMonitor {
    probe: Option<Box<dyn SessionProbe>>,
    state: Option<SessionState>,
    interval: Duration,
    next_poll: Option<Instant>,
}

impl CaptureSessionMonitor {
    pub fn new(probe: Option<Box<dyn SessionProbe>>, interval: Duration) -> Self {
        Self {
            probe,
            state: None,
            interval,
            next_poll: None,
        }
    }

    /// Last observed state; `None` before the first read or without a probe.
    pub fn state(&self) -> Option<SessionState> {
        self.state
    }

    /// Read the initial state without reporting a transition.
    pub fn prime(&mut self, now: Instant) -> Option<SessionState> {
        if let Some(probe) = self.probe.as_mut() {
            self.state = probe.state();
        }
        self.next_poll = Some(now + self.interval);
        self.state
    }

    /// Poll the probe if the interval has elapsed. Returns a transition when
    /// the state changed since the last read.
    pub fn poll(&mut self, now: Instant) -> Option<SessionTransition> {
        let probe = self.probe.as_mut()?;
        if self.next_poll.is_some_and(|due| now < due) {
            return None;
        }
        self.next_poll = Some(now + self.interval);

        let observed = probe.state()?;
        if self.state == Some(observed) {
            return None;
        }
        let transition = SessionTransition {
            from: self.state,
            to: observed,
            at: Utc::now(),
        };
        self.state = Some(observed);
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProbe;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn prime_reads_initial_state_silently() {
        let (probe, _handle) = ScriptedProbe::new(SessionState::Active);
        let mut monitor = CaptureSessionMonitor::new(Some(Box::new(probe)), INTERVAL);
        let start = Instant::now();

        assert_eq!(monitor.prime(start), Some(SessionState::Active));
        assert_eq!(monitor.poll(start + INTERVAL), None);
    }

    #[test]
    fn reports_each_change_once() {
        let (probe, handle) = ScriptedProbe::new(SessionState::Active);
        let mut monitor = CaptureSessionMonitor::new(Some(Box::new(probe)), INTERVAL);
        let start = Instant::now();
        monitor.prime(start);

        handle.set(SessionState::Inactive);
        let t = monitor.poll(start + INTERVAL).unwrap();
        assert_eq!(t.from, Some(SessionState::Active));
        assert_eq!(t.to, SessionState::Inactive);
        assert_eq!(monitor.poll(start + INTERVAL * 2), None);

        handle.set(SessionState::Expired);
        let t = monitor.poll(start + INTERVAL * 3).unwrap();
        assert_eq!(t.to, SessionState::Expired);
        assert_eq!(monitor.state(), Some(SessionState::Expired));
    }

    #[test]
    fn respects_poll_interval() {
        let (probe, handle) = ScriptedProbe::new(SessionState::Active);
        let mut monitor = CaptureSessionMonitor::new(Some(Box::new(probe)), INTERVAL);
        let start = Instant::now();
        monitor.prime(start);

        handle.set(SessionState::Inactive);
        assert_eq!(monitor.poll(start + Duration::from_millis(40)), None);
        assert!(monitor.poll(start + INTERVAL).is_some());
    }

    #[test]
    fn lost_session_keeps_last_state() {
        let (probe, handle) = ScriptedProbe::new(SessionState::Active);
        let mut monitor = CaptureSessionMonitor::new(Some(Box::new(probe)), INTERVAL);
        let start = Instant::now();
        monitor.prime(start);

        handle.lose();
        assert_eq!(monitor.poll(start + INTERVAL), None);
        assert_eq!(monitor.state(), Some(SessionState::Active));
    }

    #[test]
    fn without_probe_never_reports() {
        let mut monitor = CaptureSessionMonitor::new(None, INTERVAL);
        let start = Instant::now();
        assert_eq!(monitor.prime(start), None);
        assert_eq!(monitor.poll(start + INTERVAL * 10), None);
    }
}
