//! Presence hysteresis.
//!
//! Turns a per-frame "subject seen" signal into arrival events. An arrival
//! fires on the Absent -> Present edge only; the tracker stays Present through
//! any run of detections and through gaps shorter than the reset window, and
//! re-arms silently once the window elapses with nothing seen.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceState {
    Absent,
    Present,
}

/// What a single observation did to the tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Absent -> Present. Exactly one snapshot is owed for this edge.
    Arrived,
    /// Present and seen again.
    Stayed,
    /// Present, not seen, still inside the reset window.
    Grace,
    /// Present -> Absent after a full window without detections.
    Departed,
    /// Absent and not seen.
    Idle,
}

impl Transition {
    pub fn is_arrival(&self) -> bool {
        matches!(self, Transition::Arrived)
    }
}

/// Per-camera presence tracker. Never persisted across restarts.
#[derive(Clone, Debug)]
pub struct PresenceTracker {
    state: PresenceState,
    last_seen: Option<Instant>,
    reset_window: Duration,
}

impl PresenceTracker {
    pub fn new(reset_window: Duration) -> Self {
        Self {
            state: PresenceState::Absent,
            last_seen: None,
            reset_window,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn is_present(&self) -> bool {
        self.state == PresenceState::Present
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    pub fn reset_window(&self) -> Duration {
        self.reset_window
    }

    /// Feed one processed frame's outcome.
    pub fn observe(&mut self, seen: bool, now: Instant) -> Transition {
        match (self.state, seen) {
            (PresenceState::Absent, true) => {
                self.state = PresenceState::Present;
                self.last_seen = Some(now);
                Transition::Arrived
            }
            (PresenceState::Present, true) => {
                self.last_seen = Some(now);
                Transition::Stayed
            }
            (PresenceState::Present, false) => {
                let absent_for = self
                    .last_seen
                    .map(|seen_at| now.saturating_duration_since(seen_at))
                    .unwrap_or(Duration::MAX);
                if absent_for >= self.reset_window {
                    self.state = PresenceState::Absent;
                    Transition::Departed
                } else {
                    Transition::Grace
                }
            }
            (PresenceState::Absent, false) => Transition::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    /// Feed `(t, seen)` samples and count arrivals.
    fn arrivals(tracker: &mut PresenceTracker, base: Instant, samples: &[(f64, bool)]) -> usize {
        samples
            .iter()
            .filter(|(t, seen)| tracker.observe(*seen, at(base, *t)).is_arrival())
            .count()
    }

    #[test]
    fn short_gap_merges_and_long_gap_rearms() {
        let base = Instant::now();
        let mut tracker = PresenceTracker::new(Duration::from_secs(7));

        assert_eq!(tracker.observe(true, at(base, 0.0)), Transition::Arrived);
        for t in 1..=6 {
            assert_eq!(tracker.observe(false, at(base, t as f64)), Transition::Grace);
        }
        // 6.5s since last seen < 7s: same visit.
        assert_eq!(tracker.observe(true, at(base, 6.5)), Transition::Stayed);

        let mut departed = false;
        for t in 7..=15 {
            if tracker.observe(false, at(base, t as f64)) == Transition::Departed {
                departed = true;
            }
        }
        assert!(departed);
        assert_eq!(tracker.state(), PresenceState::Absent);
        assert_eq!(tracker.observe(true, at(base, 15.5)), Transition::Arrived);
    }

    #[test]
    fn continuous_presence_fires_once() {
        let base = Instant::now();
        let mut tracker = PresenceTracker::new(Duration::from_secs(5));
        let samples: Vec<(f64, bool)> = (0..200).map(|i| (i as f64 * 0.2, true)).collect();
        assert_eq!(arrivals(&mut tracker, base, &samples), 1);
        assert!(tracker.is_present());
    }

    #[test]
    fn one_arrival_per_run_when_gaps_cover_window() {
        let base = Instant::now();
        let mut tracker = PresenceTracker::new(Duration::from_secs(5));
        let mut samples = Vec::new();
        let mut t = 0.0;
        for run in 0..4 {
            for _ in 0..(3 + run) {
                samples.push((t, true));
                t += 0.5;
            }
            // Gap of 6s, sampled every second.
            for _ in 0..6 {
                t += 1.0;
                samples.push((t, false));
            }
            t += 0.5;
        }
        assert_eq!(arrivals(&mut tracker, base, &samples), 4);
    }

    #[test]
    fn absence_without_presence_is_idle() {
        let base = Instant::now();
        let mut tracker = PresenceTracker::new(Duration::from_secs(5));
        assert_eq!(tracker.observe(false, base), Transition::Idle);
        assert_eq!(tracker.last_seen(), None);
    }

    #[test]
    fn departure_happens_exactly_at_window() {
        let base = Instant::now();
        let mut tracker = PresenceTracker::new(Duration::from_secs(5));
        tracker.observe(true, base);
        assert_eq!(tracker.observe(false, at(base, 4.999)), Transition::Grace);
        assert_eq!(tracker.observe(false, at(base, 5.0)), Transition::Departed);
    }
}
