//! Rotary encoder volume control.
//!
//! The two quadrature lines are polled at a fixed interval. Each valid
//! Gray-code transition moves a counter by one; the counter is clamped to
//! the card's maximum volume and pushed to the receiver on step boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hardware::InputLines;
use crate::session::SessionManager;

/// Gray-code decoder for a two-line quadrature encoder.
///
/// The state is `a << 1 | b`. Clockwise sequence: 0 → 2 → 3 → 1 → 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuadratureDecoder {
    state: u8,
}

impl QuadratureDecoder {
    pub fn new(a: u8, b: u8) -> Self {
        Self {
            state: ((a & 1) << 1) | (b & 1),
        }
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    /// Feeds the current line levels; returns +1, -1 or 0.
    pub fn step(&mut self, a: u8, b: u8) -> i32 {
        let next = ((a & 1) << 1) | (b & 1);
        let delta = match (self.state, next) {
            (0, 2) | (2, 3) | (3, 1) | (1, 0) => 1,
            (0, 1) | (1, 3) | (3, 2) | (2, 0) => -1,
            _ => 0,
        };
        self.state = next;
        delta
    }
}

/// Encoder count and the last value pushed to the receiver.
#[derive(Debug, Clone)]
pub struct VolumeTracker {
    count: i32,
    max: i32,
    step: i32,
    last_pushed: i32,
}

impl VolumeTracker {
    /// `initial` is the receiver level at play start. It is clamped to
    /// `[0, max]`; a clamped value is pushed on the next update.
    pub fn new(initial: u32, max: u32, step: u32) -> Self {
        let max = max.min(100) as i32;
        let initial = initial.min(100) as i32;
        Self {
            count: initial.clamp(0, max),
            max,
            step: step.max(1) as i32,
            last_pushed: initial,
        }
    }

    pub fn count(&self) -> u32 {
        self.count as u32
    }

    /// Applies an encoder delta. Returns the new level when it sits on a
    /// step boundary and differs from the last one pushed.
    pub fn apply(&mut self, delta: i32) -> Option<u32> {
        self.count = (self.count + delta).clamp(0, self.max);
        if self.count % self.step == 0 && self.count != self.last_pushed {
            self.last_pushed = self.count;
            Some(self.count as u32)
        } else {
            None
        }
    }
}

/// Polls the encoder lines and forwards volume changes to the session.
pub struct VolumeLoop {
    pub lines: Arc<dyn InputLines>,
    pub session: Arc<SessionManager>,
    pub poll_interval: Duration,
    pub tracker: VolumeTracker,
    /// Last level pushed, shared with the player.
    pub level: Arc<AtomicU32>,
}

impl VolumeLoop {
    /// Runs until `cancel` fires.
    ///
    /// Polling and pushing are decoupled: the poller publishes the latest
    /// level on a watch channel and the pusher sends only the newest value,
    /// so a slow receiver never stalls the polling.
    pub async fn run(self, cancel: CancellationToken) {
        let VolumeLoop {
            lines,
            session,
            poll_interval,
            mut tracker,
            level,
        } = self;
        let (tx, mut rx) = watch::channel(None::<u32>);

        let poller = {
            let cancel = cancel.clone();
            async move {
                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut decoder: Option<QuadratureDecoder> = None;
                let mut failing = false;

                // The first update applies the clamp to the seeded level.
                if let Some(initial) = tracker.apply(0) {
                    tx.send_replace(Some(initial));
                }

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let values = match lines.read_values() {
                        Ok(values) if values.len() >= 2 => {
                            failing = false;
                            values
                        }
                        Ok(values) => {
                            if !failing {
                                warn!(count = values.len(), "Encoder returned too few lines");
                                failing = true;
                            }
                            continue;
                        }
                        Err(e) => {
                            if !failing {
                                warn!(error = %e, "Encoder read failed");
                                failing = true;
                            }
                            continue;
                        }
                    };
                    let delta = match decoder.as_mut() {
                        Some(decoder) => decoder.step(values[0], values[1]),
                        None => {
                            decoder = Some(QuadratureDecoder::new(values[0], values[1]));
                            0
                        }
                    };
                    if delta == 0 {
                        continue;
                    }
                    if let Some(new_level) = tracker.apply(delta) {
                        tx.send_replace(Some(new_level));
                    }
                }
                debug!(volume = tracker.count(), "Encoder loop stopped");
            }
        };

        let pusher = async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
                let latest = *rx.borrow_and_update();
                let Some(target) = latest else {
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = session.set_volume(f64::from(target) / 100.0) => match result {
                        Ok(()) => {
                            level.store(target, Ordering::SeqCst);
                            debug!(volume = target, "Volume pushed");
                        }
                        Err(e) => warn!(volume = target, error = %e, "Failed to set volume"),
                    },
                }
            }
        };

        tokio::join!(poller, pusher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CW: [(u8, u8); 4] = [(1, 0), (1, 1), (0, 1), (0, 0)];

    #[test]
    fn clockwise_sequence_increments() {
        let mut decoder = QuadratureDecoder::new(0, 0);
        for (a, b) in CW {
            assert_eq!(decoder.step(a, b), 1);
        }
        assert_eq!(decoder.state(), 0);
    }

    #[test]
    fn counter_clockwise_sequence_decrements() {
        let mut decoder = QuadratureDecoder::new(0, 0);
        for (a, b) in CW.iter().rev().skip(1).chain(std::iter::once(&(0, 0))) {
            assert_eq!(decoder.step(*a, *b), -1);
        }
    }

    #[test]
    fn every_transition_has_the_expected_delta() {
        let expected = |from: u8, to: u8| match (from, to) {
            (0, 2) | (2, 3) | (3, 1) | (1, 0) => 1,
            (0, 1) | (1, 3) | (3, 2) | (2, 0) => -1,
            _ => 0,
        };
        for from in 0u8..4 {
            for to in 0u8..4 {
                let mut decoder = QuadratureDecoder::new(from >> 1, from & 1);
                assert_eq!(
                    decoder.step(to >> 1, to & 1),
                    expected(from, to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn repeated_and_double_steps_are_ignored() {
        let mut decoder = QuadratureDecoder::new(0, 0);
        assert_eq!(decoder.step(0, 0), 0);
        assert_eq!(decoder.step(1, 1), 0);
        assert_eq!(decoder.step(0, 0), 0);
    }

    #[test]
    fn count_clamps_to_bounds() {
        let mut tracker = VolumeTracker::new(58, 60, 5);
        for _ in 0..10 {
            tracker.apply(1);
        }
        assert_eq!(tracker.count(), 60);

        for _ in 0..100 {
            tracker.apply(-1);
        }
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn pushes_only_on_new_step_boundaries() {
        let mut tracker = VolumeTracker::new(50, 100, 5);
        let pushed: Vec<u32> = [1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1, -1]
            .into_iter()
            .filter_map(|d| tracker.apply(d))
            .collect();
        assert_eq!(pushed, vec![55, 50]);
    }

    #[test]
    fn seeded_level_above_max_is_pushed_once() {
        let mut tracker = VolumeTracker::new(80, 60, 5);
        assert_eq!(tracker.apply(0), Some(60));
        assert_eq!(tracker.apply(0), None);
    }
}
