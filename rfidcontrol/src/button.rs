//! Single push-button transport control.
//!
//! The hold duration between the rising and falling edge selects the
//! command: short press toggles play/pause, then next, then previous, and
//! very long holds do nothing.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::led::{GREEN, StatusLed};
use crate::model::{Action, PlaybackState};

const FEEDBACK_TICK: Duration = Duration::from_millis(10);
const NEXT_BAND_BLINK_TICKS: u32 = 20;
const PREV_BAND_BLINK_TICKS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldThresholds {
    /// Holds shorter than this toggle play/pause.
    pub next: Duration,
    /// Holds in `[next, prev)` skip forward.
    pub prev: Duration,
    /// Holds in `[prev, ignore)` skip back; longer holds are ignored.
    pub ignore: Duration,
}

impl Default for HoldThresholds {
    fn default() -> Self {
        Self {
            next: Duration::from_secs(1),
            prev: Duration::from_secs(3),
            ignore: Duration::from_secs(6),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    TogglePlayPause,
    Next,
    Prev,
    Ignored,
}

pub fn classify_hold(hold: Duration, thresholds: &HoldThresholds) -> ButtonAction {
    if hold < thresholds.next {
        ButtonAction::TogglePlayPause
    } else if hold < thresholds.prev {
        ButtonAction::Next
    } else if hold < thresholds.ignore {
        ButtonAction::Prev
    } else {
        ButtonAction::Ignored
    }
}

/// Command for a short press given the receiver's media state.
pub fn toggle_action(state: &PlaybackState) -> Option<Action> {
    match state {
        PlaybackState::Paused => Some(Action::Play),
        PlaybackState::Playing | PlaybackState::Buffering => Some(Action::Pause),
        _ => None,
    }
}

/// Pairs button edges into hold durations.
#[derive(Debug, Default)]
pub struct ButtonTracker {
    pressed_at: Option<Duration>,
}

impl ButtonTracker {
    pub fn press(&mut self, timestamp: Duration) {
        self.pressed_at = Some(timestamp);
    }

    /// Hold duration, or `None` for a release without a recorded press.
    pub fn release(&mut self, timestamp: Duration) -> Option<Duration> {
        self.pressed_at
            .take()
            .map(|pressed| timestamp.saturating_sub(pressed))
    }
}

/// Blinks the green channel while the button is held so the user can see
/// which command a release would trigger.
pub async fn press_feedback(led: StatusLed, thresholds: HoldThresholds, cancel: CancellationToken) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(FEEDBACK_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        ticks += 1;
        let period = match classify_hold(start.elapsed(), &thresholds) {
            ButtonAction::TogglePlayPause => continue,
            ButtonAction::Next => NEXT_BAND_BLINK_TICKS,
            ButtonAction::Prev => PREV_BAND_BLINK_TICKS,
            ButtonAction::Ignored => {
                led.set_channel(GREEN, 0);
                continue;
            }
        };
        if ticks >= period {
            led.toggle(GREEN);
            ticks = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use crate::hardware::OutputLines;
    use std::sync::{Arc, Mutex};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn hold_bands() {
        let t = HoldThresholds::default();
        assert_eq!(classify_hold(ms(800), &t), ButtonAction::TogglePlayPause);
        assert_eq!(classify_hold(ms(2000), &t), ButtonAction::Next);
        assert_eq!(classify_hold(ms(4500), &t), ButtonAction::Prev);
        assert_eq!(classify_hold(ms(7000), &t), ButtonAction::Ignored);
    }

    #[test]
    fn band_edges_belong_to_the_longer_band() {
        let t = HoldThresholds::default();
        assert_eq!(classify_hold(ms(999), &t), ButtonAction::TogglePlayPause);
        assert_eq!(classify_hold(ms(1000), &t), ButtonAction::Next);
        assert_eq!(classify_hold(ms(3000), &t), ButtonAction::Prev);
        assert_eq!(classify_hold(ms(6000), &t), ButtonAction::Ignored);
    }

    #[test]
    fn toggle_depends_on_media_state() {
        assert_eq!(toggle_action(&PlaybackState::Paused), Some(Action::Play));
        assert_eq!(toggle_action(&PlaybackState::Playing), Some(Action::Pause));
        assert_eq!(toggle_action(&PlaybackState::Buffering), Some(Action::Pause));
        assert_eq!(toggle_action(&PlaybackState::Idle), None);
    }

    #[test]
    fn release_without_press_is_ignored() {
        let mut tracker = ButtonTracker::default();
        assert_eq!(tracker.release(ms(500)), None);

        tracker.press(ms(1000));
        assert_eq!(tracker.release(ms(3500)), Some(ms(2500)));
        assert_eq!(tracker.release(ms(4000)), None);
    }

    #[derive(Default)]
    struct RecordingLeds {
        levels: Mutex<Vec<u8>>,
        writes: Mutex<usize>,
    }

    impl OutputLines for RecordingLeds {
        fn write_values(&self, values: &[u8]) -> Result<()> {
            *self.levels.lock().unwrap() = values.to_vec();
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }

        fn read_values(&self) -> Result<Vec<u8>> {
            Ok(self.levels.lock().unwrap().clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_blinks_after_one_second_and_stops_on_release() {
        let leds = Arc::new(RecordingLeds::default());
        *leds.levels.lock().unwrap() = vec![1, 0, 1];
        let led = StatusLed::new(leds.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(press_feedback(led, HoldThresholds::default(), cancel.clone()));

        tokio::time::sleep(ms(900)).await;
        assert_eq!(*leds.writes.lock().unwrap(), 0);

        tokio::time::sleep(ms(600)).await;
        assert!(*leds.writes.lock().unwrap() > 0);

        cancel.cancel();
        task.await.unwrap();
        let writes = *leds.writes.lock().unwrap();
        tokio::time::sleep(ms(1000)).await;
        assert_eq!(*leds.writes.lock().unwrap(), writes);
    }
}
