//! RGB status LED.
//!
//! The LED is wired common-anode: a line at 0 lights its channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::hardware::OutputLines;

pub const RED: usize = 0;
pub const GREEN: usize = 1;
pub const BLUE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedColour {
    /// No card inserted.
    Idle,
    /// Card playing, or ready.
    Playing,
    Paused,
}

impl LedColour {
    /// Line levels `[red, green, blue]`.
    pub fn levels(&self) -> [u8; 3] {
        match self {
            LedColour::Idle => [0, 1, 1],
            LedColour::Playing => [1, 0, 1],
            LedColour::Paused => [1, 1, 0],
        }
    }
}

/// Best-effort driver for the status LED. Failures are only logged.
#[derive(Clone)]
pub struct StatusLed {
    lines: Arc<dyn OutputLines>,
}

impl StatusLed {
    pub fn new(lines: Arc<dyn OutputLines>) -> Self {
        Self { lines }
    }

    pub fn show(&self, colour: LedColour) {
        if let Err(e) = self.lines.write_values(&colour.levels()) {
            debug!(?colour, error = %e, "LED write failed");
        }
    }

    pub fn set_channel(&self, channel: usize, level: u8) {
        self.update(channel, |_| level);
    }

    pub fn toggle(&self, channel: usize) {
        self.update(channel, |level| level ^ 1);
    }

    fn update(&self, channel: usize, f: impl FnOnce(u8) -> u8) {
        let result = self.lines.read_values().and_then(|mut values| {
            if let Some(level) = values.get_mut(channel) {
                *level = f(*level);
            }
            self.lines.write_values(&values)
        });
        if let Err(e) = result {
            debug!(channel, error = %e, "LED update failed");
        }
    }

    /// Toggles `channel` every `period`. Never returns; cancel by dropping.
    pub async fn blink(&self, channel: usize, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.toggle(channel);
        }
    }
}
