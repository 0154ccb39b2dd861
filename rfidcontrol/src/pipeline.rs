//! Read → lookup → play for one card insertion.
//!
//! A [`CardPipeline`] runs as its own task and owns the card-cycle
//! cancellation token: cancelling it aborts the read, the play retry loop
//! and the volume loop that follows a successful play.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::time::{Instant, sleep, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::PlayerContext;
use crate::encoder::{VolumeLoop, VolumeTracker};
use crate::errors::{ControlError, Result};
use crate::hardware::Hardware;
use crate::led::{LedColour, RED, StatusLed};
use crate::model::{Card, PlayReport};

/// How a card cycle ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Playback started and the volume loop ran until the card left.
    Played,
    ReadFailed,
    UnknownCard(String),
    PlayFailed,
    Cancelled,
}

pub struct CardPipeline {
    ctx: Arc<PlayerContext>,
    hardware: Hardware,
    led: StatusLed,
    /// Volume carried between card cycles.
    volume: Arc<AtomicU32>,
}

impl CardPipeline {
    pub fn new(
        ctx: Arc<PlayerContext>,
        hardware: Hardware,
        led: StatusLed,
        volume: Arc<AtomicU32>,
    ) -> Self {
        Self {
            ctx,
            hardware,
            led,
            volume,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> PipelineOutcome {
        let settings = &self.ctx.settings;

        let read = tokio::select! {
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            read = self.hardware.reader.read_card_id(settings.read_timeout) => read,
        };
        let card_id = match read {
            Ok(id) => id.to_hex(),
            Err(e) => {
                error!(error = %e, "Card read failed");
                return PipelineOutcome::ReadFailed;
            }
        };
        debug!(card_id = %card_id, "Card read");

        let Some(card) = self.ctx.cards.get(&card_id) else {
            warn!(card_id = %card_id, "Unknown card");
            return PipelineOutcome::UnknownCard(card_id);
        };

        match self.play_with_retry(&card, &cancel).await {
            Ok(report) => {
                info!(card = %card.name, device = %report.device, "Card cycle started");
            }
            Err(ControlError::Cancelled(_)) => {
                self.led.set_channel(RED, 0);
                return PipelineOutcome::Cancelled;
            }
            Err(e) => {
                error!(card = %card.name, error = %e, "Failed to play card");
                // Red stays lit until the card is removed.
                self.led.set_channel(RED, 0);
                return PipelineOutcome::PlayFailed;
            }
        }

        let seed = tokio::select! {
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            seed = self.ctx.session.volume() => seed,
        };
        match seed {
            Ok(level) => {
                let percent = (level.clamp(0.0, 1.0) * 100.0).round() as u32;
                self.volume.store(percent, Ordering::SeqCst);
            }
            Err(e) => debug!(error = %e, "Receiver volume unavailable, keeping previous level"),
        }
        self.led.show(LedColour::Playing);

        let volume_loop = VolumeLoop {
            lines: self.hardware.encoder.clone(),
            session: self.ctx.session.clone(),
            poll_interval: settings.encoder_poll,
            tracker: VolumeTracker::new(
                self.volume.load(Ordering::SeqCst),
                card.max_volume_percent(),
                settings.volume_step,
            ),
            level: self.volume.clone(),
        };
        volume_loop.run(cancel).await;
        PipelineOutcome::Played
    }

    /// Retries `play_card` every interval until it succeeds, the overall
    /// budget runs out, or the cycle is cancelled. The red channel blinks
    /// meanwhile.
    async fn play_with_retry(&self, card: &Card, cancel: &CancellationToken) -> Result<PlayReport> {
        let settings = &self.ctx.settings;
        let deadline = Instant::now() + settings.play_timeout;

        let attempts = async {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match self.ctx.session.play_card(card).await {
                    Ok(report) => return Ok::<_, ControlError>(report),
                    Err(e) => {
                        debug!(card = %card.name, attempt, error = %e, "Play attempt failed");
                    }
                }
                sleep(settings.play_retry_interval).await;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ControlError::cancelled("play card")),
            result = timeout_at(deadline, attempts) => {
                result.unwrap_or_else(|_| Err(ControlError::timeout("play card")))
            }
            _ = self.led.blink(RED, settings.retry_blink_period) => {
                Err(ControlError::cancelled("play card"))
            }
        }
    }
}
