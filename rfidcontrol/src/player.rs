//! Hardware event orchestrator.
//!
//! [`Player::run`] drains the ordered event queue. Card sensor edges start
//! and end card cycles; button edges are paired into hold durations and
//! turned into one transport command per release.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::button::{ButtonAction, ButtonTracker, classify_hold, press_feedback, toggle_action};
use crate::context::PlayerContext;
use crate::errors::ControlError;
use crate::hardware::{Edge, Hardware, HardwareEvent, Line};
use crate::led::{LedColour, StatusLed};
use crate::model::{Action, ControlReply};
use crate::pipeline::{CardPipeline, PipelineOutcome};

struct CardCycle {
    cancel: CancellationToken,
    task: JoinHandle<PipelineOutcome>,
}

pub struct Player {
    ctx: Arc<PlayerContext>,
    hardware: Hardware,
    led: StatusLed,
    volume: Arc<AtomicU32>,
    cycle: Option<CardCycle>,
    /// Stop command sent on the last removal, still in flight.
    stopping: Option<JoinHandle<()>>,
    button: ButtonTracker,
    press: Option<CancellationToken>,
}

impl Player {
    pub fn new(ctx: Arc<PlayerContext>, hardware: Hardware) -> Self {
        let led = StatusLed::new(hardware.leds.clone());
        let volume = Arc::new(AtomicU32::new(ctx.settings.default_volume.min(100)));
        Self {
            ctx,
            hardware,
            led,
            volume,
            cycle: None,
            stopping: None,
            button: ButtonTracker::default(),
            press: None,
        }
    }

    /// Runs until `shutdown` fires or the event channel closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<HardwareEvent>, shutdown: CancellationToken) {
        self.led.show(LedColour::Idle);
        self.set_reader_reset(0);

        match self.hardware.card_sensor.read_values() {
            Ok(values) if values.first() == Some(&1) => {
                info!("Card present at start-up");
                self.card_inserted().await;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Card sensor read failed at start-up"),
        }

        info!("Player ready");
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                warn!("Hardware event channel closed");
                break;
            };
            self.handle(event).await;
        }

        self.end_cycle().await;
        if let Some(press) = self.press.take() {
            press.cancel();
        }
        if let Some(stopping) = self.stopping.take() {
            let _ = stopping.await;
        }
        self.led.show(LedColour::Idle);
        info!("Player stopped");
    }

    pub async fn handle(&mut self, event: HardwareEvent) {
        debug!(line = ?event.line, edge = ?event.edge, "Hardware event");
        match (event.line, event.edge) {
            (Line::CardSensor, Edge::Rising) => self.card_inserted().await,
            (Line::CardSensor, Edge::Falling) => self.card_removed().await,
            (Line::Button, Edge::Rising) => self.button_pressed(event),
            (Line::Button, Edge::Falling) => self.button_released(event),
        }
    }

    async fn card_inserted(&mut self) {
        self.end_cycle().await;
        info!("Card inserted");
        self.set_reader_reset(1);

        let cancel = CancellationToken::new();
        let pipeline = CardPipeline::new(
            self.ctx.clone(),
            self.hardware.clone(),
            self.led.clone(),
            self.volume.clone(),
        );
        // A stop still in flight must not land on the new card's media.
        let stopping = self.stopping.take();
        let cycle_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Some(stopping) = stopping {
                tokio::select! {
                    _ = cycle_cancel.cancelled() => return PipelineOutcome::Cancelled,
                    _ = stopping => {}
                }
            }
            pipeline.run(cycle_cancel).await
        });
        self.cycle = Some(CardCycle { cancel, task });
    }

    async fn card_removed(&mut self) {
        info!("Card removed");
        self.set_reader_reset(0);
        self.end_cycle().await;
        self.led.show(LedColour::Idle);

        // Receiver round trips stay off the event loop.
        let session = self.ctx.session.clone();
        let previous = self.stopping.take();
        self.stopping = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match session.control(Action::Stop).await {
                Ok(ControlReply::Skipped) | Err(ControlError::NoSession) => {}
                Ok(_) => debug!("Playback stopped"),
                Err(e) => warn!(error = %e, "Failed to stop playback"),
            }
        }));
    }

    /// Cancels the current card cycle and waits for its task.
    async fn end_cycle(&mut self) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        cycle.cancel.cancel();
        match cycle.task.await {
            Ok(outcome) => debug!(?outcome, "Card cycle ended"),
            Err(e) => error!(error = %e, "Card cycle task failed"),
        }
    }

    fn button_pressed(&mut self, event: HardwareEvent) {
        self.button.press(event.timestamp);
        if let Some(previous) = self.press.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        tokio::spawn(press_feedback(
            self.led.clone(),
            self.ctx.settings.thresholds,
            cancel.clone(),
        ));
        self.press = Some(cancel);
    }

    fn button_released(&mut self, event: HardwareEvent) {
        if let Some(press) = self.press.take() {
            press.cancel();
        }
        let Some(hold) = self.button.release(event.timestamp) else {
            debug!("Button release without press, ignored");
            return;
        };

        let action = classify_hold(hold, &self.ctx.settings.thresholds);
        debug!(hold_ms = hold.as_millis() as u64, ?action, "Button released");

        // The feedback blink may have left green in either state.
        let playing = self
            .cycle
            .as_ref()
            .is_some_and(|cycle| !cycle.task.is_finished());
        let resting = if playing {
            LedColour::Playing
        } else {
            LedColour::Idle
        };
        if action != ButtonAction::TogglePlayPause {
            self.led.show(resting);
        }
        if action == ButtonAction::Ignored {
            return;
        }

        // Receiver round trips stay off the event loop.
        let session = self.ctx.session.clone();
        let led = self.led.clone();
        tokio::spawn(async move {
            let command = match action {
                ButtonAction::TogglePlayPause => match session.media_state().await {
                    Ok(state) => match toggle_action(&state) {
                        Some(command) => command,
                        None => {
                            debug!(state = state.as_str(), "Nothing to toggle");
                            return;
                        }
                    },
                    Err(e) => {
                        debug!(error = %e, "Media state unavailable");
                        return;
                    }
                },
                ButtonAction::Next => Action::Next,
                ButtonAction::Prev => Action::Prev,
                ButtonAction::Ignored => return,
            };

            match session.control(command).await {
                Ok(_) => {
                    info!(%command, "Button command sent");
                    match command {
                        Action::Play => led.show(LedColour::Playing),
                        Action::Pause => led.show(LedColour::Paused),
                        _ => {}
                    }
                }
                Err(e) => warn!(%command, error = %e, "Button command failed"),
            }
        });
    }

    fn set_reader_reset(&self, level: u8) {
        if let Err(e) = self.hardware.reader_reset.write_values(&[level]) {
            warn!(level, error = %e, "Failed to drive reader reset line");
        }
    }
}
