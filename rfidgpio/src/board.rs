use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::StreamExt;
use gpio_cdev::{Chip, EventRequestFlags, EventType, LineRequestFlags, MultiLineHandle};
use rfidcontrol::{
    CardReader, ControlError, Edge, Hardware, HardwareEvent, InputLines, Line, LineSource,
    OutputLines, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;

const CONSUMER: &str = "rfidplayer";
const EVENT_QUEUE: usize = 64;

/// Line offsets on the GPIO chip.
#[derive(Clone, Debug)]
pub struct GpioPins {
    pub chip: String,
    pub card_sensor: u32,
    pub button: u32,
    /// Quadrature lines `[a, b]`.
    pub encoder: Vec<u32>,
    /// `[red, green, blue]`.
    pub leds: Vec<u32>,
    pub reader_reset: u32,
    pub button_debounce: Duration,
}

struct GpioInputs {
    handle: MultiLineHandle,
}

impl InputLines for GpioInputs {
    fn read_values(&self) -> Result<Vec<u8>> {
        self.handle
            .get_values()
            .map_err(|e| ControlError::hardware_io("gpio inputs", e))
    }
}

struct GpioOutputs {
    handle: MultiLineHandle,
}

impl OutputLines for GpioOutputs {
    fn write_values(&self, values: &[u8]) -> Result<()> {
        self.handle
            .set_values(values)
            .map_err(|e| ControlError::hardware_io("gpio outputs", e))
    }

    fn read_values(&self) -> Result<Vec<u8>> {
        self.handle
            .get_values()
            .map_err(|e| ControlError::hardware_io("gpio outputs", e))
    }
}

/// Level of an event line, latched by its watcher.
///
/// The kernel grants a line to one request only, so the sensor level is
/// read through its event handle instead of a second request.
#[derive(Default)]
struct LatchedLevel(AtomicU8);

impl InputLines for LatchedLevel {
    fn read_values(&self) -> Result<Vec<u8>> {
        Ok(vec![self.0.load(Ordering::SeqCst)])
    }
}

pub struct GpioBoard {
    chip: Chip,
    pins: GpioPins,
    encoder: Arc<GpioInputs>,
    leds: Arc<GpioOutputs>,
    reader_reset: Arc<GpioOutputs>,
    card_level: Arc<LatchedLevel>,
}

impl GpioBoard {
    /// Requests the polled and output lines. Event lines are requested by
    /// [`LineSource::events`].
    pub fn open(pins: GpioPins) -> Result<Self> {
        let gpio_err = |e: gpio_cdev::Error| ControlError::hardware_io(&pins.chip, e);
        let mut chip = Chip::new(&pins.chip).map_err(gpio_err)?;

        if pins.encoder.len() != 2 {
            return Err(ControlError::validation(
                "encoder pins",
                format!("expected 2 lines, got {}", pins.encoder.len()),
            ));
        }
        if pins.leds.len() != 3 {
            return Err(ControlError::validation(
                "led pins",
                format!("expected 3 lines, got {}", pins.leds.len()),
            ));
        }

        let encoder = chip
            .get_lines(&pins.encoder)
            .and_then(|lines| lines.request(LineRequestFlags::INPUT, &[0, 0], CONSUMER))
            .map_err(gpio_err)?;
        let leds = chip
            .get_lines(&pins.leds)
            .and_then(|lines| lines.request(LineRequestFlags::OUTPUT, &[0, 1, 1], CONSUMER))
            .map_err(gpio_err)?;
        let reader_reset = chip
            .get_lines(&[pins.reader_reset])
            .and_then(|lines| lines.request(LineRequestFlags::OUTPUT, &[0], CONSUMER))
            .map_err(gpio_err)?;

        info!(chip = %pins.chip, "GPIO lines requested");
        Ok(Self {
            chip,
            encoder: Arc::new(GpioInputs { handle: encoder }),
            leds: Arc::new(GpioOutputs { handle: leds }),
            reader_reset: Arc::new(GpioOutputs {
                handle: reader_reset,
            }),
            card_level: Arc::new(LatchedLevel::default()),
            pins,
        })
    }

    pub fn hardware(&self, reader: Arc<dyn CardReader>) -> Hardware {
        Hardware {
            encoder: self.encoder.clone(),
            card_sensor: self.card_level.clone(),
            leds: self.leds.clone(),
            reader_reset: self.reader_reset.clone(),
            reader,
        }
    }

    fn watch(
        &mut self,
        offset: u32,
        line: Line,
        debounce: Duration,
        level: Option<Arc<LatchedLevel>>,
        tx: mpsc::Sender<HardwareEvent>,
    ) -> Result<()> {
        let gpio_err = |e: gpio_cdev::Error| ControlError::hardware_io(&self.pins.chip, e);
        let mut events = self
            .chip
            .get_line(offset)
            .and_then(|l| {
                l.async_events(
                    LineRequestFlags::INPUT,
                    EventRequestFlags::BOTH_EDGES,
                    CONSUMER,
                )
            })
            .map_err(gpio_err)?;

        if let Some(level) = &level {
            let value = events.as_ref().get_value().map_err(gpio_err)?;
            level.0.store(value, Ordering::SeqCst);
        }

        tokio::spawn(async move {
            let mut debouncer = Debouncer::new(debounce);
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        error!(?line, error = %e, "GPIO event stream failed");
                        break;
                    }
                };
                let edge = match event.event_type() {
                    EventType::RisingEdge => Edge::Rising,
                    EventType::FallingEdge => Edge::Falling,
                };
                let timestamp = Duration::from_nanos(event.timestamp());
                if !debouncer.accept(edge, timestamp) {
                    continue;
                }
                if let Some(level) = &level {
                    level.0.store(u8::from(edge == Edge::Rising), Ordering::SeqCst);
                }
                if tx.send(HardwareEvent::new(line, edge, timestamp)).await.is_err() {
                    debug!(?line, "Event queue closed");
                    break;
                }
            }
            warn!(?line, "GPIO watcher stopped");
        });
        Ok(())
    }
}

impl LineSource for GpioBoard {
    fn events(&mut self) -> Result<mpsc::Receiver<HardwareEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let card_level = self.card_level.clone();
        self.watch(
            self.pins.card_sensor,
            Line::CardSensor,
            Duration::ZERO,
            Some(card_level),
            tx.clone(),
        )?;
        self.watch(
            self.pins.button,
            Line::Button,
            self.pins.button_debounce,
            None,
            tx,
        )?;
        Ok(rx)
    }
}
