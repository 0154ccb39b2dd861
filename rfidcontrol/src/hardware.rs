//! Hardware ports used by the player.
//!
//! Edge-triggered inputs (card sensor, button) are delivered as
//! [`HardwareEvent`]s on a single ordered channel. Polled inputs and outputs
//! are exposed as small line groups read or written in one call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::model::CardId;

/// Byte terminating a card packet on the serial link.
pub const CARD_PACKET_END: u8 = 0x03;
/// Length of a complete card packet, terminator included.
pub const CARD_PACKET_LEN: usize = 16;
/// Position of the card id inside a packet.
const CARD_ID_RANGE: std::ops::Range<usize> = 1..11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line {
    CardSensor,
    Button,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// One edge on an event-driven input line.
///
/// `timestamp` is monotonic and comparable between events of the same source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareEvent {
    pub line: Line,
    pub edge: Edge,
    pub timestamp: Duration,
}

impl HardwareEvent {
    pub fn new(line: Line, edge: Edge, timestamp: Duration) -> Self {
        Self {
            line,
            edge,
            timestamp,
        }
    }
}

/// A group of input lines read together.
pub trait InputLines: Send + Sync {
    fn read_values(&self) -> Result<Vec<u8>>;
}

/// A group of output lines written together.
pub trait OutputLines: Send + Sync {
    fn write_values(&self, values: &[u8]) -> Result<()>;

    /// Current output levels.
    fn read_values(&self) -> Result<Vec<u8>>;
}

/// Source of card ids.
#[async_trait]
pub trait CardReader: Send + Sync {
    /// Reads one card id, giving up with `ControlError::Timeout` after `timeout`.
    async fn read_card_id(&self, timeout: Duration) -> Result<CardId>;
}

/// Producer of edge events for the card sensor and the button.
pub trait LineSource: Send {
    /// Starts watching the event lines. All edges arrive, in order, on the
    /// returned channel; it closes when the watchers stop.
    fn events(&mut self) -> Result<mpsc::Receiver<HardwareEvent>>;
}

/// The polled and output lines the player drives.
#[derive(Clone)]
pub struct Hardware {
    /// Two quadrature lines `[a, b]`.
    pub encoder: Arc<dyn InputLines>,
    /// Level of the card presence sensor.
    pub card_sensor: Arc<dyn InputLines>,
    /// RGB status LED `[red, green, blue]`.
    pub leds: Arc<dyn OutputLines>,
    /// Card reader reset line.
    pub reader_reset: Arc<dyn OutputLines>,
    pub reader: Arc<dyn CardReader>,
}

/// Accumulates serial bytes and yields card ids from complete packets.
///
/// Every run of bytes ending with [`CARD_PACKET_END`] is a candidate packet;
/// only runs of exactly [`CARD_PACKET_LEN`] bytes are accepted.
#[derive(Debug, Default)]
pub struct CardPacketDecoder {
    buffer: Vec<u8>,
}

impl CardPacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<CardId> {
        self.buffer.push(byte);
        if byte != CARD_PACKET_END {
            // Only the last CARD_PACKET_LEN - 1 bytes can start a valid packet.
            if self.buffer.len() >= CARD_PACKET_LEN {
                self.buffer.remove(0);
            }
            return None;
        }
        let packet = std::mem::take(&mut self.buffer);
        (packet.len() == CARD_PACKET_LEN).then(|| CardId::new(&packet[CARD_ID_RANGE]))
    }
}
