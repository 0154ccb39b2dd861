//! Linux adapters for the player's hardware ports.
//!
//! [`GpioBoard`] drives the GPIO character device; [`SerialCardReader`]
//! reads card packets from the serial reader.

mod board;
mod debounce;
mod serial;

pub use board::{GpioBoard, GpioPins};
pub use debounce::Debouncer;
pub use serial::{SerialCardReader, read_card_packet};
