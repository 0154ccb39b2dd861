//! Card-driven playback on Cast receivers.
//!
//! The hardware ports, the receiver protocol and the discovery transport
//! are traits; [`player::Player`] ties them together around one
//! [`session::SessionManager`].

pub mod button;
pub mod cast;
pub mod context;
pub mod discovery;
pub mod encoder;
pub mod errors;
pub mod hardware;
pub mod led;
pub mod model;
pub mod pipeline;
pub mod player;
pub mod registry;
pub mod session;

pub use button::HoldThresholds;
pub use cast::{CastConnector, CastLink, TlsCastConnector};
pub use context::{PlayerContext, PlayerSettings};
pub use discovery::{DeviceBrowser, MdnsBrowser};
pub use errors::{ControlError, Result};
pub use hardware::{
    CardReader, Edge, Hardware, HardwareEvent, InputLines, Line, LineSource, OutputLines,
};
pub use model::{
    Action, Card, CardId, CastStatus, ClientAction, ClientSummary, ControlReply, Device,
    MediaLink, PlayReport, PlaybackState,
};
pub use player::Player;
pub use registry::{CardRegistry, DeviceRegistry, JsonCardRegistry, JsonDeviceRegistry};
pub use session::SessionManager;
