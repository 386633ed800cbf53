//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the streaming crates:
//! - Logging and tracing initialisation
//! - Event bus for playback and stream notifications
//!
//! ## Overview
//!
//! Nothing here knows about audio formats. The playback crate publishes into
//! the [`events::EventBus`] and logs through `tracing`; hosts call
//! [`logging::init_logging`] once and subscribe to whichever events they need.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventSeverity, EventStream, PlaybackEvent, StreamEvent};
