//! Workspace facade crate.
//!
//! Re-exports the individual workspace crates (`core-playback`,
//! `core-runtime`, `bridge-traits`, `bridge-desktop`) so host applications can
//! depend on `audio-stream-workspace` and enable the documented features
//! without wiring each crate individually.

pub use bridge_traits;
pub use core_playback;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

#[cfg(feature = "runtime")]
pub use core_runtime;
