// Vitrine Compositor Toolkit
//
// Rust-first building blocks for Wayland display servers.
// The core owns the surface commit engine and the per-output repaint
// pipeline; backends and renderers plug in through traits.

pub mod core;
pub mod config;
pub mod util;
pub mod prelude;

pub use config::CompositorConfig;
pub use core::{Compositor, CompositorContext, CompositorEvent, CompositorState};
