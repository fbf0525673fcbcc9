pub mod errors;
pub mod context;
pub mod surface;
pub mod role;
pub mod state;
pub mod output;
pub mod backend;
pub mod feedback;
pub mod render;
pub mod wayland;
pub mod compositor;
pub mod runtime;

// Re-export key types
pub use compositor::{Compositor, CompositorEvent};
pub use context::{CompositorContext, PresentationClock, ProcessLock};
pub use runtime::{FrameTiming, FrameTimingConfig};
pub use state::CompositorState;
