//! Rendering: the renderer contract, the shared scene graph and deferred
//! GPU resource cleanup.

pub mod cleanup;
pub mod node;
pub mod renderer;
pub mod scene;

pub use cleanup::{CleanupQueue, CleanupTask};
pub use node::SceneNode;
pub use renderer::{DrawOp, HeadlessRenderer, RecordedOp, RenderError, RenderTarget, Renderer, SharedRenderer, TextureId};
pub use scene::{FlattenedSurface, Scene};
