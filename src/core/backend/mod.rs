//! Graphics backend contract.
//!
//! A `Backend` enumerates outputs and drives one render loop per output.
//! The render loop reports back to the dispatch thread through
//! `BackendEvent`s posted on the `CompositorContext`.

pub mod offscreen;

use std::os::unix::io::OwnedFd;
use std::sync::Arc;

use thiserror::Error;

use crate::core::context::{CompositorContext, PresentationClock};
use crate::core::errors::{CoreError, Result};
use crate::core::feedback::dmabuf::DmaFeedback;
use crate::core::feedback::presentation::{PresentationFlags, PresentationInfo};
use crate::core::output::{OutputId, OutputInfo, OutputMode, OutputShared, ScenePainter};
use crate::core::render::renderer::TextureId;
use crate::util::geometry::Point;
use crate::util::region::Region;

pub use offscreen::{OffscreenBackend, OffscreenOutput, RunningOutputs};

/// Render thread → dispatch thread notifications.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A frame reached the screen
    FramePresented {
        output: OutputId,
        frame: u64,
        info: PresentationInfo,
    },
    /// A frame was rendered but never shown
    FrameDiscarded { output: OutputId, frame: u64 },
    /// The output went away (unplug, fatal render error)
    OutputUnplugged { output: OutputId },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend has no outputs")]
    NoOutputs,

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("backend is suspended")]
    Suspended,

    #[error("output {0} is not running")]
    UnknownOutput(OutputId),

    #[error("render worker: {0}")]
    Worker(String),
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        CoreError::Backend(err.to_string())
    }
}

/// The swapchain side of an output, as seen by the painter.
pub trait FrameTarget: Send + Sync {
    fn image_count(&self) -> usize;

    /// Index of the image the next frame renders into
    fn current_image(&self) -> usize;

    /// Frames since `index` was last presented, 0 when its content is
    /// undefined
    fn image_age(&self, index: usize) -> u32;

    fn has_buffer_damage_support(&self) -> bool;

    /// Damage hint for the frame being rendered (output-local pixels)
    fn set_damage(&self, region: &Region);
}

pub trait BackendOutput: FrameTarget {
    fn name(&self) -> &str;

    /// Wake the render loop. Returns false when the output is not running.
    fn repaint(&self) -> bool;

    fn has_cursor_plane(&self) -> bool {
        false
    }

    /// Show `texture` on the hardware cursor plane. Returns false when the
    /// plane is not available and the cursor must be composited.
    fn set_cursor(&self, _texture: Option<TextureId>, _hotspot: Point) -> bool {
        false
    }

    fn set_cursor_position(&self, _position: Point) {}

    fn modes(&self) -> Vec<OutputMode>;

    fn set_mode(&self, index: usize) -> Result<()>;

    fn gamma_size(&self) -> usize {
        0
    }

    fn set_gamma(&self, _table: &[u16]) -> Result<()> {
        Err(BackendError::Unsupported("gamma").into())
    }

    fn vsync(&self) -> bool;

    /// Returns false when the output cannot change its vsync mode
    fn set_vsync(&self, enabled: bool) -> bool;

    /// Flags reported with presentation feedback
    fn presentation_flags(&self) -> PresentationFlags;

    /// Stop the render loop. Blocks until it has finished its current frame.
    fn shutdown(&self) {}
}

pub trait Backend: Send {
    fn name(&self) -> &'static str;

    fn init(&mut self, ctx: &CompositorContext) -> Result<()>;

    fn uninit(&mut self);

    fn suspend(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Outputs available after `init`
    fn outputs(&self) -> Vec<OutputInfo>;

    /// Start the render loop for the `index`th output.
    fn start_output(
        &mut self,
        index: usize,
        shared: Arc<OutputShared>,
        painter: Arc<ScenePainter>,
    ) -> Result<Arc<dyn BackendOutput>>;

    fn stop_output(&mut self, output: OutputId);

    fn default_feedback(&self) -> Option<Arc<DmaFeedback>>;

    fn presentation_clock(&self) -> PresentationClock;

    /// DRM lease for `outputs`
    fn create_lease(&mut self, _outputs: &[OutputId]) -> Result<OwnedFd> {
        Err(BackendError::Unsupported("leases").into())
    }
}
