//! Applying a committed state: geometry resolution and the pending to current move.

use std::sync::Arc;

use crate::core::errors::ProtocolError;
use crate::core::feedback::frame_callback::FrameCallback;
use crate::core::feedback::presentation::PresentationFeedback;
use crate::util::geometry::{Point, Rect};
use crate::util::region::Region;

use super::buffer::BufferBinding;
use super::state::{BufferAttach, CurrentState, SurfaceState};
use super::viewport::SurfaceGeometry;

/// What a promotion changed, for the coordinator to act on.
#[derive(Debug, Default)]
pub struct CommitDelta {
    /// Binding that was current before and is no longer referenced by it
    pub replaced: Option<Arc<BufferBinding>>,
    pub offset: Point,
    pub buffer_changed: bool,
    pub geometry_changed: bool,
    /// Surface-local damage
    pub damage: Region,
    pub frame_callbacks: Vec<FrameCallback>,
    pub presentation_feedbacks: Vec<PresentationFeedback>,
}

/// Resolve the geometry `state` would have once applied on top of `current`.
pub fn resolve_geometry(state: &SurfaceState, current: &CurrentState) -> Result<SurfaceGeometry, ProtocolError> {
    let buffer_size = match &state.buffer {
        BufferAttach::Unchanged => current.buffer.as_ref().map(|b| b.size),
        BufferAttach::Detach => None,
        BufferAttach::Attach(buffer) => Some(buffer.buffer_type.size()),
    };
    SurfaceGeometry::resolve(buffer_size, state.scale, state.transform, &state.viewport)
}

/// Performs the atomic update of a surface state.
///
/// `binding` must be the imported buffer when `state.buffer` is an attach.
pub fn apply_commit(
    state: SurfaceState,
    current: &mut CurrentState,
    binding: Option<Arc<BufferBinding>>,
    geometry: SurfaceGeometry,
) -> CommitDelta {
    let mut delta = CommitDelta {
        offset: state.offset,
        ..Default::default()
    };

    // 1. Buffer
    match state.buffer {
        BufferAttach::Unchanged => {}
        BufferAttach::Detach => {
            delta.buffer_changed = current.buffer.is_some();
            delta.replaced = current.buffer.take();
        }
        BufferAttach::Attach(_) => {
            delta.buffer_changed = true;
            delta.replaced = std::mem::replace(&mut current.buffer, binding);
        }
    }

    // 2. Geometry and persistent attributes
    delta.geometry_changed = current.geometry != geometry;
    current.geometry = geometry;
    current.scale = state.scale;
    current.transform = state.transform;
    current.viewport = state.viewport;
    current.input_region = state.input_region;
    current.opaque_region = state.opaque_region;
    current.content_type = state.content_type;

    // 3. Damage, converted with the geometry just applied
    delta.damage = if delta.geometry_changed && current.buffer.is_some() {
        Region::from_rect(Rect::from_loc_size(Point::default(), geometry.size))
    } else {
        state.damage.to_surface_local(&geometry)
    };
    current.damage = delta.damage.clone();

    // 4. Transient lists go to the coordinator
    delta.frame_callbacks = state.frame_callbacks;
    delta.presentation_feedbacks = state.presentation_feedbacks;

    delta
}
