//! Double-buffered surface state.

use std::sync::Arc;

use crate::core::feedback::frame_callback::FrameCallback;
use crate::core::feedback::presentation::PresentationFeedback;
use crate::util::geometry::{Point, Size};
use crate::util::region::Region;

use super::buffer::{Buffer, BufferBinding};
use super::damage::Damage;
use super::transform::Transform;
use super::viewport::{SurfaceGeometry, ViewportState};

/// `wp_content_type_v1` hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    None,
    Photo,
    Video,
    Game,
}

impl ContentType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ContentType::None,
            1 => ContentType::Photo,
            2 => ContentType::Video,
            3 => ContentType::Game,
            _ => return None,
        })
    }
}

/// Pending buffer change.
#[derive(Debug, Clone, Default)]
pub enum BufferAttach {
    /// No attach request since the last commit
    #[default]
    Unchanged,
    /// `attach(NULL)`
    Detach,
    Attach(Arc<Buffer>),
}

impl BufferAttach {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, BufferAttach::Unchanged)
    }
}

/// State built by client requests, applied on commit.
///
/// Also used for the cached block of synchronized subsurfaces.
#[derive(Debug, Default)]
pub struct SurfaceState {
    pub buffer: BufferAttach,
    /// Accumulated `attach(x, y)` / `offset` delta
    pub offset: Point,
    pub scale: i32,
    pub transform: Transform,
    pub viewport: ViewportState,
    /// None means infinite (accept all input)
    pub input_region: Option<Region>,
    /// None means empty (fully transparent)
    pub opaque_region: Option<Region>,
    pub damage: Damage,
    pub frame_callbacks: Vec<FrameCallback>,
    pub presentation_feedbacks: Vec<PresentationFeedback>,
    pub content_type: ContentType,
}

impl SurfaceState {
    pub fn new() -> Self {
        Self {
            scale: 1,
            ..Default::default()
        }
    }

    /// Move the transient parts out and copy the persistent ones.
    /// `self` keeps the persistent values for the next commit.
    pub fn take_commit(&mut self) -> SurfaceState {
        SurfaceState {
            buffer: std::mem::take(&mut self.buffer),
            offset: std::mem::take(&mut self.offset),
            scale: self.scale,
            transform: self.transform,
            viewport: self.viewport,
            input_region: self.input_region.clone(),
            opaque_region: self.opaque_region.clone(),
            damage: std::mem::take(&mut self.damage),
            frame_callbacks: std::mem::take(&mut self.frame_callbacks),
            presentation_feedbacks: std::mem::take(&mut self.presentation_feedbacks),
            content_type: self.content_type,
        }
    }

    /// Give back the transient parts of a state taken for a commit that
    /// was refused. Requests made since keep precedence.
    pub fn restore(&mut self, taken: SurfaceState) {
        if self.buffer.is_unchanged() {
            self.buffer = taken.buffer;
        }
        self.offset += taken.offset;
        let mut damage = taken.damage;
        damage.merge(std::mem::take(&mut self.damage));
        self.damage = damage;
        let mut callbacks = taken.frame_callbacks;
        callbacks.append(&mut self.frame_callbacks);
        self.frame_callbacks = callbacks;
        let mut feedbacks = taken.presentation_feedbacks;
        feedbacks.append(&mut self.presentation_feedbacks);
        self.presentation_feedbacks = feedbacks;
    }

    /// Fold a newer commit into this cached one. Later values win; damage,
    /// offsets and frame callbacks accumulate. Feedback attached to the
    /// older commit can no longer be presented and is discarded.
    pub fn merge(mut self, newer: SurfaceState) -> SurfaceState {
        if !newer.buffer.is_unchanged() {
            self.buffer = newer.buffer;
        }
        self.offset += newer.offset;
        self.scale = newer.scale;
        self.transform = newer.transform;
        self.viewport = newer.viewport;
        self.input_region = newer.input_region;
        self.opaque_region = newer.opaque_region;
        self.damage.merge(newer.damage);
        self.frame_callbacks.extend(newer.frame_callbacks);
        for feedback in self.presentation_feedbacks.drain(..) {
            feedback.discard();
        }
        self.presentation_feedbacks = newer.presentation_feedbacks;
        self.content_type = newer.content_type;
        self
    }
}

/// State currently visible to the compositor.
#[derive(Debug)]
pub struct CurrentState {
    pub buffer: Option<Arc<BufferBinding>>,
    pub geometry: SurfaceGeometry,
    pub scale: i32,
    pub transform: Transform,
    pub viewport: ViewportState,
    pub input_region: Option<Region>,
    pub opaque_region: Option<Region>,
    /// Surface-local damage of the last commit
    pub damage: Region,
    pub content_type: ContentType,
    /// Frame callbacks waiting for the surface to reach an output
    pub frame_callbacks: Vec<FrameCallback>,
}

impl Default for CurrentState {
    fn default() -> Self {
        Self {
            buffer: None,
            geometry: SurfaceGeometry::default(),
            scale: 1,
            transform: Transform::Normal,
            viewport: ViewportState::default(),
            input_region: None,
            opaque_region: None,
            damage: Region::new(),
            content_type: ContentType::None,
            frame_callbacks: Vec::new(),
        }
    }
}

impl CurrentState {
    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Logical surface size (0x0 without a buffer)
    pub fn size(&self) -> Size {
        if self.buffer.is_some() {
            self.geometry.size
        } else {
            Size::default()
        }
    }
}
