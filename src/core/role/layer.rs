//! `zwlr_layer_surface_v1` role.

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::output::{Anchor, Edge, ExclusiveZone, OutputId};
use crate::core::surface::SurfaceId;
use crate::util::geometry::{Rect, Size};
use crate::util::logging::ROLE;
use crate::wlog;

use super::configure::ConfigureQueue;
use super::{CommittedView, PendingView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `zwlr_layer_surface_v1` error codes
pub mod error {
    pub const INVALID_SURFACE_STATE: u32 = 0;
    pub const INVALID_SIZE: u32 = 1;
    pub const INVALID_ANCHOR: u32 = 2;
    pub const INVALID_KEYBOARD_INTERACTIVITY: u32 = 3;
    pub const INVALID_EXCLUSIVE_EDGE: u32 = 4;
}

/// `zwlr_layer_shell_v1` error codes
pub mod shell_error {
    pub const ROLE: u32 = 0;
    pub const INVALID_LAYER: u32 = 1;
    pub const ALREADY_CONSTRUCTED: u32 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Layer {
    Background,
    Bottom,
    #[default]
    Top,
    Overlay,
}

impl Layer {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Layer::Background,
            1 => Layer::Bottom,
            2 => Layer::Top,
            3 => Layer::Overlay,
            _ => return None,
        })
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyboardInteractivity {
    #[default]
    None,
    Exclusive,
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

/// Double-buffered layer surface state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerState {
    /// Desired size, 0 = stretch between the anchored edges
    pub size: Size,
    pub anchor: Anchor,
    pub exclusive_zone: i32,
    pub exclusive_edge: Option<Edge>,
    pub margin: Margins,
    pub keyboard_interactivity: KeyboardInteractivity,
    pub layer: Layer,
}

impl LayerState {
    fn arrangement_differs(&self, other: &LayerState) -> bool {
        self.size != other.size
            || self.anchor != other.anchor
            || self.exclusive_zone != other.exclusive_zone
            || self.exclusive_edge != other.exclusive_edge
            || self.margin != other.margin
            || self.layer != other.layer
    }
}

#[derive(Debug, Clone)]
pub struct LayerRole {
    pub output: Option<OutputId>,
    pub namespace: String,
    pub pending: LayerState,
    pub current: LayerState,
    pub configures: ConfigureQueue<Size>,
    initial_commit_done: bool,
    mapped: bool,
    /// Arranged geometry in global coordinates
    pub geometry: Rect,
    /// `closed` was sent
    pub closed: bool,
    alive: bool,
}

impl LayerRole {
    pub fn new(output: Option<OutputId>, layer: Layer, namespace: String) -> Self {
        let state = LayerState {
            layer,
            ..Default::default()
        };
        Self {
            output,
            namespace,
            pending: state,
            current: state,
            configures: ConfigureQueue::new(),
            initial_commit_done: false,
            mapped: false,
            geometry: Rect::default(),
            closed: false,
            alive: true,
        }
    }

    fn error(code: u32, msg: impl Into<String>) -> ProtocolError {
        ProtocolError::new(ErrorTarget::LayerSurface, code, msg)
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.pending.size = Size::new(width.min(i32::MAX as u32) as i32, height.min(i32::MAX as u32) as i32);
    }

    pub fn set_anchor(&mut self, raw: u32) -> Result<(), ProtocolError> {
        let anchor = Anchor::from_bits(raw).ok_or_else(|| Self::error(error::INVALID_ANCHOR, format!("invalid anchor {}", raw)))?;
        self.pending.anchor = anchor;
        Ok(())
    }

    pub fn set_exclusive_zone(&mut self, zone: i32) {
        self.pending.exclusive_zone = zone.max(-1);
    }

    pub fn set_exclusive_edge(&mut self, raw: u32) -> Result<(), ProtocolError> {
        self.pending.exclusive_edge = match raw {
            0 => None,
            _ => {
                let anchor = Anchor::from_bits(raw).filter(|a| a.bits().count_ones() == 1);
                let edge = anchor.and_then(|a| Edge::from_anchor(a, None));
                Some(edge.ok_or_else(|| Self::error(error::INVALID_EXCLUSIVE_EDGE, "exclusive edge must be one edge"))?)
            }
        };
        Ok(())
    }

    pub fn set_margin(&mut self, top: i32, right: i32, bottom: i32, left: i32) {
        self.pending.margin = Margins { top, right, bottom, left };
    }

    pub fn set_keyboard_interactivity(&mut self, raw: u32) -> Result<(), ProtocolError> {
        self.pending.keyboard_interactivity = match raw {
            0 => KeyboardInteractivity::None,
            1 => KeyboardInteractivity::Exclusive,
            2 => KeyboardInteractivity::OnDemand,
            _ => {
                return Err(Self::error(
                    error::INVALID_KEYBOARD_INTERACTIVITY,
                    format!("invalid keyboard interactivity {}", raw),
                ))
            }
        };
        Ok(())
    }

    pub fn set_layer(&mut self, raw: u32) -> Result<(), ProtocolError> {
        self.pending.layer = Layer::from_raw(raw).ok_or_else(|| {
            ProtocolError::new(ErrorTarget::LayerShell, shell_error::INVALID_LAYER, format!("invalid layer {}", raw))
        })?;
        Ok(())
    }

    pub fn send_configure(&mut self, serial: u32, size: Size) {
        self.configures.push(serial, size);
    }

    pub fn ack_configure(&mut self, serial: u32) -> Result<Size, ProtocolError> {
        self.configures.ack(serial).ok_or_else(|| {
            Self::error(
                error::INVALID_SURFACE_STATE,
                format!("serial {} was not sent or is superseded", serial),
            )
        })
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Reservation made on the output by the committed state
    pub fn exclusive_zone(&self, surface: SurfaceId) -> ExclusiveZone {
        let state = &self.current;
        let edge = Edge::from_anchor(state.anchor, state.exclusive_edge);
        let margin = match edge {
            Some(Edge::Top) => state.margin.top,
            Some(Edge::Bottom) => state.margin.bottom,
            Some(Edge::Left) => state.margin.left,
            Some(Edge::Right) => state.margin.right,
            None => 0,
        };
        let size = if state.exclusive_zone > 0 {
            state.exclusive_zone + margin
        } else {
            state.exclusive_zone
        };
        ExclusiveZone {
            surface,
            layer: state.layer.index(),
            edge,
            size,
        }
    }

    /// Place the surface on an output. `available` is the output area left
    /// by exclusive zones; surfaces with an exclusive zone of -1 use the
    /// full output.
    pub fn arrange(&mut self, output: Rect, available: Rect) -> Rect {
        let state = &self.current;
        let bounds = if state.exclusive_zone == -1 || state.exclusive_zone > 0 {
            output
        } else {
            available
        };
        let m = state.margin;
        let horizontal = Anchor::LEFT | Anchor::RIGHT;
        let vertical = Anchor::TOP | Anchor::BOTTOM;

        let mut width = state.size.width;
        if width == 0 && state.anchor.contains(horizontal) {
            width = bounds.width - m.left - m.right;
        }
        let mut height = state.size.height;
        if height == 0 && state.anchor.contains(vertical) {
            height = bounds.height - m.top - m.bottom;
        }

        let x = if state.anchor.contains(horizontal) {
            bounds.x + m.left + (bounds.width - m.left - m.right - width) / 2
        } else if state.anchor.contains(Anchor::LEFT) {
            bounds.x + m.left
        } else if state.anchor.contains(Anchor::RIGHT) {
            bounds.right() - m.right - width
        } else {
            bounds.x + (bounds.width - width) / 2
        };
        let y = if state.anchor.contains(vertical) {
            bounds.y + m.top + (bounds.height - m.top - m.bottom - height) / 2
        } else if state.anchor.contains(Anchor::TOP) {
            bounds.y + m.top
        } else if state.anchor.contains(Anchor::BOTTOM) {
            bounds.bottom() - m.bottom - height
        } else {
            bounds.y + (bounds.height - height) / 2
        };

        self.geometry = Rect::new(x, y, width.max(0), height.max(0));
        self.geometry
    }

    pub fn close(&mut self) -> bool {
        if self.closed || !self.alive {
            return false;
        }
        self.closed = true;
        true
    }

    pub fn destroy(&mut self) {
        self.alive = false;
        self.mapped = false;
    }
}

impl RoleHandler for LayerRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Layer
    }

    fn validate_commit(&self, pending: &PendingView) -> Result<(), ProtocolError> {
        let state = &self.pending;
        if pending.has_buffer() && !self.configures.ever_acked() {
            return Err(Self::error(
                error::INVALID_SURFACE_STATE,
                "buffer committed before the first configure was acked",
            ));
        }
        let horizontal = Anchor::LEFT | Anchor::RIGHT;
        let vertical = Anchor::TOP | Anchor::BOTTOM;
        if state.size.width == 0 && !state.anchor.contains(horizontal) {
            return Err(Self::error(error::INVALID_SIZE, "width 0 requires left and right anchors"));
        }
        if state.size.height == 0 && !state.anchor.contains(vertical) {
            return Err(Self::error(error::INVALID_SIZE, "height 0 requires top and bottom anchors"));
        }
        if let Some(edge) = state.exclusive_edge {
            if !state.anchor.contains(edge.anchor()) {
                return Err(Self::error(
                    error::INVALID_EXCLUSIVE_EDGE,
                    "exclusive edge is not an anchored edge",
                ));
            }
        }
        Ok(())
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        if !self.alive || self.closed {
            return RoleCommitOutcome::default();
        }
        let changed = self.pending.arrangement_differs(&self.current);
        self.current = self.pending;

        let needs_configure = !self.initial_commit_done;
        self.initial_commit_done = true;

        let was_mapped = self.mapped;
        self.mapped = committed.has_buffer && self.configures.ever_acked();
        if was_mapped && !self.mapped {
            // Unmapped: the next commit is an initial commit again
            wlog!(ROLE, "layer surface '{}' unmapped", self.namespace);
            self.initial_commit_done = false;
            self.configures.clear();
        }
        RoleCommitOutcome {
            mapped: self.mapped,
            needs_configure,
            relayout: changed || needs_configure || was_mapped != self.mapped,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::Point;

    fn pending(buffer: bool) -> PendingView {
        PendingView {
            buffer_size: buffer.then(|| Size::new(100, 30)),
            size: Size::new(100, 30),
            attaches: buffer,
        }
    }

    fn committed(has_buffer: bool) -> CommittedView {
        CommittedView {
            has_buffer,
            size: Size::new(100, 30),
            offset: Point::default(),
            bounds: Rect::new(0, 0, 100, 30),
            parent_mapped: false,
        }
    }

    fn panel() -> LayerRole {
        let mut role = LayerRole::new(Some(1), Layer::Top, "panel".into());
        role.set_anchor((Anchor::TOP | Anchor::LEFT | Anchor::RIGHT).bits()).unwrap();
        role.set_size(0, 30);
        role.set_exclusive_zone(30);
        role
    }

    #[test]
    fn test_initial_commit_flow() {
        let mut role = panel();
        assert!(role.validate_commit(&pending(true)).is_err());
        role.validate_commit(&pending(false)).unwrap();
        let outcome = role.handle_commit(&committed(false));
        assert!(outcome.needs_configure && !outcome.mapped);

        role.send_configure(3, Size::new(1920, 30));
        assert_eq!(role.ack_configure(3).unwrap(), Size::new(1920, 30));
        role.validate_commit(&pending(true)).unwrap();
        let outcome = role.handle_commit(&committed(true));
        assert!(outcome.mapped && !outcome.needs_configure);
    }

    #[test]
    fn test_size_requires_anchors() {
        let mut role = LayerRole::new(None, Layer::Top, String::new());
        role.set_anchor(Anchor::TOP.bits()).unwrap();
        role.set_size(0, 30);
        let err = role.validate_commit(&pending(false)).unwrap_err();
        assert_eq!(err.code, error::INVALID_SIZE);
        assert!(role.set_anchor(16).is_err());
        assert!(role.set_keyboard_interactivity(3).is_err());
        assert!(role.set_exclusive_edge((Anchor::TOP | Anchor::LEFT).bits()).is_err());
    }

    #[test]
    fn test_exclusive_edge_must_be_anchored() {
        let mut role = panel();
        role.set_exclusive_edge(Anchor::BOTTOM.bits()).unwrap();
        let err = role.validate_commit(&pending(false)).unwrap_err();
        assert_eq!(err.code, error::INVALID_EXCLUSIVE_EDGE);
    }

    #[test]
    fn test_zone_and_arrangement() {
        let mut role = panel();
        role.set_margin(5, 0, 0, 0);
        role.handle_commit(&committed(false));
        let zone = role.exclusive_zone(9);
        assert_eq!(zone.edge, Some(Edge::Top));
        assert_eq!(zone.size, 35);
        let output = Rect::new(0, 0, 1920, 1080);
        assert_eq!(role.arrange(output, output), Rect::new(0, 5, 1920, 30));
    }

    #[test]
    fn test_anchored_corner() {
        let mut role = LayerRole::new(None, Layer::Overlay, String::new());
        role.set_anchor((Anchor::BOTTOM | Anchor::RIGHT).bits()).unwrap();
        role.set_size(200, 100);
        role.set_margin(0, 10, 10, 0);
        role.handle_commit(&committed(false));
        let output = Rect::new(0, 0, 1000, 800);
        let available = Rect::new(0, 30, 1000, 770);
        assert_eq!(role.arrange(output, available), Rect::new(790, 690, 200, 100));
    }
}
