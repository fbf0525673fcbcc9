//! `xdg_popup` role.

use crate::core::errors::ProtocolError;
use crate::core::surface::SurfaceId;
use crate::util::geometry::Rect;
use crate::util::logging::ROLE;
use crate::wlog;

use super::positioner::Positioner;
use super::xdg::XdgSurfaceState;
use super::{CommittedView, PendingView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `xdg_popup.error.invalid_grab`
pub const INVALID_GRAB: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupConfigure {
    /// Position and size relative to the parent's window geometry
    pub geometry: Rect,
    /// Set when the configure answers `reposition`
    pub reposition_token: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PopupRole {
    pub xdg: XdgSurfaceState<PopupConfigure>,
    pub parent: Option<SurfaceId>,
    pub positioner: Positioner,
    /// Geometry acknowledged by the client, applied on the next commit
    pending_geometry: Option<Rect>,
    /// Committed geometry relative to the parent's window geometry
    pub geometry: Rect,
    pub grabbed: bool,
    /// `popup_done` was sent
    pub dismissed: bool,
    alive: bool,
}

impl PopupRole {
    pub fn new(parent: Option<SurfaceId>, positioner: Positioner) -> Self {
        Self {
            xdg: XdgSurfaceState::new(),
            parent,
            positioner,
            pending_geometry: None,
            geometry: Rect::default(),
            grabbed: false,
            dismissed: false,
            alive: true,
        }
    }

    /// Placement for the next configure, constrained to `bounds` (relative
    /// to the parent's window geometry).
    pub fn configure_for(&self, bounds: Rect, reposition_token: Option<u32>) -> PopupConfigure {
        PopupConfigure {
            geometry: self.positioner.constrained_geometry(bounds),
            reposition_token,
        }
    }

    /// Replace the positioner. The caller sends `repositioned` and the
    /// configure returned; the popup stays mapped.
    pub fn reposition(&mut self, positioner: Positioner, token: u32, bounds: Rect) -> PopupConfigure {
        self.positioner = positioner;
        wlog!(ROLE, "popup repositioned (token {})", token);
        self.configure_for(bounds, Some(token))
    }

    pub fn ack_configure(&mut self, serial: u32) -> Result<PopupConfigure, ProtocolError> {
        let configure = self.xdg.ack_configure(serial)?;
        self.pending_geometry = Some(configure.geometry);
        Ok(configure)
    }

    pub fn dismiss(&mut self) -> bool {
        if self.dismissed || !self.alive {
            return false;
        }
        self.dismissed = true;
        true
    }

    pub fn window_geometry(&self) -> Rect {
        self.xdg.window_geometry()
    }

    pub fn is_mapped(&self) -> bool {
        self.xdg.is_mapped()
    }

    pub fn destroy(&mut self) {
        self.alive = false;
        self.xdg.reset();
    }
}

impl RoleHandler for PopupRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Popup
    }

    fn validate_commit(&self, pending: &PendingView) -> Result<(), ProtocolError> {
        self.xdg.validate(pending)
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        if !self.alive {
            return RoleCommitOutcome::default();
        }
        if let Some(geometry) = self.pending_geometry.take() {
            self.geometry = geometry;
        }
        let (mapped, needs_configure) = self.xdg.commit(committed);
        RoleCommitOutcome {
            mapped: mapped && !self.dismissed,
            needs_configure,
            relayout: false,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::{Point, Size};

    fn positioner() -> Positioner {
        let mut p = Positioner::new();
        p.set_size(50, 40).unwrap();
        p.set_anchor_rect(Rect::new(0, 0, 10, 10)).unwrap();
        p.set_anchor(8).unwrap();
        p.set_gravity(8).unwrap();
        p
    }

    fn committed(has_buffer: bool) -> CommittedView {
        CommittedView {
            has_buffer,
            size: Size::new(50, 40),
            offset: Point::default(),
            bounds: Rect::new(0, 0, 50, 40),
            parent_mapped: true,
        }
    }

    #[test]
    fn test_geometry_applied_after_ack_and_commit() {
        let mut popup = PopupRole::new(Some(1), positioner());
        popup.handle_commit(&committed(false));
        let configure = popup.configure_for(Rect::new(-100, -100, 1000, 1000), None);
        assert_eq!(configure.geometry, Rect::new(10, 10, 50, 40));
        popup.xdg.send_configure(7, configure);
        popup.ack_configure(7).unwrap();
        assert_eq!(popup.geometry, Rect::default());
        let outcome = popup.handle_commit(&committed(true));
        assert!(outcome.mapped);
        assert_eq!(popup.geometry, Rect::new(10, 10, 50, 40));
    }

    #[test]
    fn test_unknown_serial_leaves_geometry() {
        let mut popup = PopupRole::new(Some(1), positioner());
        popup.xdg.send_configure(7, popup.configure_for(Rect::new(0, 0, 100, 100), None));
        assert!(popup.ack_configure(99).is_err());
        popup.handle_commit(&committed(false));
        assert_eq!(popup.geometry, Rect::default());
    }

    #[test]
    fn test_reposition_keeps_mapping() {
        let mut popup = PopupRole::new(Some(1), positioner());
        popup.xdg.send_configure(1, popup.configure_for(Rect::new(0, 0, 500, 500), None));
        popup.ack_configure(1).unwrap();
        assert!(popup.handle_commit(&committed(true)).mapped);

        let mut moved = positioner();
        moved.offset = Point::new(5, 0);
        let configure = popup.reposition(moved, 42, Rect::new(0, 0, 500, 500));
        assert_eq!(configure.reposition_token, Some(42));
        assert_eq!(configure.geometry.x, 15);
        assert!(popup.is_mapped());
    }

    #[test]
    fn test_dismiss_once() {
        let mut popup = PopupRole::new(None, positioner());
        assert!(popup.dismiss());
        assert!(!popup.dismiss());
    }
}
