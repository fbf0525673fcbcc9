//! Cursor role (`wl_pointer.set_cursor`).

use crate::util::geometry::Point;

use super::{CommittedView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `wl_pointer.error.role`
pub const POINTER_ROLE: u32 = 0;

#[derive(Debug, Clone)]
pub struct CursorRole {
    pending_hotspot: Point,
    pub hotspot: Point,
    pub visible: bool,
}

impl CursorRole {
    pub fn new(hotspot: Point) -> Self {
        Self {
            pending_hotspot: hotspot,
            hotspot,
            visible: false,
        }
    }

    /// New `set_cursor` request: the hotspot applies immediately.
    pub fn set_hotspot(&mut self, hotspot: Point) {
        self.pending_hotspot = hotspot;
        self.hotspot = hotspot;
    }
}

impl RoleHandler for CursorRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Cursor
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        self.hotspot = self.pending_hotspot;
        // A null buffer hides the cursor
        self.visible = committed.has_buffer;
        RoleCommitOutcome::mapped(self.visible)
    }

    fn handle_offset(&mut self, offset: Point) {
        self.pending_hotspot = Point::new(self.pending_hotspot.x - offset.x, self.pending_hotspot.y - offset.y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::{Rect, Size};

    fn committed(has_buffer: bool) -> CommittedView {
        CommittedView {
            has_buffer,
            size: Size::new(24, 24),
            offset: Point::default(),
            bounds: Rect::new(0, 0, 24, 24),
            parent_mapped: false,
        }
    }

    #[test]
    fn test_offset_moves_hotspot_on_commit() {
        let mut cursor = CursorRole::new(Point::new(4, 4));
        cursor.handle_offset(Point::new(2, -1));
        assert_eq!(cursor.hotspot, Point::new(4, 4));
        assert!(cursor.handle_commit(&committed(true)).mapped);
        assert_eq!(cursor.hotspot, Point::new(2, 5));
    }

    #[test]
    fn test_null_buffer_hides() {
        let mut cursor = CursorRole::new(Point::default());
        cursor.handle_commit(&committed(true));
        let outcome = cursor.handle_commit(&committed(false));
        assert!(!outcome.mapped);
        assert!(!cursor.visible);
    }
}
