//! Drag-and-drop icon role and the drop timeout.

use std::time::{Duration, Instant};

use crate::core::surface::SurfaceId;
use crate::util::geometry::Point;

use super::{CommittedView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `wl_data_device.error.role`
pub const DATA_DEVICE_ROLE: u32 = 0;

#[derive(Debug, Clone, Default)]
pub struct DndIconRole {
    pending_offset: Point,
    /// Icon position relative to the pointer
    pub position: Point,
    pub visible: bool,
}

impl DndIconRole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoleHandler for DndIconRole {
    fn kind(&self) -> RoleKind {
        RoleKind::DndIcon
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        self.position += std::mem::take(&mut self.pending_offset);
        self.visible = committed.has_buffer;
        RoleCommitOutcome::mapped(self.visible)
    }

    fn handle_offset(&mut self, offset: Point) {
        self.pending_offset += offset;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragState {
    Dragging,
    /// Dropped, waiting for the destination to finish
    Dropped,
    Finished,
    Cancelled,
}

/// One drag operation. The wait after the drop is bounded; once it runs
/// out the drag is cancelled.
#[derive(Debug, Clone)]
pub struct DragSession {
    pub icon: Option<SurfaceId>,
    pub state: DragState,
    timeout: Duration,
    dropped_at: Option<Instant>,
}

impl DragSession {
    pub fn new(icon: Option<SurfaceId>, timeout: Duration) -> Self {
        Self {
            icon,
            state: DragState::Dragging,
            timeout,
            dropped_at: None,
        }
    }

    pub fn drop_at(&mut self, now: Instant) {
        if self.state == DragState::Dragging {
            self.state = DragState::Dropped;
            self.dropped_at = Some(now);
        }
    }

    pub fn finish(&mut self) {
        if self.state == DragState::Dropped {
            self.state = DragState::Finished;
        }
    }

    pub fn cancel(&mut self) {
        if matches!(self.state, DragState::Dragging | DragState::Dropped) {
            self.state = DragState::Cancelled;
        }
    }

    /// Cancel the drag if the drop wait ran out. Returns true when it did.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match (self.state, self.dropped_at) {
            (DragState::Dropped, Some(at)) if now.duration_since(at) >= self.timeout => {
                tracing::warn!("Drop not finished within {:?}, cancelling drag", self.timeout);
                self.state = DragState::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, DragState::Finished | DragState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::geometry::{Rect, Size};

    #[test]
    fn test_icon_offsets_accumulate() {
        let mut icon = DndIconRole::new();
        icon.handle_offset(Point::new(3, 4));
        icon.handle_offset(Point::new(1, 1));
        let outcome = icon.handle_commit(&CommittedView {
            has_buffer: true,
            size: Size::new(16, 16),
            offset: Point::new(4, 5),
            bounds: Rect::new(0, 0, 16, 16),
            parent_mapped: false,
        });
        assert!(outcome.mapped);
        assert_eq!(icon.position, Point::new(4, 5));
    }

    #[test]
    fn test_drop_timeout() {
        let start = Instant::now();
        let mut drag = DragSession::new(None, Duration::from_millis(100));
        drag.drop_at(start);
        assert!(!drag.check_timeout(start + Duration::from_millis(50)));
        assert!(drag.check_timeout(start + Duration::from_millis(100)));
        assert_eq!(drag.state, DragState::Cancelled);
        // Late finish has no effect
        drag.finish();
        assert_eq!(drag.state, DragState::Cancelled);
    }

    #[test]
    fn test_finished_drop_does_not_time_out() {
        let start = Instant::now();
        let mut drag = DragSession::new(Some(3), Duration::from_millis(100));
        drag.drop_at(start);
        drag.finish();
        assert!(!drag.check_timeout(start + Duration::from_secs(1)));
        assert!(drag.is_done());
    }
}
