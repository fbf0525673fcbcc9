//! `wl_subsurface` role.

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::surface::SurfaceId;
use crate::util::geometry::Point;

use super::{CommitContext, CommitDecision, CommitOrigin, CommittedView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `wl_subsurface.error.bad_surface`
pub const BAD_SURFACE: u32 = 0;
/// `wl_subcompositor.error.bad_surface`
pub const SUBCOMPOSITOR_BAD_SURFACE: u32 = 0;
/// `wl_subcompositor.error.bad_parent`
pub const SUBCOMPOSITOR_BAD_PARENT: u32 = 1;

#[derive(Debug, Clone)]
pub struct SubsurfaceRole {
    pub parent: SurfaceId,
    pub sync: bool,
    /// Position relative to the parent, applied with the parent's state
    pub pending_position: Point,
    pub position: Point,
    alive: bool,
}

impl SubsurfaceRole {
    pub fn new(parent: SurfaceId) -> Self {
        Self {
            parent,
            sync: true,
            pending_position: Point::default(),
            position: Point::default(),
            alive: true,
        }
    }

    pub fn set_position(&mut self, position: Point) {
        self.pending_position = position;
    }

    /// Take the pending position; true when it moved.
    pub fn apply_position(&mut self) -> bool {
        let moved = self.position != self.pending_position;
        self.position = self.pending_position;
        moved
    }

    pub fn destroy(&mut self) {
        self.alive = false;
    }
}

impl RoleHandler for SubsurfaceRole {
    fn kind(&self) -> RoleKind {
        RoleKind::Subsurface
    }

    fn accept_commit(&self, ctx: &CommitContext) -> CommitDecision {
        if self.alive && ctx.origin == CommitOrigin::Client && ctx.effectively_sync {
            CommitDecision::Defer
        } else {
            CommitDecision::Apply
        }
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        RoleCommitOutcome::mapped(self.alive && committed.has_buffer && committed.parent_mapped)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

/// Move `child` above or below `sibling` in a stacking list (bottom to
/// top, the parent itself included).
pub fn restack(
    list: &mut Vec<SurfaceId>,
    child: SurfaceId,
    sibling: SurfaceId,
    above: bool,
) -> Result<(), ProtocolError> {
    if child == sibling || !list.contains(&sibling) {
        return Err(ProtocolError::new(
            ErrorTarget::Subsurface,
            BAD_SURFACE,
            format!("wl_surface@{} is not a sibling or the parent", sibling),
        ));
    }
    list.retain(|s| *s != child);
    let index = list.iter().position(|s| *s == sibling).unwrap_or(list.len());
    let index = if above { index + 1 } else { index };
    list.insert(index.min(list.len()), child);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defer_only_sync_client_commits() {
        let role = SubsurfaceRole::new(1);
        let client_sync = CommitContext {
            origin: CommitOrigin::Client,
            effectively_sync: true,
        };
        assert_eq!(role.accept_commit(&client_sync), CommitDecision::Defer);
        let parent = CommitContext {
            origin: CommitOrigin::Parent,
            effectively_sync: true,
        };
        assert_eq!(role.accept_commit(&parent), CommitDecision::Apply);
        let desync = CommitContext {
            origin: CommitOrigin::Client,
            effectively_sync: false,
        };
        assert_eq!(role.accept_commit(&desync), CommitDecision::Apply);
    }

    #[test]
    fn test_restack() {
        // Parent 1 with children 2 and 3 on top
        let mut list = vec![1, 2, 3];
        restack(&mut list, 3, 1, false).unwrap();
        assert_eq!(list, vec![3, 1, 2]);
        restack(&mut list, 3, 2, true).unwrap();
        assert_eq!(list, vec![1, 2, 3]);
        let err = restack(&mut list, 3, 9, true).unwrap_err();
        assert_eq!(err.target, ErrorTarget::Subsurface);
        assert_eq!(list, vec![1, 2, 3]);
    }

    #[test]
    fn test_position_applied_with_parent() {
        let mut role = SubsurfaceRole::new(1);
        role.set_position(Point::new(4, 5));
        assert_eq!(role.position, Point::default());
        assert!(role.apply_position());
        assert!(!role.apply_position());
        assert_eq!(role.position, Point::new(4, 5));
    }
}
