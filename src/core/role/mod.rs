//! Surface roles.
//!
//! A surface gets at most one role kind for its lifetime. Each role keeps
//! its own pending/current pair and plugs into the commit coordinator
//! through `RoleHandler`.

pub mod configure;
pub mod cursor;
pub mod dnd_icon;
pub mod layer;
pub mod popup;
pub mod positioner;
pub mod session_lock;
pub mod subsurface;
pub mod toplevel;
pub mod xdg;

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::surface::SurfaceId;
use crate::util::geometry::{Point, Rect, Size};

pub use configure::ConfigureQueue;
pub use cursor::CursorRole;
pub use dnd_icon::{DndIconRole, DragSession};
pub use layer::LayerRole;
pub use popup::PopupRole;
pub use positioner::Positioner;
pub use session_lock::{LockSurfaceRole, SessionLockManager};
pub use subsurface::SubsurfaceRole;
pub use toplevel::ToplevelRole;
pub use xdg::{XdgLifecycle, XdgSurfaceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoleKind {
    #[default]
    None,
    Toplevel,
    Popup,
    Subsurface,
    Cursor,
    Layer,
    SessionLock,
    DndIcon,
}

impl RoleKind {
    pub fn name(self) -> &'static str {
        match self {
            RoleKind::None => "none",
            RoleKind::Toplevel => "xdg_toplevel",
            RoleKind::Popup => "xdg_popup",
            RoleKind::Subsurface => "wl_subsurface",
            RoleKind::Cursor => "cursor",
            RoleKind::Layer => "zwlr_layer_surface_v1",
            RoleKind::SessionLock => "ext_session_lock_surface_v1",
            RoleKind::DndIcon => "dnd_icon",
        }
    }

    /// Roles without a role object; re-assigning them replaces the old one.
    pub fn is_soft(self) -> bool {
        matches!(self, RoleKind::Cursor | RoleKind::DndIcon)
    }
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a commit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOrigin {
    /// `wl_surface.commit` from the client
    Client,
    /// Cached state applied by a parent's commit (or a switch to desync)
    Parent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitContext {
    pub origin: CommitOrigin,
    /// The surface or one of its ancestors is a synchronized subsurface
    pub effectively_sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Apply,
    /// Keep the state in the cache until the parent applies it
    Defer,
}

/// The state a commit is about to apply, for validation.
#[derive(Debug, Clone, Copy)]
pub struct PendingView {
    /// Buffer size once applied, None without a buffer
    pub buffer_size: Option<Size>,
    /// Surface size once applied
    pub size: Size,
    /// The commit attaches a new buffer
    pub attaches: bool,
}

impl PendingView {
    pub fn has_buffer(&self) -> bool {
        self.buffer_size.is_some()
    }
}

/// The state a commit just applied.
#[derive(Debug, Clone, Copy)]
pub struct CommittedView {
    pub has_buffer: bool,
    pub size: Size,
    pub offset: Point,
    /// Surface rect united with its synchronized mapped subsurfaces,
    /// surface-local
    pub bounds: Rect,
    /// Whether the parent is mapped (subsurfaces only)
    pub parent_mapped: bool,
}

/// What the coordinator must do after a role commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleCommitOutcome {
    pub mapped: bool,
    /// The role wants its initial configure sent
    pub needs_configure: bool,
    /// Layer arrangement inputs changed
    pub relayout: bool,
}

impl RoleCommitOutcome {
    pub fn mapped(mapped: bool) -> Self {
        Self {
            mapped,
            ..Default::default()
        }
    }
}

pub trait RoleHandler {
    fn kind(&self) -> RoleKind;

    fn accept_commit(&self, _ctx: &CommitContext) -> CommitDecision {
        CommitDecision::Apply
    }

    /// Runs before anything is promoted; an error leaves `current` alone.
    fn validate_commit(&self, _pending: &PendingView) -> Result<(), ProtocolError> {
        Ok(())
    }

    /// Promote the role's pending state.
    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome;

    /// `wl_surface.attach` was requested (`None` for a null buffer)
    fn handle_buffer_attach(&mut self, _size: Option<Size>) {}

    /// `attach(x, y)` or `wl_surface.offset` was requested
    fn handle_offset(&mut self, _offset: Point) {}

    /// False once the role object was destroyed
    fn is_alive(&self) -> bool {
        true
    }
}

/// Role of a surface, with its state.
#[derive(Debug, Default)]
pub enum Role {
    #[default]
    None,
    Toplevel(ToplevelRole),
    Popup(PopupRole),
    Subsurface(SubsurfaceRole),
    Cursor(CursorRole),
    Layer(LayerRole),
    SessionLock(LockSurfaceRole),
    DndIcon(DndIconRole),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        self.handler().map(|h| h.kind()).unwrap_or(RoleKind::None)
    }

    pub fn handler(&self) -> Option<&dyn RoleHandler> {
        Some(match self {
            Role::None => return None,
            Role::Toplevel(r) => r,
            Role::Popup(r) => r,
            Role::Subsurface(r) => r,
            Role::Cursor(r) => r,
            Role::Layer(r) => r,
            Role::SessionLock(r) => r,
            Role::DndIcon(r) => r,
        })
    }

    pub fn handler_mut(&mut self) -> Option<&mut dyn RoleHandler> {
        Some(match self {
            Role::None => return None,
            Role::Toplevel(r) => r,
            Role::Popup(r) => r,
            Role::Subsurface(r) => r,
            Role::Cursor(r) => r,
            Role::Layer(r) => r,
            Role::SessionLock(r) => r,
            Role::DndIcon(r) => r,
        })
    }

    pub fn as_subsurface(&self) -> Option<&SubsurfaceRole> {
        match self {
            Role::Subsurface(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_subsurface_mut(&mut self) -> Option<&mut SubsurfaceRole> {
        match self {
            Role::Subsurface(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_toplevel(&self) -> Option<&ToplevelRole> {
        match self {
            Role::Toplevel(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_toplevel_mut(&mut self) -> Option<&mut ToplevelRole> {
        match self {
            Role::Toplevel(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_popup(&self) -> Option<&PopupRole> {
        match self {
            Role::Popup(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_popup_mut(&mut self) -> Option<&mut PopupRole> {
        match self {
            Role::Popup(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_layer(&self) -> Option<&LayerRole> {
        match self {
            Role::Layer(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_layer_mut(&mut self) -> Option<&mut LayerRole> {
        match self {
            Role::Layer(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_lock_mut(&mut self) -> Option<&mut LockSurfaceRole> {
        match self {
            Role::SessionLock(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_cursor_mut(&mut self) -> Option<&mut CursorRole> {
        match self {
            Role::Cursor(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_dnd_icon_mut(&mut self) -> Option<&mut DndIconRole> {
        match self {
            Role::DndIcon(r) => Some(r),
            _ => None,
        }
    }

    /// Parent surface for roles that have one
    pub fn parent(&self) -> Option<SurfaceId> {
        match self {
            Role::Subsurface(r) => Some(r.parent),
            Role::Popup(r) => r.parent,
            Role::Toplevel(r) => r.parent,
            _ => None,
        }
    }
}

/// Check whether `surface_role` (the kind ever given to the surface) and
/// the active `role` allow assigning `kind`.
///
/// The error carries `error` (interface + code) of the requesting object.
pub fn check_assignable(
    surface: SurfaceId,
    assigned: RoleKind,
    role: &Role,
    kind: RoleKind,
    error: (ErrorTarget, u32),
) -> Result<(), ProtocolError> {
    let conflict = |msg: String| Err(ProtocolError::new(error.0, error.1, msg));
    if assigned == RoleKind::None {
        return Ok(());
    }
    if assigned != kind {
        return conflict(format!(
            "wl_surface@{} already has role {}, cannot become {}",
            surface, assigned, kind
        ));
    }
    let active = role.handler().map(|h| h.is_alive()).unwrap_or(false);
    if active && !kind.is_soft() {
        return conflict(format!("wl_surface@{} already has an active {} object", surface, kind));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERR: (ErrorTarget, u32) = (ErrorTarget::XdgWmBase, 0);

    #[test]
    fn test_first_role_is_free() {
        assert!(check_assignable(1, RoleKind::None, &Role::None, RoleKind::Toplevel, ERR).is_ok());
    }

    #[test]
    fn test_other_kind_conflicts() {
        let err = check_assignable(1, RoleKind::Layer, &Role::None, RoleKind::Toplevel, ERR).unwrap_err();
        assert_eq!(err.target, ErrorTarget::XdgWmBase);
        assert_eq!(err.code, 0);
    }

    #[test]
    fn test_same_kind_after_destroy() {
        let mut role = ToplevelRole::new();
        role.destroy();
        let role = Role::Toplevel(role);
        assert!(check_assignable(1, RoleKind::Toplevel, &role, RoleKind::Toplevel, ERR).is_ok());
        let live = Role::Toplevel(ToplevelRole::new());
        assert!(check_assignable(1, RoleKind::Toplevel, &live, RoleKind::Toplevel, ERR).is_err());
    }

    #[test]
    fn test_soft_roles_reassign() {
        let role = Role::Cursor(CursorRole::new(Point::default()));
        assert!(check_assignable(1, RoleKind::Cursor, &role, RoleKind::Cursor, ERR).is_ok());
        assert!(check_assignable(1, RoleKind::Cursor, &role, RoleKind::DndIcon, ERR).is_err());
    }
}
