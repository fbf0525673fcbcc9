use wayland_server::backend::ClientId;
use wayland_server::protocol::wl_surface::WlSurface;

use crate::core::output::OutputId;
use crate::core::role::{Role, RoleKind};
use crate::util::geometry::{Point, Rect};

use super::state::{CurrentState, SurfaceState};
use super::SurfaceId;

/// Represents a Wayland Surface.
pub struct Surface {
    pub id: SurfaceId,
    pub client_id: Option<ClientId>,
    pub role: Role,
    /// Role kind given to the surface, kept after the role object dies
    pub assigned_role: RoleKind,

    /// The Wayland resource handle
    pub resource: Option<WlSurface>,

    /// The state currently visible to the compositor
    pub current: CurrentState,
    /// The state being built by client requests, to be applied on commit
    pub pending: SurfaceState,
    /// The state committed but waiting for parent commit (for synchronized subsurfaces)
    pub cached: Option<SurfaceState>,

    /// Committed stacking order of this surface and its subsurfaces,
    /// bottom to top. Contains `id` itself.
    pub children: Vec<SurfaceId>,
    /// Stacking order edited by subsurface requests, applied with the state
    pub pending_children: Vec<SurfaceId>,

    pub mapped: bool,
    /// Outputs the surface is currently shown on
    pub outputs: Vec<OutputId>,
    /// Role position: global for root surfaces, parent-relative for subsurfaces
    pub position: Point,
    /// Sum of the committed `attach`/`offset` deltas
    pub commit_offset: Point,
    /// Global rect as of the last geometry update
    pub global_rect: Rect,
    /// Rect last shown on screen, None while unmapped
    pub visible_rect: Option<Rect>,
    /// Preferred scale sent through `wp_fractional_scale_v1`, in 120ths
    pub preferred_scale: u32,
    /// A `wp_viewport` object exists for this surface
    pub has_viewport: bool,
    /// `wp_content_type_v1` object exists for this surface
    pub has_content_type: bool,
    /// `wp_fractional_scale_v1` object exists for this surface
    pub has_fractional_scale: bool,
}

impl Surface {
    pub fn new(id: SurfaceId, client_id: Option<ClientId>, resource: Option<WlSurface>) -> Self {
        Self {
            id,
            client_id,
            role: Role::None,
            assigned_role: RoleKind::None,
            resource,
            current: CurrentState::default(),
            pending: SurfaceState::new(),
            cached: None,
            children: vec![id],
            pending_children: vec![id],
            mapped: false,
            outputs: Vec::new(),
            position: Point::default(),
            commit_offset: Point::default(),
            global_rect: Rect::default(),
            visible_rect: None,
            preferred_scale: 120,
            has_viewport: false,
            has_content_type: false,
            has_fractional_scale: false,
        }
    }

    pub fn role_kind(&self) -> RoleKind {
        self.role.kind()
    }

    /// Commit the pending state to cached (for synchronized subsurfaces)
    pub fn commit_to_cache(&mut self) {
        let snapshot = self.pending.take_commit();
        self.cached = Some(match self.cached.take() {
            Some(cached) => cached.merge(snapshot),
            None => snapshot,
        });
        tracing::debug!("Surface {} committed to cached (sync mode)", self.id);
    }

    /// Take the state to apply for a commit of `self`, merged onto any
    /// cached state. The pending block keeps its persistent values.
    pub fn take_commit_state(&mut self) -> SurfaceState {
        let snapshot = self.pending.take_commit();
        match self.cached.take() {
            Some(cached) => cached.merge(snapshot),
            None => snapshot,
        }
    }

    /// Subsurface ids in committed stacking order (self excluded)
    pub fn child_ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.children.iter().copied().filter(move |c| *c != self.id)
    }

    /// Drop a child from both stacking lists
    pub fn remove_child(&mut self, child: SurfaceId) {
        self.children.retain(|c| *c != child);
        self.pending_children.retain(|c| *c != child);
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("role", &self.role.kind())
            .field("mapped", &self.mapped)
            .field("size", &self.current.size())
            .field("position", &self.position)
            .finish()
    }
}
