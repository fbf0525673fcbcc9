//! Role assignment, configures and the role side effects of commits:
//! xdg toplevels and popups, layer surfaces, the session lock, the cursor
//! and drag-and-drop.

use std::time::Instant;

use wayland_protocols::ext::session_lock::v1::server::ext_session_lock_surface_v1::ExtSessionLockSurfaceV1;
use wayland_protocols::ext::session_lock::v1::server::ext_session_lock_v1::ExtSessionLockV1;
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_protocols::xdg::shell::server::xdg_wm_base;
use wayland_protocols_wlr::layer_shell::v1::server::zwlr_layer_surface_v1::ZwlrLayerSurfaceV1;
use wayland_server::Resource;

use crate::core::compositor::CompositorEvent;
use crate::core::errors::{CoreError, ErrorTarget, ProtocolError, Result};
use crate::core::output::OutputId;
use crate::core::role::cursor::POINTER_ROLE;
use crate::core::role::dnd_icon::DATA_DEVICE_ROLE;
use crate::core::role::layer::{shell_error, Layer};
use crate::core::role::popup::{PopupConfigure, INVALID_GRAB};
use crate::core::role::session_lock::lock_error;
use crate::core::role::toplevel::{self, ToplevelConfigure, ToplevelStates};
use crate::core::role::xdg;
use crate::core::role::{
    check_assignable, CursorRole, DndIconRole, DragSession, LayerRole, LockSurfaceRole, PopupRole, Positioner, Role,
    RoleHandler, RoleKind, ToplevelRole,
};
use crate::core::surface::{BufferAttach, SurfaceId};
use crate::util::geometry::{Point, Rect, Size};
use crate::util::logging::ROLE;
use crate::util::region::Region;
use crate::wlog;

use super::CompositorState;

fn wm_base_error(code: xdg_wm_base::Error, msg: impl Into<String>) -> CoreError {
    ProtocolError::new(ErrorTarget::XdgWmBase, code, msg).into()
}

impl CompositorState {
    /// Run `f` on the role of `id` picked by `select`; a surface without
    /// that role is a state error.
    fn with_role<T, R>(
        &self,
        id: SurfaceId,
        select: impl FnOnce(&mut Role) -> Option<&mut T>,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R> {
        let arc = self.get_surface(id)?;
        let mut surface = arc.write();
        let kind = surface.role_kind();
        match select(&mut surface.role) {
            Some(role) => Ok(f(role)),
            None => Err(CoreError::state_error(format!(
                "surface {} has role {}, not the one requested",
                id, kind
            ))),
        }
    }

    pub fn with_toplevel<R>(&self, id: SurfaceId, f: impl FnOnce(&mut ToplevelRole) -> R) -> Result<R> {
        self.with_role(id, Role::as_toplevel_mut, f)
    }

    pub fn with_popup<R>(&self, id: SurfaceId, f: impl FnOnce(&mut PopupRole) -> R) -> Result<R> {
        self.with_role(id, Role::as_popup_mut, f)
    }

    pub fn with_layer<R>(&self, id: SurfaceId, f: impl FnOnce(&mut LayerRole) -> R) -> Result<R> {
        self.with_role(id, Role::as_layer_mut, f)
    }

    /// Install `role` after checking the surface may take `kind`.
    fn assign_role(&mut self, id: SurfaceId, role: Role, error: (ErrorTarget, u32)) -> Result<()> {
        let kind = role.kind();
        {
            let arc = self.get_surface(id)?;
            let mut surface = arc.write();
            check_assignable(id, surface.assigned_role, &surface.role, kind, error)?;
            surface.role = role;
            surface.assigned_role = kind;
        }
        wlog!(ROLE, "Surface {} assigned role {}", id, kind);
        self.emit(CompositorEvent::RoleAssigned { surface_id: id, role: kind });
        Ok(())
    }

    /// Unmap `id` after its role object went away and report the damage.
    fn unmap_role(&mut self, id: SurfaceId) {
        self.set_mapped(id, false);
        self.update_subtree_mapping(id);
        let damage = self.update_tree_geometry(id);
        self.damage_global(&damage);
        self.scene_dirty = true;
    }

    fn live_child_popups(&self, parent: SurfaceId) -> bool {
        self.popups.iter().any(|p| {
            self.surfaces.get(p).is_some_and(|s| {
                let s = s.read();
                s.role.as_popup().is_some_and(|r| r.is_alive() && r.parent == Some(parent))
            })
        })
    }

    /// Initial configure for xdg roles, requested by their first commit.
    pub(super) fn send_initial_configure(&mut self, id: SurfaceId) {
        match self.surfaces.get(&id).map(|s| s.read().role_kind()) {
            Some(RoleKind::Toplevel) => {
                let bounds = self.outputs.values().next().map(|o| o.available_area().size());
                self.send_toplevel_configure(
                    id,
                    ToplevelConfigure {
                        size: Size::default(),
                        states: ToplevelStates::empty(),
                        bounds,
                    },
                );
            }
            Some(RoleKind::Popup) => {
                let Some((parent, position)) = self.surfaces.get(&id).and_then(|s| {
                    let s = s.read();
                    s.role.as_popup().map(|p| (p.parent, s.position))
                }) else {
                    return;
                };
                let bounds = self.popup_bounds(parent, position);
                if let Ok(configure) = self.with_popup(id, |p| p.configure_for(bounds, None)) {
                    self.send_popup_configure(id, configure);
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // xdg_surface
    // =========================================================================

    /// `xdg_wm_base.get_xdg_surface`
    pub fn get_xdg_surface(&mut self, id: SurfaceId, resource: Option<XdgSurface>) -> Result<()> {
        let arc = self.get_surface(id)?;
        {
            let surface = arc.read();
            let role = surface.role_kind();
            if surface.role.handler().is_some_and(|r| r.is_alive())
                && !matches!(role, RoleKind::Toplevel | RoleKind::Popup)
            {
                return Err(wm_base_error(
                    xdg_wm_base::Error::Role,
                    format!("wl_surface@{} already has role {}", id, role),
                ));
            }
            if surface.current.has_buffer() || matches!(surface.pending.buffer, BufferAttach::Attach(_)) {
                return Err(wm_base_error(
                    xdg_wm_base::Error::InvalidSurfaceState,
                    format!("wl_surface@{} already has a buffer", id),
                ));
            }
        }
        if self.resources.get(&id).is_some_and(|r| r.xdg_surface.as_ref().is_some_and(|x| x.is_alive())) {
            return Err(ProtocolError::new(
                ErrorTarget::XdgSurface,
                xdg::error::ALREADY_CONSTRUCTED,
                format!("wl_surface@{} already has an xdg_surface", id),
            )
            .into());
        }
        if let Some(resource) = resource {
            self.resources_mut(id).xdg_surface = Some(resource);
        }
        Ok(())
    }

    /// `xdg_surface.destroy`: the role object has to go first.
    pub fn xdg_surface_destroyed(&mut self, id: SurfaceId) -> Result<()> {
        let live_role = self.surfaces.get(&id).is_some_and(|s| {
            let s = s.read();
            matches!(s.role_kind(), RoleKind::Toplevel | RoleKind::Popup)
                && s.role.handler().is_some_and(|r| r.is_alive())
        });
        if live_role {
            return Err(ProtocolError::new(
                ErrorTarget::XdgSurface,
                xdg::error::DEFUNCT_ROLE_OBJECT,
                format!("xdg_surface of wl_surface@{} destroyed before its role object", id),
            )
            .into());
        }
        if let Some(res) = self.resources.get_mut(&id) {
            res.xdg_surface = None;
        }
        Ok(())
    }

    pub fn xdg_surface_set_window_geometry(&mut self, id: SurfaceId, rect: Rect) -> Result<()> {
        let arc = self.get_surface(id)?;
        let mut surface = arc.write();
        match &mut surface.role {
            Role::Toplevel(t) => t.xdg.set_window_geometry(rect)?,
            Role::Popup(p) => p.xdg.set_window_geometry(rect)?,
            _ => {
                return Err(ProtocolError::new(
                    ErrorTarget::XdgSurface,
                    xdg::error::NOT_CONSTRUCTED,
                    "set_window_geometry before a role was assigned",
                )
                .into())
            }
        }
        Ok(())
    }

    /// `xdg_surface.ack_configure`
    pub fn xdg_surface_ack_configure(&mut self, id: SurfaceId, serial: u32) -> Result<()> {
        let arc = self.get_surface(id)?;
        let mut surface = arc.write();
        match &mut surface.role {
            Role::Toplevel(t) => t.ack_configure(serial)?,
            Role::Popup(p) => {
                p.ack_configure(serial)?;
            }
            _ => {
                return Err(ProtocolError::new(
                    ErrorTarget::XdgSurface,
                    xdg::error::NOT_CONSTRUCTED,
                    "ack_configure before a role was assigned",
                )
                .into())
            }
        }
        wlog!(ROLE, "Surface {} acked configure {}", id, serial);
        Ok(())
    }

    // =========================================================================
    // xdg_toplevel
    // =========================================================================

    /// `xdg_surface.get_toplevel`. New toplevels are placed at the top left
    /// of the first output's available area.
    pub fn get_toplevel(&mut self, id: SurfaceId, resource: Option<XdgToplevel>) -> Result<()> {
        self.assign_role(
            id,
            Role::Toplevel(ToplevelRole::new()),
            (ErrorTarget::XdgWmBase, xdg_wm_base::Error::Role.into()),
        )?;
        let origin = self
            .outputs
            .values()
            .next()
            .map(|o| o.available_area().loc())
            .unwrap_or_default();
        if let Some(surface) = self.surfaces.get(&id) {
            surface.write().position = origin;
        }
        self.toplevels.retain(|t| *t != id);
        self.toplevels.push(id);
        if let Some(resource) = resource {
            self.resources_mut(id).toplevel = Some(resource);
        }
        Ok(())
    }

    pub fn toplevel_set_title(&mut self, id: SurfaceId, title: String) -> Result<()> {
        self.with_toplevel(id, |t| t.title = title.clone())?;
        self.emit(CompositorEvent::TitleChanged { surface_id: id, title });
        Ok(())
    }

    pub fn toplevel_set_app_id(&mut self, id: SurfaceId, app_id: String) -> Result<()> {
        self.with_toplevel(id, |t| t.app_id = app_id.clone())?;
        self.emit(CompositorEvent::AppIdChanged { surface_id: id, app_id });
        Ok(())
    }

    /// `xdg_toplevel.set_parent`. A toplevel cannot end up its own ancestor.
    pub fn toplevel_set_parent(&mut self, id: SurfaceId, parent: Option<SurfaceId>) -> Result<()> {
        let mut ancestor = parent;
        while let Some(current) = ancestor {
            if current == id {
                return Err(ProtocolError::new(
                    ErrorTarget::XdgToplevel,
                    toplevel::error::INVALID_PARENT,
                    format!("toplevel {} would become its own ancestor", id),
                )
                .into());
            }
            ancestor = self
                .surfaces
                .get(&current)
                .and_then(|s| s.read().role.as_toplevel().and_then(|t| t.parent));
        }
        self.with_toplevel(id, |t| t.parent = parent)
    }

    /// Send a configure chosen by the window manager. The size is clamped
    /// to the client's limits.
    pub fn configure_toplevel(&mut self, id: SurfaceId, size: Size, states: ToplevelStates) -> Result<()> {
        let size = self.with_toplevel(id, |t| t.clamp_size(size))?;
        let bounds = self.outputs.values().next().map(|o| o.available_area().size());
        self.send_toplevel_configure(id, ToplevelConfigure { size, states, bounds });
        Ok(())
    }

    /// Ask the client to close the window.
    pub fn request_close(&mut self, id: SurfaceId) -> Result<()> {
        self.with_toplevel(id, |t| t.close_requested = true)?;
        if let Some(resource) = self.resources.get(&id).and_then(|r| r.toplevel.as_ref()).filter(|r| r.is_alive()) {
            resource.close();
        }
        Ok(())
    }

    fn send_toplevel_configure(&mut self, id: SurfaceId, configure: ToplevelConfigure) {
        let serial = self.ctx.next_serial();
        if self.with_toplevel(id, |t| t.xdg.send_configure(serial, configure)).is_err() {
            return;
        }
        let Some(res) = self.resources.get(&id) else {
            return;
        };
        if let Some(toplevel) = res.toplevel.as_ref().filter(|r| r.is_alive()) {
            if let Some(bounds) = configure.bounds.filter(|_| toplevel.version() >= 4) {
                toplevel.configure_bounds(bounds.width, bounds.height);
            }
            toplevel.configure(configure.size.width, configure.size.height, configure.states.to_wire());
        }
        if let Some(xdg_surface) = res.xdg_surface.as_ref().filter(|r| r.is_alive()) {
            xdg_surface.configure(serial);
        }
        wlog!(ROLE, "Toplevel {} configure {} ({:?})", id, serial, configure.size);
    }

    /// `xdg_toplevel.destroy`. Child popups must be destroyed first.
    pub fn toplevel_destroyed(&mut self, id: SurfaceId) -> Result<()> {
        if self.live_child_popups(id) {
            return Err(wm_base_error(
                xdg_wm_base::Error::DefunctSurfaces,
                format!("toplevel {} destroyed while it has popups", id),
            ));
        }
        self.with_toplevel(id, |t| t.destroy())?;
        self.toplevels.retain(|t| *t != id);
        for other in &self.toplevels {
            if let Some(s) = self.surfaces.get(other) {
                if let Some(t) = s.write().role.as_toplevel_mut().filter(|t| t.parent == Some(id)) {
                    t.parent = None;
                }
            }
        }
        if let Some(res) = self.resources.get_mut(&id) {
            res.toplevel = None;
        }
        self.unmap_role(id);
        Ok(())
    }

    // =========================================================================
    // xdg_popup
    // =========================================================================

    /// Area a popup of `parent` may occupy, relative to the parent's window
    /// geometry: the available area of the output under the parent.
    fn popup_bounds(&self, parent: Option<SurfaceId>, position: Point) -> Rect {
        let anchor = match parent {
            Some(p) => self.global_origin(p) + self.window_geometry_origin(p),
            None => position,
        };
        let area = self
            .outputs
            .values()
            .find(|o| o.rect().contains(anchor))
            .or_else(|| self.outputs.values().next())
            .map(|o| o.available_area())
            .unwrap_or_default();
        area.translate(-anchor.x, -anchor.y)
    }

    /// `xdg_surface.get_popup`. `parent` may be None when a layer surface
    /// adopts the popup later.
    pub fn get_popup(
        &mut self,
        id: SurfaceId,
        parent: Option<SurfaceId>,
        positioner: Positioner,
        resource: Option<XdgPopup>,
    ) -> Result<()> {
        if !positioner.is_complete() {
            return Err(wm_base_error(
                xdg_wm_base::Error::InvalidPositioner,
                "positioner needs a size and an anchor rect",
            ));
        }
        if let Some(parent) = parent {
            let valid = self
                .surfaces
                .get(&parent)
                .is_some_and(|s| matches!(s.read().role_kind(), RoleKind::Toplevel | RoleKind::Popup | RoleKind::Layer));
            if !valid {
                return Err(wm_base_error(
                    xdg_wm_base::Error::InvalidPopupParent,
                    format!("wl_surface@{} cannot parent a popup", parent),
                ));
            }
        }
        self.assign_role(
            id,
            Role::Popup(PopupRole::new(parent, positioner)),
            (ErrorTarget::XdgWmBase, xdg_wm_base::Error::Role.into()),
        )?;
        self.popups.retain(|p| *p != id);
        self.popups.push(id);
        if let Some(resource) = resource {
            self.resources_mut(id).popup = Some(resource);
        }
        Ok(())
    }

    /// `zwlr_layer_surface_v1.get_popup`
    pub fn layer_get_popup(&mut self, layer: SurfaceId, popup: SurfaceId) -> Result<()> {
        self.with_layer(layer, |_| ())?;
        self.with_popup(popup, |p| p.parent = Some(layer))
    }

    /// `xdg_popup.grab`. Only an unmapped popup may grab; a grab under a
    /// parent popup without one is dismissed at once.
    pub fn popup_grab(&mut self, id: SurfaceId) -> Result<()> {
        let (mapped, parent) = self.with_popup(id, |p| (p.is_mapped(), p.parent))?;
        if mapped {
            return Err(ProtocolError::new(
                ErrorTarget::XdgPopup,
                INVALID_GRAB,
                format!("popup {} grabbed after being mapped", id),
            )
            .into());
        }
        let parent_ungrabbed = parent
            .and_then(|p| self.surfaces.get(&p))
            .is_some_and(|s| s.read().role.as_popup().is_some_and(|p| !p.grabbed));
        self.with_popup(id, |p| p.grabbed = true)?;
        if parent_ungrabbed {
            self.dismiss_popup(id);
        }
        Ok(())
    }

    /// `xdg_popup.reposition`: new placement without remapping.
    pub fn popup_reposition(&mut self, id: SurfaceId, positioner: Positioner, token: u32) -> Result<()> {
        if !positioner.is_complete() {
            return Err(wm_base_error(
                xdg_wm_base::Error::InvalidPositioner,
                "positioner needs a size and an anchor rect",
            ));
        }
        let (parent, position) = {
            let arc = self.get_surface(id)?;
            let surface = arc.read();
            (surface.role.parent(), surface.position)
        };
        let bounds = self.popup_bounds(parent, position);
        let configure = self.with_popup(id, |p| p.reposition(positioner, token, bounds))?;
        self.send_popup_configure(id, configure);
        Ok(())
    }

    fn send_popup_configure(&mut self, id: SurfaceId, configure: PopupConfigure) {
        let serial = self.ctx.next_serial();
        if self.with_popup(id, |p| p.xdg.send_configure(serial, configure)).is_err() {
            return;
        }
        let Some(res) = self.resources.get(&id) else {
            return;
        };
        if let Some(popup) = res.popup.as_ref().filter(|r| r.is_alive()) {
            if let Some(token) = configure.reposition_token.filter(|_| popup.version() >= 3) {
                popup.repositioned(token);
            }
            let g = configure.geometry;
            popup.configure(g.x, g.y, g.width, g.height);
        }
        if let Some(xdg_surface) = res.xdg_surface.as_ref().filter(|r| r.is_alive()) {
            xdg_surface.configure(serial);
        }
        wlog!(ROLE, "Popup {} configure {} at {:?}", id, serial, configure.geometry);
    }

    /// Send `popup_done` to `id` and unmap it.
    fn dismiss_popup(&mut self, id: SurfaceId) {
        let dismissed = self
            .surfaces
            .get(&id)
            .is_some_and(|s| s.write().role.as_popup_mut().is_some_and(|p| p.dismiss()));
        if !dismissed {
            return;
        }
        if let Some(popup) = self.resources.get(&id).and_then(|r| r.popup.as_ref()).filter(|r| r.is_alive()) {
            popup.popup_done();
        }
        wlog!(ROLE, "Popup {} dismissed", id);
        self.unmap_role(id);
    }

    /// Dismiss every popup anchored to `parent`, topmost first.
    pub(super) fn dismiss_popups_of(&mut self, parent: SurfaceId) {
        let children: Vec<SurfaceId> = self
            .popups
            .iter()
            .rev()
            .copied()
            .filter(|p| {
                self.surfaces
                    .get(p)
                    .is_some_and(|s| s.read().role.as_popup().is_some_and(|r| r.parent == Some(parent)))
            })
            .collect();
        for popup in children {
            self.dismiss_popups_of(popup);
            self.dismiss_popup(popup);
        }
    }

    /// `xdg_popup.destroy`. Only the topmost popup of a chain may go.
    pub fn popup_destroyed(&mut self, id: SurfaceId) -> Result<()> {
        if self.live_child_popups(id) {
            return Err(wm_base_error(
                xdg_wm_base::Error::NotTheTopmostPopup,
                format!("popup {} destroyed while it has child popups", id),
            ));
        }
        self.with_popup(id, |p| p.destroy())?;
        self.popups.retain(|p| *p != id);
        if let Some(res) = self.resources.get_mut(&id) {
            res.popup = None;
        }
        self.unmap_role(id);
        Ok(())
    }

    // =========================================================================
    // Layer shell
    // =========================================================================

    /// `zwlr_layer_shell_v1.get_layer_surface`. Without an output the
    /// surface goes on the first one.
    pub fn get_layer_surface(
        &mut self,
        id: SurfaceId,
        output: Option<OutputId>,
        layer: u32,
        namespace: String,
        resource: Option<ZwlrLayerSurfaceV1>,
    ) -> Result<()> {
        let layer = Layer::from_raw(layer).ok_or_else(|| {
            ProtocolError::new(ErrorTarget::LayerShell, shell_error::INVALID_LAYER, format!("invalid layer {}", layer))
        })?;
        {
            let arc = self.get_surface(id)?;
            let surface = arc.read();
            if surface.current.has_buffer() || matches!(surface.pending.buffer, BufferAttach::Attach(_)) {
                return Err(ProtocolError::new(
                    ErrorTarget::LayerShell,
                    shell_error::ALREADY_CONSTRUCTED,
                    format!("wl_surface@{} already has a buffer", id),
                )
                .into());
            }
        }
        let output = output.or_else(|| self.outputs.keys().next().copied());
        self.assign_role(
            id,
            Role::Layer(LayerRole::new(output, layer, namespace)),
            (ErrorTarget::LayerShell, shell_error::ROLE),
        )?;
        self.layers.retain(|l| *l != id);
        self.layers.push(id);
        if let Some(resource) = resource {
            self.resources_mut(id).layer_surface = Some(resource);
        }
        if output.is_none() {
            // Nowhere to show it
            self.close_layer(id);
        }
        Ok(())
    }

    pub fn layer_ack_configure(&mut self, id: SurfaceId, serial: u32) -> Result<()> {
        self.with_layer(id, |l| l.ack_configure(serial))??;
        Ok(())
    }

    pub(super) fn send_layer_configure(&mut self, id: SurfaceId, size: Size) {
        let serial = self.ctx.next_serial();
        if self.with_layer(id, |l| l.send_configure(serial, size)).is_err() {
            return;
        }
        if let Some(layer) = self
            .resources
            .get(&id)
            .and_then(|r| r.layer_surface.as_ref())
            .filter(|r| r.is_alive())
        {
            layer.configure(serial, size.width.max(0) as u32, size.height.max(0) as u32);
        }
        wlog!(ROLE, "Layer surface {} configure {} ({:?})", id, serial, size);
    }

    /// Send `closed`: the surface will not be shown again.
    pub(super) fn close_layer(&mut self, id: SurfaceId) {
        if !self.with_layer(id, |l| l.close()).unwrap_or(false) {
            return;
        }
        if let Some(layer) = self
            .resources
            .get(&id)
            .and_then(|r| r.layer_surface.as_ref())
            .filter(|r| r.is_alive())
        {
            layer.closed();
        }
        wlog!(ROLE, "Layer surface {} closed", id);
        self.unmap_role(id);
    }

    /// `zwlr_layer_surface_v1.destroy`: the surface is unmapped and the
    /// output rearranged.
    pub fn layer_destroyed(&mut self, id: SurfaceId) -> Result<()> {
        let output = self.with_layer(id, |l| {
            l.destroy();
            l.output
        })?;
        self.layers.retain(|l| *l != id);
        if let Some(res) = self.resources.get_mut(&id) {
            res.layer_surface = None;
        }
        self.unmap_role(id);
        if let Some(output) = output {
            self.arrange_layers(output, None);
        }
        Ok(())
    }

    // =========================================================================
    // Session lock
    // =========================================================================

    /// `ext_session_lock_manager_v1.lock`. A second lock while one is
    /// active gets `finished` right away.
    pub fn lock_session(&mut self, resource: Option<ExtSessionLockV1>) -> bool {
        if !self.session_lock.lock() {
            if let Some(resource) = resource {
                resource.finished();
            }
            return false;
        }
        self.lock_resource = resource;
        true
    }

    /// `ext_session_lock_v1.get_lock_surface`
    pub fn get_lock_surface(
        &mut self,
        id: SurfaceId,
        output: OutputId,
        resource: Option<ExtSessionLockSurfaceV1>,
    ) -> Result<()> {
        let size = self
            .outputs
            .get(&output)
            .map(|o| o.rect().size())
            .ok_or(CoreError::InvalidOutputId(output))?;
        {
            let arc = self.get_surface(id)?;
            let surface = arc.read();
            if surface.current.has_buffer() || matches!(surface.pending.buffer, BufferAttach::Attach(_)) {
                return Err(ProtocolError::new(
                    ErrorTarget::SessionLock,
                    lock_error::ALREADY_CONSTRUCTED,
                    format!("wl_surface@{} already has a buffer", id),
                )
                .into());
            }
            check_assignable(
                id,
                surface.assigned_role,
                &surface.role,
                RoleKind::SessionLock,
                (ErrorTarget::SessionLock, lock_error::ROLE),
            )?;
        }
        self.session_lock.add_surface(output, id)?;
        self.assign_role(
            id,
            Role::SessionLock(LockSurfaceRole::new(output)),
            (ErrorTarget::SessionLock, lock_error::ROLE),
        )?;
        if let Some(resource) = resource {
            self.resources_mut(id).lock_surface = Some(resource);
        }
        self.send_lock_configure(id, size);
        Ok(())
    }

    fn send_lock_configure(&mut self, id: SurfaceId, size: Size) {
        let serial = self.ctx.next_serial();
        let sent = self
            .with_role(id, Role::as_lock_mut, |l| l.send_configure(serial, size))
            .is_ok();
        if !sent {
            return;
        }
        if let Some(lock) = self
            .resources
            .get(&id)
            .and_then(|r| r.lock_surface.as_ref())
            .filter(|r| r.is_alive())
        {
            lock.configure(serial, size.width.max(0) as u32, size.height.max(0) as u32);
        }
    }

    /// Resend the configure of the lock surface on `output` after its size
    /// changed.
    pub(super) fn reconfigure_lock_surface(&mut self, output: OutputId) {
        let (Some(id), Some(size)) = (
            self.session_lock.surface_for(output),
            self.outputs.get(&output).map(|o| o.rect().size()),
        ) else {
            return;
        };
        self.send_lock_configure(id, size);
    }

    pub fn lock_surface_ack_configure(&mut self, id: SurfaceId, serial: u32) -> Result<()> {
        self.with_role(id, Role::as_lock_mut, |l| l.ack_configure(serial))??;
        Ok(())
    }

    /// A lock surface committed; grants the lock once every output has one
    /// with content.
    pub(super) fn lock_surface_committed(&mut self, output: OutputId, has_content: bool) {
        let outputs: Vec<OutputId> = self.outputs.keys().copied().collect();
        if self.session_lock.surface_committed(output, has_content, &outputs) {
            self.lock_granted();
        }
    }

    /// Recheck a pending lock after the output set changed.
    pub(super) fn check_lock_granted(&mut self) {
        let outputs: Vec<OutputId> = self.outputs.keys().copied().collect();
        if self.session_lock.check_granted(&outputs) {
            self.lock_granted();
        }
    }

    fn lock_granted(&mut self) {
        if let Some(lock) = self.lock_resource.as_ref().filter(|r| r.is_alive()) {
            lock.locked();
        }
        let surfaces: Vec<SurfaceId> = self.session_lock.surfaces().collect();
        let mut damage = Region::new();
        for id in surfaces {
            let ready = self
                .surfaces
                .get(&id)
                .is_some_and(|s| matches!(&s.read().role, Role::SessionLock(l) if l.has_content()));
            if ready {
                self.set_mapped(id, true);
            }
            damage.union(&self.update_tree_geometry(id));
        }
        self.damage_global(&damage);
        for output in self.outputs.values() {
            output.damage_all();
            output.schedule_repaint();
        }
        self.scene_dirty = true;
        self.emit(CompositorEvent::SessionLocked);
    }

    /// `ext_session_lock_v1.unlock_and_destroy`
    pub fn unlock_session(&mut self) -> Result<()> {
        let surfaces: Vec<SurfaceId> = self.session_lock.surfaces().collect();
        self.session_lock.unlock()?;
        for id in surfaces {
            self.unmap_role(id);
        }
        self.lock_resource = None;
        for output in self.outputs.values() {
            output.damage_all();
            output.schedule_repaint();
        }
        self.scene_dirty = true;
        self.emit(CompositorEvent::SessionUnlocked);
        Ok(())
    }

    /// `ext_session_lock_v1.destroy`
    pub fn lock_destroyed(&mut self) -> Result<()> {
        let surfaces: Vec<SurfaceId> = self.session_lock.surfaces().collect();
        self.session_lock.lock_destroyed()?;
        self.lock_resource = None;
        for id in surfaces {
            self.unmap_role(id);
        }
        Ok(())
    }

    /// `ext_session_lock_surface_v1.destroy`
    pub fn lock_surface_destroyed(&mut self, id: SurfaceId) -> Result<()> {
        self.with_role(id, Role::as_lock_mut, |l| l.destroy())?;
        self.session_lock.remove_surface(id);
        if let Some(res) = self.resources.get_mut(&id) {
            res.lock_surface = None;
        }
        self.unmap_role(id);
        Ok(())
    }

    // =========================================================================
    // Cursor and drag-and-drop
    // =========================================================================

    /// `wl_pointer.set_cursor`. `None` hides the cursor.
    pub fn set_cursor(&mut self, surface: Option<SurfaceId>, hotspot: Point) -> Result<()> {
        if let Some(id) = surface {
            let arc = self.get_surface(id)?;
            let mut s = arc.write();
            check_assignable(id, s.assigned_role, &s.role, RoleKind::Cursor, (ErrorTarget::Pointer, POINTER_ROLE))?;
            match s.role.as_cursor_mut() {
                Some(cursor) => cursor.set_hotspot(hotspot),
                None => s.role = Role::Cursor(CursorRole::new(hotspot)),
            }
            s.assigned_role = RoleKind::Cursor;
        }
        let previous = std::mem::replace(&mut self.cursor, surface);
        if let Some(old) = previous.filter(|old| Some(*old) != surface) {
            self.unmap_role(old);
        }
        if let Some(id) = surface {
            let visible = self.surfaces.get(&id).is_some_and(|s| s.read().current.has_buffer());
            self.set_mapped(id, visible);
            let damage = self.update_tree_geometry(id);
            self.damage_global(&damage);
        }
        self.scene_dirty = true;
        Ok(())
    }

    /// Move the pointer; the cursor and drag icon follow it.
    pub fn set_pointer_position(&mut self, position: Point) {
        if self.pointer_position == position {
            return;
        }
        self.pointer_position = position;
        let followers: Vec<SurfaceId> = self
            .cursor
            .into_iter()
            .chain(self.drag.as_ref().and_then(|d| d.icon))
            .collect();
        let mut damage = Region::new();
        for id in followers {
            damage.union(&self.update_tree_geometry(id));
        }
        self.damage_global(&damage);
        if self.scene_dirty {
            self.rebuild_scene();
        }
    }

    /// `wl_data_device.start_drag` with an optional icon surface.
    pub fn start_drag(&mut self, icon: Option<SurfaceId>) -> Result<()> {
        if let Some(id) = icon {
            let arc = self.get_surface(id)?;
            let mut s = arc.write();
            check_assignable(id, s.assigned_role, &s.role, RoleKind::DndIcon, (ErrorTarget::DataDevice, DATA_DEVICE_ROLE))?;
            if s.role.as_dnd_icon_mut().is_none() {
                s.role = Role::DndIcon(DndIconRole::new());
            }
            s.assigned_role = RoleKind::DndIcon;
        }
        if self.drag.is_some() {
            self.end_drag(true);
        }
        self.drag = Some(DragSession::new(icon, self.config.drop_timeout));
        if let Some(id) = icon {
            let visible = self.surfaces.get(&id).is_some_and(|s| s.read().current.has_buffer());
            self.set_mapped(id, visible);
            let damage = self.update_tree_geometry(id);
            self.damage_global(&damage);
        }
        wlog!(ROLE, "Drag started (icon {:?})", icon);
        Ok(())
    }

    /// The pointer button was released over a target.
    pub fn drag_drop(&mut self, now: Instant) {
        if let Some(drag) = self.drag.as_mut() {
            drag.drop_at(now);
        }
    }

    /// The destination finished the drop.
    pub fn drag_finished(&mut self) {
        let done = self.drag.as_mut().is_some_and(|d| {
            d.finish();
            d.is_done()
        });
        if done {
            self.end_drag(false);
        }
    }

    pub fn drag_cancel(&mut self) {
        if let Some(drag) = self.drag.as_mut() {
            drag.cancel();
            self.end_drag(true);
        }
    }

    /// Cancel a drop the destination did not finish in time.
    pub(crate) fn check_drag_timeout(&mut self, now: Instant) {
        if self.drag.as_mut().is_some_and(|d| d.check_timeout(now)) {
            self.end_drag(true);
        }
    }

    fn end_drag(&mut self, cancelled: bool) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        if let Some(icon) = drag.icon {
            self.unmap_role(icon);
        }
        wlog!(ROLE, "Drag ended ({})", if cancelled { "cancelled" } else { "finished" });
        self.emit(CompositorEvent::DragEnded { cancelled });
    }
}
