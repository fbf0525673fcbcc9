//! Surface lifecycle, pending state requests and the commit coordinator.
//!
//! A commit runs in three steps under the process lock:
//! 1. the state to apply is taken (from `pending`, or from the cache when a
//!    parent applies it) and validated against the surface and its role;
//! 2. the buffer is imported and the state promoted to `current`, then
//!    synchronized subsurfaces apply their cached state in stacking order;
//! 3. the role promotes its own state and the coordinator updates mapping,
//!    global geometry, damage, frame callbacks and the scene.
//!
//! A failure in step 1 or 2 gives the taken state back and leaves `current`
//! untouched.

use std::sync::Arc;

use parking_lot::RwLock;
use wayland_protocols::wp::content_type::v1::server::wp_content_type_manager_v1;
use wayland_protocols::wp::fractional_scale::v1::server::wp_fractional_scale_manager_v1;
use wayland_protocols::wp::fractional_scale::v1::server::wp_fractional_scale_v1::WpFractionalScaleV1;
use wayland_protocols::wp::viewporter::server::{wp_viewport, wp_viewporter};
use wayland_server::backend::ClientId;
use wayland_server::protocol::wl_subsurface::WlSubsurface;
use wayland_server::protocol::wl_surface::{self, WlSurface};
use wayland_server::Resource;

use crate::core::compositor::CompositorEvent;
use crate::core::errors::{CoreError, ErrorTarget, ProtocolError, Result};
use crate::core::feedback::frame_callback::FrameCallback;
use crate::core::feedback::presentation::PresentationFeedback;
use crate::core::output::OutputId;
use crate::core::role::subsurface::{restack, SUBCOMPOSITOR_BAD_PARENT, SUBCOMPOSITOR_BAD_SURFACE};
use crate::core::role::{
    check_assignable, CommitContext, CommitDecision, CommitOrigin, CommittedView, PendingView, Role, RoleHandler,
    RoleKind, SubsurfaceRole,
};
use crate::core::surface::commit::{apply_commit, resolve_geometry, CommitDelta};
use crate::core::surface::{
    Buffer, BufferAttach, BufferBinding, ContentType, CurrentState, Surface, SurfaceId, SurfaceState, Transform,
};
use crate::util::geometry::{Point, Rect, RectF, Size};
use crate::util::logging::STATE;
use crate::util::region::Region;
use crate::wlog;

use super::{CompositorState, DeferredRelease};

/// Buffer size `state` leaves the surface with.
fn pending_buffer_size(state: &SurfaceState, current: &CurrentState) -> Option<Size> {
    match &state.buffer {
        BufferAttach::Unchanged => current.buffer.as_ref().map(|b| b.size),
        BufferAttach::Detach => None,
        BufferAttach::Attach(buffer) => Some(buffer.buffer_type.size()),
    }
}

/// Hand a refused commit's state back to where it came from.
fn give_back(surface: &mut Surface, state: SurfaceState, origin: CommitOrigin) {
    match origin {
        CommitOrigin::Client => surface.pending.restore(state),
        CommitOrigin::Parent => surface.cached = Some(state),
    }
}

fn viewport_error(code: wp_viewport::Error, msg: impl Into<String>) -> CoreError {
    ProtocolError::new(ErrorTarget::Viewport, code, msg).into()
}

impl CompositorState {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// `wl_compositor.create_surface`
    pub fn create_surface(&mut self, client_id: Option<ClientId>, resource: Option<WlSurface>) -> SurfaceId {
        let id = self.next_surface_id;
        self.next_surface_id += 1;
        self.surfaces
            .insert(id, Arc::new(RwLock::new(Surface::new(id, client_id, resource))));
        wlog!(STATE, "Surface {} created", id);
        self.emit(CompositorEvent::SurfaceCreated { surface_id: id });
        id
    }

    /// A role object that must be destroyed before its surface still exists.
    pub fn has_live_role_object(&self, id: SurfaceId) -> bool {
        self.resources.get(&id).is_some_and(|r| {
            r.xdg_surface.as_ref().is_some_and(|o| o.is_alive())
                || r.layer_surface.as_ref().is_some_and(|o| o.is_alive())
                || r.lock_surface.as_ref().is_some_and(|o| o.is_alive())
        })
    }

    /// Forget a surface: `wl_surface.destroy` or client teardown.
    pub fn destroy_surface(&mut self, id: SurfaceId) {
        let Some(arc) = self.surfaces.remove(&id) else {
            return;
        };
        let ctx = self.ctx.clone();
        let _guard = ctx.lock().lock();

        let (kind, role_parent, layer_output, children, shown, output, binding) = {
            let mut surface = arc.write();
            let kind = surface.role_kind();
            let role_parent = surface.role.as_subsurface().map(|s| s.parent);
            let layer_output = surface.role.as_layer().and_then(|l| l.output);
            let children: Vec<SurfaceId> = surface.child_ids().collect();
            let shown = surface.visible_rect.take();
            let output = surface.outputs.first().copied();
            surface.mapped = false;
            surface.outputs.clear();
            let binding = surface.current.buffer.take();
            (kind, role_parent, layer_output, children, shown, output, binding)
        };

        for out in self.outputs.values() {
            out.shared.frames.lock().remove_surface(id);
        }
        if let Some(binding) = binding {
            self.retire_binding(binding, output);
        }
        if let Some(parent) = role_parent.and_then(|p| self.surfaces.get(&p)) {
            parent.write().remove_child(id);
        }

        match kind {
            RoleKind::Toplevel => self.toplevels.retain(|s| *s != id),
            RoleKind::Popup => self.popups.retain(|s| *s != id),
            RoleKind::Layer => self.layers.retain(|s| *s != id),
            RoleKind::SessionLock => self.session_lock.remove_surface(id),
            RoleKind::Cursor if self.cursor == Some(id) => self.cursor = None,
            RoleKind::DndIcon => {
                if let Some(drag) = self.drag.as_mut().filter(|d| d.icon == Some(id)) {
                    drag.icon = None;
                }
            }
            _ => {}
        }
        self.dismiss_popups_of(id);
        for toplevel in &self.toplevels {
            if let Some(t) = self.surfaces.get(toplevel) {
                if let Some(role) = t.write().role.as_toplevel_mut().filter(|r| r.parent == Some(id)) {
                    role.parent = None;
                }
            }
        }

        // Subsurfaces of a destroyed parent are unmapped
        let mut damage = Region::new();
        for child in children {
            self.set_mapped(child, false);
            self.update_subtree_mapping(child);
            damage.union(&self.update_tree_geometry(child));
        }
        if let Some(rect) = shown {
            damage.add(rect);
            self.emit(CompositorEvent::MappingChanged {
                surface_id: id,
                role: kind,
                mapped: false,
            });
        }
        self.damage_global(&damage);
        if let Some(output) = layer_output {
            self.arrange_layers(output, None);
        }

        self.resources.remove(&id);
        self.scene_dirty = true;
        self.rebuild_scene();
        wlog!(STATE, "Surface {} destroyed ({})", id, kind);
        self.emit(CompositorEvent::SurfaceDestroyed { surface_id: id });
    }

    /// Drop a binding that is no longer current. A DMA-BUF may still be
    /// sampled by a frame in flight, so its release waits for `output` to
    /// finish the frame being rendered now.
    pub(super) fn retire_binding(&mut self, binding: Arc<BufferBinding>, output: Option<OutputId>) {
        if !binding.is_dmabuf() {
            return;
        }
        match output.and_then(|o| self.outputs.get(&o)) {
            Some(out) => {
                let frame = out.shared.scheduler.frame();
                wlog!(STATE, "Release of buffer {} deferred to frame {}", binding.buffer.id, frame);
                self.deferred_releases.push(DeferredRelease {
                    output: out.id,
                    frame,
                    binding,
                });
            }
            None => binding.buffer.release(),
        }
    }

    // =========================================================================
    // Pending state
    // =========================================================================

    fn with_surface<R>(&self, id: SurfaceId, f: impl FnOnce(&mut Surface) -> R) -> Result<R> {
        let arc = self.get_surface(id)?;
        let mut surface = arc.write();
        Ok(f(&mut surface))
    }

    /// `wl_surface.attach`. Since version 5 the offset must be zero.
    pub fn surface_attach(&mut self, id: SurfaceId, buffer: Option<Arc<Buffer>>, offset: Point, version: u32) -> Result<()> {
        if version >= 5 && offset != Point::default() {
            return Err(ProtocolError::new(
                ErrorTarget::Surface,
                wl_surface::Error::InvalidOffset,
                format!("attach offset {},{} on wl_surface v{}", offset.x, offset.y, version),
            )
            .into());
        }
        self.with_surface(id, |surface| {
            let size = buffer.as_ref().map(|b| b.buffer_type.size());
            surface.pending.buffer = match buffer {
                Some(buffer) => BufferAttach::Attach(buffer),
                None => BufferAttach::Detach,
            };
            surface.pending.offset += offset;
            if let Some(role) = surface.role.handler_mut() {
                role.handle_buffer_attach(size);
                if offset != Point::default() {
                    role.handle_offset(offset);
                }
            }
        })
    }

    /// `wl_surface.offset`
    pub fn surface_offset(&mut self, id: SurfaceId, offset: Point) -> Result<()> {
        self.with_surface(id, |surface| {
            surface.pending.offset += offset;
            if let Some(role) = surface.role.handler_mut() {
                role.handle_offset(offset);
            }
        })
    }

    pub fn surface_damage(&mut self, id: SurfaceId, rect: Rect) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.damage.add_surface(rect))
    }

    pub fn surface_damage_buffer(&mut self, id: SurfaceId, rect: Rect) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.damage.add_buffer(rect))
    }

    /// `wl_surface.frame`
    pub fn surface_frame(&mut self, id: SurfaceId, callback: FrameCallback) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.frame_callbacks.push(callback))
    }

    /// `wp_presentation.feedback`
    pub fn surface_presentation_feedback(&mut self, id: SurfaceId, feedback: PresentationFeedback) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.presentation_feedbacks.push(feedback))
    }

    pub fn surface_set_buffer_scale(&mut self, id: SurfaceId, scale: i32) -> Result<()> {
        if scale < 1 {
            return Err(ProtocolError::new(
                ErrorTarget::Surface,
                wl_surface::Error::InvalidScale,
                format!("buffer scale {} is not positive", scale),
            )
            .into());
        }
        self.with_surface(id, |surface| surface.pending.scale = scale)
    }

    pub fn surface_set_buffer_transform(&mut self, id: SurfaceId, raw: u32) -> Result<()> {
        let transform = Transform::from_raw(raw).ok_or_else(|| {
            ProtocolError::new(
                ErrorTarget::Surface,
                wl_surface::Error::InvalidTransform,
                format!("invalid buffer transform {}", raw),
            )
        })?;
        self.with_surface(id, |surface| surface.pending.transform = transform)
    }

    /// `None` resets to an empty opaque region.
    pub fn surface_set_opaque_region(&mut self, id: SurfaceId, region: Option<Region>) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.opaque_region = region)
    }

    /// `None` resets to an infinite input region.
    pub fn surface_set_input_region(&mut self, id: SurfaceId, region: Option<Region>) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.input_region = region)
    }

    pub fn surface_set_content_type(&mut self, id: SurfaceId, content_type: ContentType) -> Result<()> {
        self.with_surface(id, |surface| surface.pending.content_type = content_type)
    }

    // =========================================================================
    // wp_viewport
    // =========================================================================

    /// `wp_viewporter.get_viewport`
    pub fn create_viewport(&mut self, id: SurfaceId) -> Result<()> {
        self.with_surface(id, |surface| {
            if surface.has_viewport {
                return Err(ProtocolError::new(
                    ErrorTarget::Viewporter,
                    wp_viewporter::Error::ViewportExists,
                    format!("wl_surface@{} already has a viewport", surface.id),
                ));
            }
            surface.has_viewport = true;
            Ok(())
        })?
        .map_err(Into::into)
    }

    /// All -1 unsets the source; otherwise the origin must be non-negative
    /// and the size positive.
    pub fn viewport_set_source(&mut self, id: SurfaceId, x: f64, y: f64, width: f64, height: f64) -> Result<()> {
        let source = if [x, y, width, height].iter().all(|v| *v == -1.0) {
            None
        } else if x < 0.0 || y < 0.0 || width <= 0.0 || height <= 0.0 {
            return Err(viewport_error(
                wp_viewport::Error::BadValue,
                format!("invalid source {},{} {}x{}", x, y, width, height),
            ));
        } else {
            Some(RectF::new(x, y, width, height))
        };
        self.viewport_surface(id)?.write().pending.viewport.source = source;
        Ok(())
    }

    /// -1,-1 unsets the destination; otherwise both must be positive.
    pub fn viewport_set_destination(&mut self, id: SurfaceId, width: i32, height: i32) -> Result<()> {
        let destination = if width == -1 && height == -1 {
            None
        } else if width <= 0 || height <= 0 {
            return Err(viewport_error(
                wp_viewport::Error::BadValue,
                format!("invalid destination {}x{}", width, height),
            ));
        } else {
            Some(Size::new(width, height))
        };
        self.viewport_surface(id)?.write().pending.viewport.destination = destination;
        Ok(())
    }

    /// `wp_viewport.destroy`: the crop and scale are removed on the next
    /// commit.
    pub fn viewport_destroyed(&mut self, id: SurfaceId) {
        if let Some(arc) = self.surfaces.get(&id) {
            let mut surface = arc.write();
            surface.has_viewport = false;
            surface.pending.viewport = Default::default();
        }
        if let Some(res) = self.resources.get_mut(&id) {
            res.viewport = None;
        }
    }

    fn viewport_surface(&self, id: SurfaceId) -> Result<Arc<RwLock<Surface>>> {
        self.surfaces
            .get(&id)
            .cloned()
            .ok_or_else(|| viewport_error(wp_viewport::Error::NoSurface, "the wl_surface was destroyed"))
    }

    // =========================================================================
    // wp_fractional_scale_v1 / wp_content_type_v1
    // =========================================================================

    /// `wp_fractional_scale_manager_v1.get_fractional_scale`. The current
    /// preferred scale is sent right away when it is known.
    pub fn create_fractional_scale(&mut self, id: SurfaceId, resource: Option<WpFractionalScaleV1>) -> Result<()> {
        let preferred = self.with_surface(id, |surface| {
            if surface.has_fractional_scale {
                return Err(ProtocolError::new(
                    ErrorTarget::FractionalScale,
                    wp_fractional_scale_manager_v1::Error::FractionalScaleExists,
                    format!("wl_surface@{} already has a fractional scale object", surface.id),
                ));
            }
            surface.has_fractional_scale = true;
            Ok(surface.preferred_scale)
        })??;
        if let Some(resource) = resource {
            if preferred > 0 {
                resource.preferred_scale(preferred);
            }
            self.resources_mut(id).fractional_scale = Some(resource);
        }
        Ok(())
    }

    pub fn fractional_scale_destroyed(&mut self, id: SurfaceId) {
        if let Some(arc) = self.surfaces.get(&id) {
            arc.write().has_fractional_scale = false;
        }
        if let Some(res) = self.resources.get_mut(&id) {
            res.fractional_scale = None;
        }
    }

    /// `wp_content_type_manager_v1.get_surface_content_type`
    pub fn create_content_type(&mut self, id: SurfaceId) -> Result<()> {
        self.with_surface(id, |surface| {
            if surface.has_content_type {
                return Err(ProtocolError::new(
                    ErrorTarget::ContentType,
                    wp_content_type_manager_v1::Error::AlreadyConstructed,
                    format!("wl_surface@{} already has a content type object", surface.id),
                ));
            }
            surface.has_content_type = true;
            Ok(())
        })??;
        Ok(())
    }

    /// `wp_content_type_v1.destroy`: the hint goes back to none on the
    /// next commit.
    pub fn content_type_destroyed(&mut self, id: SurfaceId) {
        if let Some(arc) = self.surfaces.get(&id) {
            let mut surface = arc.write();
            surface.has_content_type = false;
            surface.pending.content_type = ContentType::None;
        }
    }

    // =========================================================================
    // wl_region
    // =========================================================================

    pub fn create_region(&mut self, client: ClientId, id: u32) {
        self.regions.insert((client, id), Region::new());
    }

    pub fn region_add(&mut self, client: &ClientId, id: u32, rect: Rect) {
        if let Some(region) = self.regions.get_mut(&(client.clone(), id)) {
            region.add(rect);
        }
    }

    pub fn region_subtract(&mut self, client: &ClientId, id: u32, rect: Rect) {
        if let Some(region) = self.regions.get_mut(&(client.clone(), id)) {
            region.subtract(rect);
        }
    }

    pub fn destroy_region(&mut self, client: &ClientId, id: u32) {
        self.regions.remove(&(client.clone(), id));
    }

    /// Snapshot of a region, for `set_opaque_region`/`set_input_region`
    pub fn region(&self, client: &ClientId, id: u32) -> Option<Region> {
        self.regions.get(&(client.clone(), id)).cloned()
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// `wl_surface.commit`
    pub fn commit_surface(&mut self, id: SurfaceId) -> Result<()> {
        self.handle_surface_commit(id, CommitOrigin::Client)
    }

    /// Commit `id`. A synchronized subsurface committing from the client
    /// only caches its state.
    pub fn handle_surface_commit(&mut self, id: SurfaceId, origin: CommitOrigin) -> Result<()> {
        let arc = self.get_surface(id)?;
        let context = CommitContext {
            origin,
            effectively_sync: self.is_effectively_sync(id),
        };
        {
            let mut surface = arc.write();
            let decision = surface
                .role
                .handler()
                .map(|role| role.accept_commit(&context))
                .unwrap_or(CommitDecision::Apply);
            if decision == CommitDecision::Defer {
                surface.commit_to_cache();
                return Ok(());
            }
        }

        let ctx = self.ctx.clone();
        let _guard = ctx.lock().lock();
        let result = self.promote(id, origin);
        if self.scene_dirty {
            self.rebuild_scene();
        }
        result
    }

    fn promote(&mut self, id: SurfaceId, origin: CommitOrigin) -> Result<()> {
        let arc = self.get_surface(id)?;
        let mut surface = arc.write();
        let state = match origin {
            CommitOrigin::Client => Some(surface.take_commit_state()),
            CommitOrigin::Parent => surface.cached.take(),
        };
        let Some(state) = state else {
            // Nothing cached here, but synchronized descendants may have
            // committed since the last time this surface did
            let children: Vec<SurfaceId> = surface.child_ids().collect();
            drop(surface);
            for child in children {
                if self.is_effectively_sync(child) {
                    if let Err(err) = self.promote(child, CommitOrigin::Parent) {
                        self.report_nested_error(child, &err);
                    }
                }
            }
            return Ok(());
        };

        let checked = resolve_geometry(&state, &surface.current).and_then(|geometry| {
            let view = PendingView {
                buffer_size: pending_buffer_size(&state, &surface.current),
                size: geometry.size,
                attaches: matches!(state.buffer, BufferAttach::Attach(_)),
            };
            match surface.role.handler() {
                Some(role) => role.validate_commit(&view).map(|_| geometry),
                None => Ok(geometry),
            }
        });
        let geometry = match checked {
            Ok(geometry) => geometry,
            Err(err) => {
                give_back(&mut surface, state, origin);
                return Err(err.into());
            }
        };

        let binding = match &state.buffer {
            BufferAttach::Attach(buffer) => {
                let imported = BufferBinding::bind(buffer.clone(), &mut **self.renderer.lock(), &self.ctx);
                match imported {
                    Ok(binding) => Some(binding),
                    Err(err) => {
                        tracing::warn!("Commit of surface {} refused: {}", id, err);
                        give_back(&mut surface, state, origin);
                        return Err(err);
                    }
                }
            }
            _ => None,
        };

        let output = surface.outputs.first().copied();
        let CommitDelta {
            replaced,
            offset,
            damage,
            frame_callbacks,
            presentation_feedbacks,
            ..
        } = apply_commit(state, &mut surface.current, binding, geometry);
        if !surface.role_kind().is_soft() {
            surface.commit_offset += offset;
        }
        let stacking_changed = surface.children != surface.pending_children;
        if stacking_changed {
            surface.children = surface.pending_children.clone();
        }
        let children: Vec<SurfaceId> = surface.child_ids().collect();
        let current_buffer = surface.current.buffer.as_ref().map(|b| b.buffer.clone());
        drop(surface);

        if let Some(old) = replaced {
            let reattached = current_buffer.is_some_and(|b| Arc::ptr_eq(&b, &old.buffer));
            if !reattached {
                self.retire_binding(old, output);
            }
        }

        // Subsurface positions and cached state ride on the parent's commit
        for child in &children {
            if let Some(c) = self.surfaces.get(child) {
                if let Some(sub) = c.write().role.as_subsurface_mut() {
                    sub.apply_position();
                }
            }
        }
        for child in &children {
            if self.is_effectively_sync(*child) {
                if let Err(err) = self.promote(*child, CommitOrigin::Parent) {
                    self.report_nested_error(*child, &err);
                }
            }
        }

        // Role state
        let bounds = self.subtree_bounds(id).unwrap_or_default();
        let parent_mapped = self.parent_mapped(id);
        let committed = {
            let surface = arc.read();
            CommittedView {
                has_buffer: surface.current.has_buffer(),
                size: surface.current.size(),
                offset,
                bounds,
                parent_mapped,
            }
        };
        let (outcome, kind, lock_output, layer_output) = {
            let mut surface = arc.write();
            let outcome = surface
                .role
                .handler_mut()
                .map(|role| role.handle_commit(&committed))
                .unwrap_or_default();
            let lock_output = match &surface.role {
                Role::SessionLock(lock) => Some(lock.output),
                _ => None,
            };
            let layer_output = surface.role.as_layer().and_then(|l| l.output);
            (outcome, surface.role_kind(), lock_output, layer_output)
        };

        let mut mapped = outcome.mapped;
        if let Some(output) = lock_output {
            self.lock_surface_committed(output, outcome.mapped);
            mapped = outcome.mapped && self.session_lock.locked();
        }
        self.set_mapped(id, mapped);
        self.update_subtree_mapping(id);
        if kind == RoleKind::Subsurface {
            self.refresh_root_geometry(id);
        }

        // Geometry and damage
        let root = self.root_of(id);
        let mut frame_damage = self.update_tree_geometry(root);
        if let Some(rect) = arc.read().visible_rect {
            frame_damage.union(&damage.translated(rect.x, rect.y));
        }
        if stacking_changed {
            for sid in children.iter().copied().chain(std::iter::once(id)) {
                if let Some(rect) = self.surfaces.get(&sid).and_then(|s| s.read().visible_rect) {
                    frame_damage.add(rect);
                }
            }
            self.scene_dirty = true;
        }
        self.damage_global(&frame_damage);

        self.queue_frame_feedback(id, frame_callbacks, presentation_feedbacks);

        match kind {
            RoleKind::Layer if outcome.relayout || outcome.needs_configure => {
                if let Some(output) = layer_output {
                    self.arrange_layers(output, outcome.needs_configure.then_some(id));
                }
            }
            _ if outcome.needs_configure => self.send_initial_configure(id),
            _ => {}
        }
        Ok(())
    }

    /// A synchronized child's cached state failed to apply during its
    /// parent's commit. The parent's commit stands.
    fn report_nested_error(&mut self, child: SurfaceId, err: &CoreError) {
        match err.as_protocol() {
            Some(protocol) => {
                let protocol = protocol.clone();
                self.post_surface_error(child, &protocol);
            }
            None => tracing::warn!("Cached state of surface {} not applied: {}", child, err),
        }
    }

    /// True when `id` or one of its ancestors is a synchronized subsurface.
    pub fn is_effectively_sync(&self, id: SurfaceId) -> bool {
        let mut current = id;
        loop {
            let Some(surface) = self.surfaces.get(&current) else {
                return false;
            };
            let parent = match surface.read().role.as_subsurface() {
                Some(sub) if sub.is_alive() => {
                    if sub.sync {
                        return true;
                    }
                    sub.parent
                }
                _ => return false,
            };
            current = parent;
        }
    }

    fn parent_mapped(&self, id: SurfaceId) -> bool {
        let parent = self
            .surfaces
            .get(&id)
            .and_then(|s| s.read().role.as_subsurface().filter(|r| r.is_alive()).map(|r| r.parent));
        parent
            .and_then(|p| self.surfaces.get(&p))
            .is_some_and(|p| p.read().mapped)
    }

    /// Update the mapped flag, reporting transitions.
    pub(super) fn set_mapped(&mut self, id: SurfaceId, mapped: bool) {
        let Some(arc) = self.surfaces.get(&id).cloned() else {
            return;
        };
        let kind = {
            let mut surface = arc.write();
            if surface.mapped == mapped {
                return;
            }
            surface.mapped = mapped;
            surface.role_kind()
        };
        wlog!(STATE, "Surface {} {} as {}", id, if mapped { "mapped" } else { "unmapped" }, kind);
        self.scene_dirty = true;
        self.emit(CompositorEvent::MappingChanged {
            surface_id: id,
            role: kind,
            mapped,
        });
        if !mapped && matches!(kind, RoleKind::Toplevel | RoleKind::Popup | RoleKind::Layer) {
            self.dismiss_popups_of(id);
        }
    }

    /// A subsurface is mapped while it has a buffer and its parent is mapped.
    pub(super) fn update_subtree_mapping(&mut self, id: SurfaceId) {
        let Some((parent_mapped, children)) = self.surfaces.get(&id).map(|s| {
            let s = s.read();
            (s.mapped, s.child_ids().collect::<Vec<_>>())
        }) else {
            return;
        };
        for child in children {
            let mapped = parent_mapped
                && self.surfaces.get(&child).is_some_and(|c| {
                    let c = c.read();
                    c.current.has_buffer() && c.role.as_subsurface().is_some_and(|r| r.is_alive())
                });
            self.set_mapped(child, mapped);
            self.update_subtree_mapping(child);
        }
    }

    /// Recompute the window geometry of the xdg surface at the root of
    /// `id`'s subsurface tree.
    pub(super) fn refresh_root_geometry(&mut self, id: SurfaceId) {
        let root = self.root_of(id);
        let bounds = self.subtree_bounds(root).unwrap_or_default();
        if let Some(surface) = self.surfaces.get(&root) {
            let mut surface = surface.write();
            let changed = match &mut surface.role {
                Role::Toplevel(toplevel) => toplevel.xdg.refresh_geometry(bounds),
                Role::Popup(popup) => popup.xdg.refresh_geometry(bounds),
                _ => false,
            };
            if changed {
                wlog!(STATE, "Window geometry of surface {} follows its subsurfaces", root);
            }
        }
    }

    /// Hand a commit's frame callbacks and feedback to the output showing
    /// the surface. Off screen, callbacks wait for the surface to reach an
    /// output and feedback is discarded.
    pub(super) fn queue_frame_feedback(&mut self, id: SurfaceId, callbacks: Vec<FrameCallback>, feedbacks: Vec<PresentationFeedback>) {
        if callbacks.is_empty() && feedbacks.is_empty() {
            return;
        }
        let Some(arc) = self.surfaces.get(&id) else {
            return;
        };
        let output = {
            let surface = arc.read();
            surface.mapped.then(|| surface.outputs.first().copied()).flatten()
        };
        match output.and_then(|o| self.outputs.get(&o)) {
            Some(output) => {
                output.shared.frames.lock().enqueue(id, callbacks, feedbacks);
                output.schedule_repaint();
            }
            None => {
                arc.write().current.frame_callbacks.extend(callbacks);
                for feedback in feedbacks {
                    feedback.discard();
                }
            }
        }
    }

    // =========================================================================
    // wl_subsurface
    // =========================================================================

    /// `wl_subcompositor.get_subsurface`. The new subsurface is stacked on
    /// top of its siblings once the parent commits.
    pub fn create_subsurface(&mut self, id: SurfaceId, parent: SurfaceId, resource: Option<WlSubsurface>) -> Result<()> {
        let surface_arc = self.get_surface(id)?;
        let parent_arc = self.get_surface(parent)?;
        if id == parent || self.is_ancestor(id, parent) {
            return Err(ProtocolError::new(
                ErrorTarget::Subcompositor,
                SUBCOMPOSITOR_BAD_PARENT,
                format!("wl_surface@{} cannot be a parent of its ancestor wl_surface@{}", parent, id),
            )
            .into());
        }
        {
            let mut surface = surface_arc.write();
            check_assignable(
                id,
                surface.assigned_role,
                &surface.role,
                RoleKind::Subsurface,
                (ErrorTarget::Subcompositor, SUBCOMPOSITOR_BAD_SURFACE),
            )?;
            surface.role = Role::Subsurface(SubsurfaceRole::new(parent));
            surface.assigned_role = RoleKind::Subsurface;
        }
        parent_arc.write().pending_children.push(id);
        if let Some(resource) = resource {
            self.resources_mut(id).subsurface = Some(resource);
        }
        wlog!(STATE, "Surface {} is a subsurface of {}", id, parent);
        self.emit(CompositorEvent::RoleAssigned {
            surface_id: id,
            role: RoleKind::Subsurface,
        });
        Ok(())
    }

    /// Whether `candidate` is `id` or one of its subsurface ancestors.
    fn is_ancestor(&self, candidate: SurfaceId, id: SurfaceId) -> bool {
        let mut current = id;
        loop {
            if current == candidate {
                return true;
            }
            let parent = self
                .surfaces
                .get(&current)
                .and_then(|s| s.read().role.as_subsurface().filter(|r| r.is_alive()).map(|r| r.parent));
            match parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// `wl_subsurface.set_position`, applied with the parent's next commit
    pub fn subsurface_set_position(&mut self, id: SurfaceId, position: Point) -> Result<()> {
        self.with_surface(id, |surface| {
            if let Some(sub) = surface.role.as_subsurface_mut() {
                sub.set_position(position);
            }
        })
    }

    /// `wl_subsurface.place_above` / `place_below`
    pub fn subsurface_place(&mut self, id: SurfaceId, sibling: SurfaceId, above: bool) -> Result<()> {
        let parent = self
            .get_surface(id)?
            .read()
            .role
            .as_subsurface()
            .filter(|r| r.is_alive())
            .map(|r| r.parent);
        let Some(parent) = parent.and_then(|p| self.surfaces.get(&p)) else {
            return Ok(());
        };
        restack(&mut parent.write().pending_children, id, sibling, above)?;
        Ok(())
    }

    /// `wl_subsurface.set_sync` / `set_desync`. Switching to desync while
    /// no ancestor is synchronized applies the cached state at once.
    pub fn subsurface_set_sync(&mut self, id: SurfaceId, sync: bool) -> Result<()> {
        let has_cache = self.with_surface(id, |surface| {
            if let Some(sub) = surface.role.as_subsurface_mut() {
                sub.sync = sync;
            }
            surface.cached.is_some()
        })?;
        if !sync && has_cache && !self.is_effectively_sync(id) {
            wlog!(STATE, "Subsurface {} desynchronized, applying cached state", id);
            self.handle_surface_commit(id, CommitOrigin::Parent)?;
        }
        Ok(())
    }

    /// `wl_subsurface.destroy`: the surface is unmapped immediately.
    pub fn destroy_subsurface(&mut self, id: SurfaceId) {
        let Some(arc) = self.surfaces.get(&id).cloned() else {
            return;
        };
        let parent = {
            let mut surface = arc.write();
            let Some(sub) = surface.role.as_subsurface_mut() else {
                return;
            };
            sub.destroy();
            sub.parent
        };
        let ctx = self.ctx.clone();
        let _guard = ctx.lock().lock();
        if let Some(p) = self.surfaces.get(&parent) {
            p.write().remove_child(id);
        }
        if let Some(res) = self.resources.get_mut(&id) {
            res.subsurface = None;
        }
        self.set_mapped(id, false);
        self.update_subtree_mapping(id);
        let damage = self.update_tree_geometry(id);
        self.damage_global(&damage);
        self.refresh_root_geometry(parent);
        self.scene_dirty = true;
        self.rebuild_scene();
    }
}
