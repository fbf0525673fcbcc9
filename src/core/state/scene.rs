//! Global geometry, output membership and the render scene.
//!
//! Surfaces are positioned from their role: roots get a global origin,
//! subsurfaces and popups follow their parent. Every geometry update
//! recomputes the tree below a root, reports the damage of surfaces that
//! moved or changed visibility and sends `enter`/`leave` as outputs change.

use std::sync::Arc;

use wayland_server::Resource;

use crate::core::output::OutputId;
use crate::core::render::scene::Scene;
use crate::core::role::layer::Layer;
use crate::core::role::{Role, RoleHandler};
use crate::core::surface::SurfaceId;
use crate::util::geometry::{Point, Rect};
use crate::util::logging::STATE;
use crate::util::region::Region;
use crate::wlog;

use super::CompositorState;

/// How a surface's origin is derived.
enum Placement {
    Absolute(Point),
    /// Subsurface: parent origin plus position
    Relative(SurfaceId, Point),
    /// Popup: parent window geometry plus placement
    Popup(SurfaceId, Point),
}

impl CompositorState {
    /// Top of the subsurface tree `id` belongs to.
    pub fn root_of(&self, id: SurfaceId) -> SurfaceId {
        let mut current = id;
        while let Some(parent) = self
            .surfaces
            .get(&current)
            .and_then(|s| s.read().role.as_subsurface().filter(|r| r.is_alive()).map(|r| r.parent))
        {
            current = parent;
        }
        current
    }

    /// Surface-local bounds of `id` united with its synchronized subsurfaces
    /// that have content. None when there is nothing to show.
    pub fn subtree_bounds(&self, id: SurfaceId) -> Option<Rect> {
        let (size, children) = {
            let surface = self.surfaces.get(&id)?.read();
            (surface.current.size(), surface.child_ids().collect::<Vec<_>>())
        };
        let mut bounds = (!size.is_empty()).then(|| Rect::from_loc_size(Point::default(), size));
        for child in children {
            let offset = self.surfaces.get(&child).and_then(|c| {
                let c = c.read();
                match c.role.as_subsurface() {
                    Some(sub) if sub.is_alive() && sub.sync && c.current.has_buffer() => {
                        Some(sub.position + c.commit_offset)
                    }
                    _ => None,
                }
            });
            let Some(offset) = offset else {
                continue;
            };
            if let Some(rect) = self.subtree_bounds(child) {
                let rect = rect.translate(offset.x, offset.y);
                bounds = Some(match bounds {
                    Some(b) => b.merge(&rect),
                    None => rect,
                });
            }
        }
        bounds
    }

    pub(super) fn window_geometry_origin(&self, id: SurfaceId) -> Point {
        self.surfaces
            .get(&id)
            .map(|s| match &s.read().role {
                Role::Toplevel(t) => t.window_geometry().loc(),
                Role::Popup(p) => p.window_geometry().loc(),
                _ => Point::default(),
            })
            .unwrap_or_default()
    }

    /// Global origin of the surface's buffer content.
    pub fn global_origin(&self, id: SurfaceId) -> Point {
        let Some(arc) = self.surfaces.get(&id) else {
            return Point::default();
        };
        let (offset, placement) = {
            let surface = arc.read();
            let placement = match &surface.role {
                Role::Subsurface(sub) if sub.is_alive() => Placement::Relative(sub.parent, sub.position),
                Role::Toplevel(t) => Placement::Absolute(surface.position - t.window_geometry().loc()),
                Role::Popup(p) => {
                    let rel = p.geometry.loc() - p.window_geometry().loc();
                    match p.parent {
                        Some(parent) => Placement::Popup(parent, rel),
                        None => Placement::Absolute(surface.position + rel),
                    }
                }
                Role::Layer(l) => Placement::Absolute(l.geometry.loc()),
                Role::SessionLock(l) => Placement::Absolute(
                    self.outputs
                        .get(&l.output)
                        .map(|o| o.rect().loc())
                        .unwrap_or_default(),
                ),
                // Soft roles follow the pointer and fold offsets into
                // their own state
                Role::Cursor(c) => return self.pointer_position - c.hotspot,
                Role::DndIcon(d) => return self.pointer_position + d.position,
                _ => Placement::Absolute(surface.position),
            };
            (surface.commit_offset, placement)
        };
        let base = match placement {
            Placement::Absolute(origin) => origin,
            Placement::Relative(parent, position) => self.global_origin(parent) + position,
            Placement::Popup(parent, rel) => self.global_origin(parent) + self.window_geometry_origin(parent) + rel,
        };
        base + offset
    }

    /// Recompute global rects and outputs for `root`, its subsurfaces and
    /// the popups anchored to them. Returns the damage of everything that
    /// moved, resized or changed visibility.
    pub(crate) fn update_tree_geometry(&mut self, root: SurfaceId) -> Region {
        let mut damage = Region::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(arc) = self.surfaces.get(&id).cloned() else {
                continue;
            };
            let origin = self.global_origin(id);
            let (visible, children) = {
                let mut surface = arc.write();
                let rect = Rect::from_loc_size(origin, surface.current.size());
                surface.global_rect = rect;
                let visible = surface.mapped.then_some(rect);
                if visible != surface.visible_rect {
                    damage.add(surface.visible_rect.unwrap_or_default());
                    damage.add(visible.unwrap_or_default());
                    surface.visible_rect = visible;
                    self.scene_dirty = true;
                }
                (visible, surface.child_ids().collect::<Vec<_>>())
            };
            let outputs = match visible {
                Some(rect) => self
                    .outputs
                    .values()
                    .filter(|o| o.rect().intersects(&rect))
                    .map(|o| o.id)
                    .collect(),
                None => Vec::new(),
            };
            self.set_surface_outputs(id, outputs);
            stack.extend(children);
            stack.extend(
                self.popups
                    .iter()
                    .copied()
                    .filter(|p| self.surfaces.get(p).is_some_and(|s| s.read().role.parent() == Some(id))),
            );
        }
        damage
    }

    /// Replace the outputs a surface is on, sending `enter`/`leave` to the
    /// `wl_output`s its client bound.
    pub(crate) fn set_surface_outputs(&mut self, id: SurfaceId, outputs: Vec<OutputId>) {
        let Some(arc) = self.surfaces.get(&id).cloned() else {
            return;
        };
        let (entered, left, resource) = {
            let mut surface = arc.write();
            if surface.outputs == outputs {
                return;
            }
            let entered: Vec<OutputId> = outputs.iter().filter(|o| !surface.outputs.contains(o)).copied().collect();
            let left: Vec<OutputId> = surface.outputs.iter().filter(|o| !outputs.contains(o)).copied().collect();
            surface.outputs = outputs;
            (entered, left, surface.resource.clone())
        };

        if let Some(resource) = resource.filter(|r| r.is_alive()) {
            let client = resource.client().map(|c| c.id());
            let bound = self.output_resources.lock();
            for (list, enter) in [(&entered, true), (&left, false)] {
                for output in list {
                    let matching = bound
                        .get(output)
                        .into_iter()
                        .flatten()
                        .filter(|o| o.is_alive() && o.client().map(|c| c.id()) == client);
                    for wl_output in matching {
                        if enter {
                            resource.enter(wl_output);
                        } else {
                            resource.leave(wl_output);
                        }
                    }
                }
            }
        }
        if !entered.is_empty() {
            wlog!(STATE, "Surface {} entered outputs {:?}", id, entered);
            let waiting = std::mem::take(&mut arc.write().current.frame_callbacks);
            self.queue_frame_feedback(id, waiting, Vec::new());
        }
        self.update_preferred_scale(id);
    }

    /// The preferred scale is the largest scale of the outputs showing the
    /// surface. It is kept while the surface is on no output.
    fn update_preferred_scale(&mut self, id: SurfaceId) {
        let Some(arc) = self.surfaces.get(&id) else {
            return;
        };
        let scale = {
            let surface = arc.read();
            surface
                .outputs
                .iter()
                .filter_map(|o| self.outputs.get(o))
                .map(|o| o.geometry().scale)
                .max()
        };
        let Some(scale) = scale else {
            return;
        };
        let preferred = scale.max(1) as u32 * 120;
        let resource = {
            let mut surface = arc.write();
            if surface.preferred_scale == preferred {
                return;
            }
            surface.preferred_scale = preferred;
            surface.resource.clone()
        };
        if let Some(resource) = resource.filter(|r| r.is_alive() && r.version() >= 6) {
            resource.preferred_buffer_scale(scale);
        }
        if let Some(fractional) = self
            .resources
            .get(&id)
            .and_then(|r| r.fractional_scale.as_ref())
            .filter(|f| f.is_alive())
        {
            fractional.preferred_scale(preferred);
        }
    }

    /// Add global damage to the outputs it touches and schedule them.
    pub(crate) fn damage_global(&self, damage: &Region) {
        if damage.is_empty() {
            return;
        }
        for output in self.outputs.values() {
            if damage.intersects_rect(&output.rect()) {
                output.add_damage(damage);
                output.schedule_repaint();
            }
        }
    }

    fn layers_in(&self, layer: Layer) -> Vec<SurfaceId> {
        self.layers
            .iter()
            .copied()
            .filter(|id| {
                self.surfaces
                    .get(id)
                    .is_some_and(|s| s.read().role.as_layer().is_some_and(|l| l.current.layer == layer))
            })
            .collect()
    }

    /// Add `id` and its subsurfaces, in stacking order, under `parent`.
    fn add_tree(&self, scene: &mut Scene, parent: u32, id: SurfaceId) {
        let Some(arc) = self.surfaces.get(&id) else {
            return;
        };
        let (rect, order) = {
            let surface = arc.read();
            (surface.visible_rect, surface.children.clone())
        };
        let Some(rect) = rect else {
            return;
        };
        for entry in order {
            if entry == id {
                scene.add_surface_leaf(parent, id, Arc::downgrade(arc), rect);
            } else {
                self.add_tree(scene, parent, entry);
            }
        }
    }

    /// Rebuild the shared scene, bottom to top: background and bottom
    /// layers, toplevels, top layers, popups, overlays, then lock surfaces,
    /// the drag icon and the cursor. A locked session shows only the last
    /// three.
    pub fn rebuild_scene(&mut self) {
        let ctx = self.ctx.clone();
        let _guard = ctx.lock().lock();
        self.scene_dirty = false;

        let mut scene = Scene::new();
        let root = scene.root_id.unwrap_or_default();
        let band = |scene: &mut Scene, ids: &[SurfaceId]| {
            let node = scene.add_container(root, Point::default());
            for id in ids {
                self.add_tree(scene, node, *id);
            }
        };

        if !self.session_lock.locked() {
            band(&mut scene, &self.layers_in(Layer::Background));
            band(&mut scene, &self.layers_in(Layer::Bottom));
            band(&mut scene, &self.toplevels);
            band(&mut scene, &self.layers_in(Layer::Top));
            band(&mut scene, &self.popups);
            band(&mut scene, &self.layers_in(Layer::Overlay));
        }
        let lock_surfaces: Vec<SurfaceId> = self.session_lock.surfaces().collect();
        band(&mut scene, &lock_surfaces);
        let icon: Vec<SurfaceId> = self.drag.as_ref().and_then(|d| d.icon).into_iter().collect();
        band(&mut scene, &icon);
        let cursor: Vec<SurfaceId> = self.cursor.into_iter().collect();
        band(&mut scene, &cursor);

        let count = scene.surface_count();
        *self.scene.write() = scene;
        wlog!(STATE, "Scene rebuilt with {} surface(s)", count);
    }
}
