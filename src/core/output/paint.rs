//! Paints the shared scene into one output frame.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::backend::FrameTarget;
use crate::core::context::CompositorContext;
use crate::core::render::renderer::{DrawOp, RenderError, RenderTarget, Renderer, SharedRenderer};
use crate::core::render::scene::Scene;
use crate::util::geometry::{Point, Rect};
use crate::util::logging::RENDER;
use crate::wtrace;

use super::damage::FrameDamage;
use super::{OutputGeometry, OutputId, OutputShared};

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Result of one painted frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub output: OutputId,
    pub frame: u64,
    pub image: usize,
    pub damage: FrameDamage,
    pub surfaces_drawn: usize,
}

pub struct ScenePainter {
    ctx: CompositorContext,
    scene: Arc<RwLock<Scene>>,
    renderer: SharedRenderer,
}

impl ScenePainter {
    pub fn new(ctx: CompositorContext, scene: Arc<RwLock<Scene>>, renderer: SharedRenderer) -> Self {
        Self { ctx, scene, renderer }
    }

    pub fn renderer(&self) -> &SharedRenderer {
        &self.renderer
    }

    /// Paint the pending frame of `output`, if any.
    ///
    /// Returns `Ok(None)` when no repaint was pending. On error the frame
    /// has been started; the caller reports it as discarded.
    pub fn paint(&self, output: &OutputShared, target: &dyn FrameTarget) -> Result<Option<FrameReport>, RenderError> {
        let Some(frame) = output.scheduler.begin_frame() else {
            return Ok(None);
        };
        let _guard = self.ctx.lock().lock();

        let geometry = output.geometry();
        let image = target.current_image();
        let age = target.image_age(image);
        let damage = output.damage.lock().take_frame(age, geometry.local_rect());
        output.frames.lock().begin_frame(frame);

        let mut renderer = self.renderer.lock();
        let result = self.draw(&mut **renderer, output, &geometry, frame, image, &damage);
        self.ctx.cleanup().run_current(&mut **renderer);
        let surfaces_drawn = result?;

        if target.has_buffer_damage_support() {
            target.set_damage(&damage.repaint);
        }
        wtrace!(
            RENDER,
            "Output {} frame {} image {} (age {}): {} surfaces, repaint area {}",
            output.id,
            frame,
            image,
            age,
            surfaces_drawn,
            damage.repaint.area()
        );
        Ok(Some(FrameReport {
            output: output.id,
            frame,
            image,
            damage,
            surfaces_drawn,
        }))
    }

    fn draw(
        &self,
        renderer: &mut dyn Renderer,
        output: &OutputShared,
        geometry: &OutputGeometry,
        frame: u64,
        image: usize,
        damage: &FrameDamage,
    ) -> Result<usize, RenderError> {
        renderer.begin_frame(&RenderTarget {
            output: output.id,
            size: geometry.mode_size,
            scale: geometry.scale,
            image,
        })?;

        let mut drawn = 0;
        if !damage.repaint.is_empty() {
            renderer.clear(&damage.repaint, CLEAR_COLOR);
            let output_rect = geometry.rect();
            let entries = self.scene.read().flatten();
            for entry in entries {
                if !entry.rect.intersects(&output_rect) {
                    continue;
                }
                let surface = entry.surface.read();
                if !surface.mapped {
                    continue;
                }
                let Some(binding) = &surface.current.buffer else {
                    continue;
                };
                let dst = geometry.to_local_physical(entry.rect);
                let src = surface.current.geometry.src_in_buffer();
                if dst.is_empty() || src.is_empty() {
                    // Unresolvable geometry: redraw everything next frame
                    output.damage.lock().damage_all();
                    continue;
                }
                let clip = damage.repaint.intersect_rect(&dst);
                if clip.is_empty() {
                    continue;
                }
                let surface_rect = Rect::from_loc_size(Point::default(), entry.rect.size());
                let opaque = surface
                    .current
                    .opaque_region
                    .as_ref()
                    .is_some_and(|r| r.intersect_rect(&surface_rect).area() == surface_rect.width as i64 * surface_rect.height as i64);
                renderer.draw_texture(&DrawOp {
                    texture: binding.texture,
                    src,
                    dst,
                    transform: surface.current.transform,
                    clip,
                    opaque,
                });
                drawn += 1;
            }
        }

        let mut copies = output.screencopy.lock();
        for request in copies.iter_mut() {
            if !request.wants_frame(&damage.new) {
                continue;
            }
            let Some(buffer) = request.buffer().cloned() else {
                continue;
            };
            match renderer.copy_output(request.region, &buffer.buffer_type) {
                Ok(()) => request.mark_copied(frame, &damage.new),
                Err(e) => {
                    tracing::warn!("Screencopy on output {} failed: {}", output.id, e);
                    request.mark_failed();
                }
            }
        }
        drop(copies);

        renderer.finish_frame()?;
        Ok(drawn)
    }
}

impl std::fmt::Debug for ScenePainter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenePainter").finish_non_exhaustive()
    }
}
