//! Output lifecycle, layer arrangement and frame completion.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::Resource;

use crate::core::compositor::CompositorEvent;
use crate::core::errors::{CoreError, Result};
use crate::core::feedback::presentation::PresentationInfo;
use crate::core::feedback::screencopy::{CopyState, ScreencopyRequest};
use crate::core::output::{Output, OutputId, OutputShared};
use crate::core::role::RoleHandler;
use crate::core::surface::SurfaceId;
use crate::core::wayland::wayland::output::send_output_info;
use crate::util::geometry::Point;
use crate::util::logging::OUTPUT;
use crate::util::region::Region;
use crate::{wlog, wtrace};

use super::CompositorState;

/// `wl_output` resources bound by clients, per output
pub type OutputResources = Arc<Mutex<HashMap<OutputId, Vec<WlOutput>>>>;

/// `wl_output` version advertised
pub const WL_OUTPUT_VERSION: u32 = 4;

/// Split off the capture requests that reached a terminal state by `frame`.
fn take_settled(requests: &Mutex<Vec<ScreencopyRequest>>, frame: u64) -> Vec<ScreencopyRequest> {
    let mut requests = requests.lock();
    let (settled, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *requests)
        .into_iter()
        .partition(|r| r.is_settled_by(frame));
    *requests = waiting;
    settled
}

impl CompositorState {
    /// Start the backend's `index`th output, place it right of the others
    /// and advertise it.
    pub fn add_output(&mut self, index: usize) -> Result<OutputId> {
        let info = self
            .backend
            .outputs()
            .get(index)
            .cloned()
            .ok_or_else(|| CoreError::backend_error(format!("no output at index {}", index)))?;
        let id = self.next_output_id;
        self.next_output_id += 1;

        let x = self.outputs.values().map(|o| o.rect().right()).max().unwrap_or(0);
        let geometry = Output::initial_geometry(&info, Point::new(x, 0));
        let refresh_ns = info.mode().map(|m| m.refresh_ns()).unwrap_or(0);
        let shared = Arc::new(OutputShared::new(id, geometry, self.config.image_count, refresh_ns));
        let backend_output = self.backend.start_output(index, shared.clone(), self.painter.clone())?;

        let mut output = Output::new(id, info, shared, backend_output);
        output.damage_all();
        if let Some(dh) = &self.display_handle {
            output.global = Some(dh.create_global::<CompositorState, WlOutput, OutputId>(WL_OUTPUT_VERSION, id));
        }
        let name = output.info.name.clone();
        tracing::info!("Output {} '{}' added at {:?}", id, name, output.rect());
        output.schedule_repaint();
        self.outputs.insert(id, output);
        self.emit(CompositorEvent::OutputAdded { output_id: id, name });

        self.refresh_all_geometry();
        self.scene_dirty = true;
        Ok(id)
    }

    /// Tear an output down: surfaces leave it, its pending feedback is
    /// discarded and its render loop is stopped.
    pub fn remove_output(&mut self, id: OutputId) -> Result<()> {
        if !self.outputs.contains_key(&id) {
            return Err(CoreError::InvalidOutputId(id));
        }
        let ctx = self.ctx.clone();
        let _guard = ctx.lock().lock();
        self.backend.stop_output(id);

        // Leave while the wl_output resources are still known
        let listing: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.read().outputs.contains(&id))
            .map(|(sid, _)| *sid)
            .collect();
        for sid in listing {
            let remaining = self
                .surfaces
                .get(&sid)
                .map(|s| s.read().outputs.iter().copied().filter(|o| *o != id).collect())
                .unwrap_or_default();
            self.set_surface_outputs(sid, remaining);
        }

        let Some(output) = self.outputs.remove(&id) else {
            return Err(CoreError::InvalidOutputId(id));
        };
        if let (Some(dh), Some(global)) = (&self.display_handle, output.global.clone()) {
            dh.remove_global::<CompositorState>(global);
        }
        self.output_resources.lock().remove(&id);

        let batch = output.shared.frames.lock().drain();
        let now = self.ctx.clock().now_ms();
        for callback in batch.callbacks {
            callback.done(now);
        }
        for feedback in batch.feedbacks {
            feedback.discard();
        }
        for request in std::mem::take(&mut *output.shared.screencopy.lock()) {
            request.fail();
        }
        self.release_deferred(id, u64::MAX);

        self.close_layers_on(id);
        self.session_lock.remove_output(id);
        self.check_lock_granted();

        tracing::info!("Output {} '{}' removed", id, output.info.name);
        drop(output);
        self.emit(CompositorEvent::OutputRemoved { output_id: id });
        self.refresh_all_geometry();
        self.scene_dirty = true;
        self.rebuild_scene();
        Ok(())
    }

    /// Switch an output to another of its modes and tell clients.
    pub fn set_output_mode(&mut self, id: OutputId, mode: usize) -> Result<()> {
        let output = self.outputs.get_mut(&id).ok_or(CoreError::InvalidOutputId(id))?;
        output.set_mode(mode)?;
        output.damage_all();
        if let Some(bound) = self.output_resources.lock().get(&id) {
            for wl_output in bound.iter().filter(|o| o.is_alive()) {
                send_output_info(wl_output, output);
            }
        }
        self.arrange_layers(id, None);
        self.reconfigure_lock_surface(id);
        self.refresh_all_geometry();
        self.scene_dirty = true;
        Ok(())
    }

    /// Recompute geometry for every surface tree.
    pub(crate) fn refresh_all_geometry(&mut self) {
        let roots: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, s)| !s.read().role.as_subsurface().is_some_and(|r| r.is_alive()))
            .map(|(id, _)| *id)
            .collect();
        let mut damage = Region::new();
        for id in roots {
            damage.union(&self.update_tree_geometry(id));
        }
        self.damage_global(&damage);
    }

    // =========================================================================
    // Frame completion
    // =========================================================================

    /// Frame `frame` of `output` reached the screen.
    pub(crate) fn handle_frame_presented(&mut self, output: OutputId, frame: u64, info: &PresentationInfo) {
        let Some(out) = self.outputs.get(&output) else {
            wlog!(OUTPUT, "Presentation for unknown output {}", output);
            return;
        };
        let batch = out.shared.frames.lock().take_presented(frame);
        let settled = take_settled(&out.shared.screencopy, frame);
        wtrace!(
            OUTPUT,
            "Output {} presented frame {}: {} callback(s), {} feedback(s)",
            output,
            frame,
            batch.callbacks.len(),
            batch.feedbacks.len()
        );

        let time_ms = info.time_ms();
        for callback in batch.callbacks {
            callback.done(time_ms);
        }
        for feedback in batch.feedbacks {
            feedback.present(output, info);
        }
        for request in settled {
            match request.state() {
                CopyState::Copied { .. } => request.complete(info),
                _ => request.fail(),
            }
        }
        self.release_deferred(output, frame);
    }

    /// Frame `frame` of `output` was rendered but never shown.
    pub(crate) fn handle_frame_discarded(&mut self, output: OutputId, frame: u64) {
        let Some(out) = self.outputs.get(&output) else {
            return;
        };
        let feedbacks = out.shared.frames.lock().take_discarded(frame);
        for feedback in feedbacks {
            feedback.discard();
        }
        for request in take_settled(&out.shared.screencopy, frame) {
            request.fail();
        }
        // Callbacks went back to the queue and need another frame
        if out.shared.frames.lock().has_queued() {
            out.schedule_repaint();
        }
        self.release_deferred(output, frame);
    }

    /// Release DMA-BUFs whose last use was a frame of `output` up to `frame`.
    fn release_deferred(&mut self, output: OutputId, frame: u64) {
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.deferred_releases)
            .into_iter()
            .partition(|d| d.output == output && frame >= d.frame);
        self.deferred_releases = waiting;
        for deferred in done {
            wlog!(OUTPUT, "Releasing buffer {} after frame {}", deferred.binding.buffer.id, frame);
            deferred.binding.buffer.release();
        }
    }

    // =========================================================================
    // Layer arrangement
    // =========================================================================

    /// Recompute the exclusive zones and placement of the layer surfaces
    /// on `output`. Surfaces whose size changed get a new configure;
    /// `force` gets one regardless (its initial configure).
    pub(crate) fn arrange_layers(&mut self, output: OutputId, force: Option<SurfaceId>) {
        let Some(output_rect) = self.outputs.get(&output).map(|o| o.rect()) else {
            return;
        };
        let on_output: Vec<SurfaceId> = self
            .layers
            .iter()
            .copied()
            .filter(|id| {
                self.surfaces
                    .get(id)
                    .is_some_and(|s| s.read().role.as_layer().is_some_and(|l| l.output == Some(output)))
            })
            .collect();

        let zones = on_output
            .iter()
            .filter_map(|id| {
                let surface = self.surfaces.get(id)?.read();
                surface
                    .role
                    .as_layer()
                    .filter(|l| l.is_mapped())
                    .map(|l| l.exclusive_zone(*id))
            })
            .collect();
        let available = match self.outputs.get_mut(&output) {
            Some(out) => {
                out.update_exclusive_zones(zones);
                out.available_area()
            }
            None => return,
        };

        let mut damage = Region::new();
        for id in on_output {
            let Some(arc) = self.surfaces.get(&id).cloned() else {
                continue;
            };
            let configure = {
                let mut surface = arc.write();
                let Some(layer) = surface.role.as_layer_mut() else {
                    continue;
                };
                if layer.closed || !layer.is_alive() {
                    continue;
                }
                let size = layer.arrange(output_rect, available).size();
                let stale = layer.configures.latest().is_some_and(|latest| *latest != size);
                (force == Some(id) || stale).then_some(size)
            };
            if let Some(size) = configure {
                self.send_layer_configure(id, size);
            }
            damage.union(&self.update_tree_geometry(id));
        }
        self.damage_global(&damage);
    }

    /// The output of these layer surfaces is gone: send `closed` and
    /// unmap them.
    fn close_layers_on(&mut self, output: OutputId) {
        let closing: Vec<SurfaceId> = self
            .layers
            .iter()
            .copied()
            .filter(|id| {
                self.surfaces
                    .get(id)
                    .is_some_and(|s| s.read().role.as_layer().is_some_and(|l| l.output == Some(output)))
            })
            .collect();
        for id in closing {
            self.close_layer(id);
        }
    }
}
