//! Global compositor state.
//!
//! `CompositorState` holds everything the dispatch thread owns: surfaces,
//! buffers, regions, outputs and role bookkeeping. Protocol glue in
//! `core::wayland` turns requests into calls on it. Render threads never
//! touch it; they see the shared `Scene` and each output's `OutputShared`.
//!
//! The impl blocks are split by concern:
//! - `surfaces`: surface lifecycle, pending state and the commit coordinator
//! - `roles`: role assignment, configures, popups, session lock, cursor, drag
//! - `outputs`: output lifecycle, backend events, presentation
//! - `scene`: global geometry, output membership and the render scene

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use wayland_server::backend::ClientId;
use wayland_server::protocol::wl_subsurface::WlSubsurface;
use wayland_server::{DisplayHandle, Resource};

use wayland_protocols::ext::session_lock::v1::server::ext_session_lock_surface_v1::ExtSessionLockSurfaceV1;
use wayland_protocols::ext::session_lock::v1::server::ext_session_lock_v1::ExtSessionLockV1;
use wayland_protocols::wp::fractional_scale::v1::server::wp_fractional_scale_v1::WpFractionalScaleV1;
use wayland_protocols::wp::viewporter::server::wp_viewport::WpViewport;
use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_protocols_wlr::layer_shell::v1::server::zwlr_layer_surface_v1::ZwlrLayerSurfaceV1;

use crate::config::CompositorConfig;
use crate::core::backend::{Backend, BackendEvent};
use crate::core::compositor::CompositorEvent;
use crate::core::context::CompositorContext;
use crate::core::errors::{CoreError, ErrorTarget, ProtocolError, Result};
use crate::core::feedback::dmabuf::DmaFeedback;
use crate::core::output::{Output, OutputId, ScenePainter};
use crate::core::render::renderer::SharedRenderer;
use crate::core::render::scene::Scene;
use crate::core::role::{DragSession, SessionLockManager};
use crate::core::surface::{Buffer, BufferBinding, BufferId, Surface, SurfaceId};
use crate::util::geometry::Point;
use crate::util::logging::STATE;
use crate::util::region::Region;
use crate::wlog;

mod outputs;
mod roles;
mod scene;
mod surfaces;

pub use outputs::{OutputResources, WL_OUTPUT_VERSION};

/// Role objects bound to a surface, for sending events and posting errors.
#[derive(Debug, Default)]
pub struct SurfaceResources {
    pub xdg_surface: Option<XdgSurface>,
    pub toplevel: Option<XdgToplevel>,
    pub popup: Option<XdgPopup>,
    pub layer_surface: Option<ZwlrLayerSurfaceV1>,
    pub lock_surface: Option<ExtSessionLockSurfaceV1>,
    pub subsurface: Option<WlSubsurface>,
    pub viewport: Option<WpViewport>,
    pub fractional_scale: Option<WpFractionalScaleV1>,
}

/// A replaced DMA-BUF that the GPU may still sample until `output`
/// presents a frame started at or after `frame`.
#[derive(Debug)]
struct DeferredRelease {
    output: OutputId,
    frame: u64,
    binding: Arc<BufferBinding>,
}

pub struct CompositorState {
    pub ctx: CompositorContext,
    events_rx: Receiver<BackendEvent>,
    pub config: CompositorConfig,
    /// Set once the globals are registered on a display
    pub display_handle: Option<DisplayHandle>,

    // --- Client objects ---
    pub surfaces: HashMap<SurfaceId, Arc<RwLock<Surface>>>,
    next_surface_id: SurfaceId,
    pub buffers: HashMap<BufferId, Arc<Buffer>>,
    next_buffer_id: BufferId,
    /// `wl_region` contents keyed by (client, protocol id)
    pub regions: HashMap<(ClientId, u32), Region>,
    pub resources: HashMap<SurfaceId, SurfaceResources>,

    // --- Outputs and rendering ---
    pub outputs: BTreeMap<OutputId, Output>,
    next_output_id: OutputId,
    /// Bound `wl_output` resources, shared with presentation feedback sinks
    pub output_resources: OutputResources,
    pub scene: Arc<RwLock<Scene>>,
    pub renderer: SharedRenderer,
    painter: Arc<ScenePainter>,
    backend: Box<dyn Backend>,
    pub default_feedback: Option<Arc<DmaFeedback>>,
    deferred_releases: Vec<DeferredRelease>,

    // --- Roles ---
    /// Toplevels, bottom to top
    pub toplevels: Vec<SurfaceId>,
    /// Popups in creation order; the last one is the topmost
    pub popups: Vec<SurfaceId>,
    pub layers: Vec<SurfaceId>,
    pub session_lock: SessionLockManager,
    pub lock_resource: Option<ExtSessionLockV1>,
    pub cursor: Option<SurfaceId>,
    pub pointer_position: Point,
    pub drag: Option<DragSession>,

    // --- Bookkeeping ---
    pub pending_compositor_events: Vec<CompositorEvent>,
    /// Clients that were sent a protocol error and are being disconnected
    pub flagged_clients: HashSet<ClientId>,
    scene_dirty: bool,
}

impl CompositorState {
    /// Create the state, initialize `backend` and start all its outputs.
    pub fn new(config: CompositorConfig, backend: Box<dyn Backend>, renderer: SharedRenderer) -> Result<Self> {
        let (ctx, events_rx) = CompositorContext::new();
        Self::with_context(ctx, events_rx, config, backend, renderer)
    }

    pub fn with_context(
        ctx: CompositorContext,
        events_rx: Receiver<BackendEvent>,
        config: CompositorConfig,
        mut backend: Box<dyn Backend>,
        renderer: SharedRenderer,
    ) -> Result<Self> {
        backend.init(&ctx)?;
        let scene = Arc::new(RwLock::new(Scene::new()));
        let painter = Arc::new(ScenePainter::new(ctx.clone(), scene.clone(), renderer.clone()));
        let default_feedback = backend.default_feedback();

        let mut state = Self {
            ctx,
            events_rx,
            config,
            display_handle: None,
            surfaces: HashMap::new(),
            next_surface_id: 1,
            buffers: HashMap::new(),
            next_buffer_id: 1,
            regions: HashMap::new(),
            resources: HashMap::new(),
            outputs: BTreeMap::new(),
            next_output_id: 1,
            output_resources: Arc::new(Mutex::new(HashMap::new())),
            scene,
            renderer,
            painter,
            backend,
            default_feedback,
            deferred_releases: Vec::new(),
            toplevels: Vec::new(),
            popups: Vec::new(),
            layers: Vec::new(),
            session_lock: SessionLockManager::new(),
            lock_resource: None,
            cursor: None,
            pointer_position: Point::default(),
            drag: None,
            pending_compositor_events: Vec::new(),
            flagged_clients: HashSet::new(),
            scene_dirty: false,
        };

        let count = state.backend.outputs().len();
        for index in 0..count {
            state.add_output(index)?;
        }
        tracing::info!(
            "Compositor state ready: backend '{}', {} output(s)",
            state.backend.name(),
            state.outputs.len()
        );
        Ok(state)
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        &mut *self.backend
    }

    pub fn take_events(&mut self) -> Vec<CompositorEvent> {
        std::mem::take(&mut self.pending_compositor_events)
    }

    pub(crate) fn emit(&mut self, event: CompositorEvent) {
        self.pending_compositor_events.push(event);
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Arc<RwLock<Surface>>> {
        self.surfaces.get(&id)
    }

    pub(crate) fn get_surface(&self, id: SurfaceId) -> Result<Arc<RwLock<Surface>>> {
        self.surfaces.get(&id).cloned().ok_or(CoreError::InvalidSurfaceId(id))
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Arc<Buffer>> {
        self.buffers.get(&id)
    }

    pub fn add_buffer(&mut self, make: impl FnOnce(BufferId) -> Buffer) -> Arc<Buffer> {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        let buffer = Arc::new(make(id));
        self.buffers.insert(id, buffer.clone());
        buffer
    }

    /// `wl_buffer.destroy`: surfaces holding it keep their binding.
    pub fn remove_buffer(&mut self, id: BufferId) {
        if self.buffers.remove(&id).is_some() {
            wlog!(STATE, "Buffer {} destroyed", id);
        }
    }

    pub fn resources_mut(&mut self, surface: SurfaceId) -> &mut SurfaceResources {
        self.resources.entry(surface).or_default()
    }

    // =========================================================================
    // Protocol errors
    // =========================================================================

    /// Post `err` on the role object of `surface` it names and flag the
    /// owning client. Returns false when no matching resource is known;
    /// the caller then posts it on the resource it holds.
    pub fn post_surface_error(&mut self, surface: SurfaceId, err: &ProtocolError) -> bool {
        let client = self
            .surfaces
            .get(&surface)
            .and_then(|s| s.read().client_id.clone());
        let posted = self.post_on_surface_resource(surface, err);
        if let Some(client) = client {
            self.flag_client(client, err.clone());
        }
        posted
    }

    fn post_on_surface_resource(&self, surface: SurfaceId, err: &ProtocolError) -> bool {
        fn post<R: Resource>(resource: Option<&R>, err: &ProtocolError) -> bool {
            match resource {
                Some(r) if r.is_alive() => {
                    r.post_error(err.code, err.message.clone());
                    true
                }
                _ => false,
            }
        }
        let res = self.resources.get(&surface);
        match err.target {
            ErrorTarget::Surface => {
                let resource = self.surfaces.get(&surface).and_then(|s| s.read().resource.clone());
                post(resource.as_ref(), err)
            }
            ErrorTarget::XdgSurface => post(res.and_then(|r| r.xdg_surface.as_ref()), err),
            ErrorTarget::XdgToplevel => post(res.and_then(|r| r.toplevel.as_ref()), err),
            ErrorTarget::XdgPopup => post(res.and_then(|r| r.popup.as_ref()), err),
            ErrorTarget::LayerSurface => post(res.and_then(|r| r.layer_surface.as_ref()), err),
            ErrorTarget::SessionLockSurface => post(res.and_then(|r| r.lock_surface.as_ref()), err),
            ErrorTarget::Subsurface => post(res.and_then(|r| r.subsurface.as_ref()), err),
            ErrorTarget::Viewport => post(res.and_then(|r| r.viewport.as_ref()), err),
            _ => false,
        }
    }

    pub fn flag_client(&mut self, client: ClientId, err: ProtocolError) {
        tracing::warn!("Protocol error for client {:?}: {}", client, err);
        if self.flagged_clients.insert(client.clone()) {
            self.emit(CompositorEvent::ClientFlagged { client_id: client, error: err });
        }
    }

    /// Forget everything a disconnected client left behind.
    pub fn client_disconnected(&mut self, client: &ClientId) {
        let owned: Vec<SurfaceId> = self
            .surfaces
            .iter()
            .filter(|(_, s)| s.read().client_id.as_ref() == Some(client))
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            self.destroy_surface(id);
        }
        self.regions.retain(|(c, _), _| c != client);
        self.buffers.retain(|_, b| {
            b.resource
                .as_ref()
                .and_then(|r| r.client())
                .map(|c| &c.id() != client)
                .unwrap_or(true)
        });
        if self
            .lock_resource
            .as_ref()
            .and_then(|r| r.client())
            .is_some_and(|c| &c.id() == client)
        {
            // A dead lock client leaves the session locked
            self.lock_resource = None;
        }
        self.flagged_clients.remove(client);
        wlog!(STATE, "Cleaned up client {:?}", client);
    }

    /// Process backend events and deferred work. Call once per loop
    /// iteration on the dispatch thread.
    pub fn dispatch_backend_events(&mut self) -> usize {
        let events: Vec<BackendEvent> = self.events_rx.try_iter().collect();
        let count = events.len();
        for event in events {
            match event {
                BackendEvent::FramePresented { output, frame, info } => {
                    self.handle_frame_presented(output, frame, &info);
                }
                BackendEvent::FrameDiscarded { output, frame } => {
                    self.handle_frame_discarded(output, frame);
                }
                BackendEvent::OutputUnplugged { output } => {
                    if let Err(e) = self.remove_output(output) {
                        tracing::warn!("Unplug of output {}: {}", output, e);
                    }
                }
            }
        }
        self.ctx.cleanup().run_current(&mut **self.renderer.lock());
        self.check_drag_timeout(std::time::Instant::now());
        if self.scene_dirty {
            self.rebuild_scene();
        }
        count
    }
}

impl std::fmt::Debug for CompositorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositorState")
            .field("surfaces", &self.surfaces.len())
            .field("buffers", &self.buffers.len())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("toplevels", &self.toplevels)
            .field("popups", &self.popups)
            .field("layers", &self.layers)
            .field("lock", &self.session_lock.state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::backend::{OffscreenBackend, RunningOutputs};
    use crate::core::render::renderer::{HeadlessRenderer, WL_SHM_FORMAT_ARGB8888};
    use crate::core::surface::shm::ShmPool;
    use crate::core::surface::{BufferType, ShmBufferData};

    /// State on a manual offscreen backend with one 640x480 output.
    pub fn state() -> (CompositorState, RunningOutputs) {
        let config = CompositorConfig {
            output_width: 640,
            output_height: 480,
            image_count: 2,
            ..Default::default()
        };
        let backend = OffscreenBackend::manual(config.clone());
        let running = backend.running_outputs();
        let state = CompositorState::new(config, Box::new(backend), HeadlessRenderer::shared()).unwrap();
        (state, running)
    }

    /// Pool backed by an anonymous memfd of `size` zeroed bytes.
    pub fn pool(size: usize) -> Arc<ShmPool> {
        use std::os::unix::io::FromRawFd;
        // SAFETY: memfd_create with a static NUL terminated name.
        let fd = unsafe { libc::memfd_create(b"vitrine-test\0".as_ptr() as *const libc::c_char, 0) };
        assert!(fd >= 0);
        // SAFETY: fd was just created and is owned by nobody else.
        let fd = unsafe { std::os::unix::io::OwnedFd::from_raw_fd(fd) };
        use std::os::unix::io::AsRawFd;
        // SAFETY: valid fd.
        assert_eq!(unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) }, 0);
        Arc::new(ShmPool::new(fd, size))
    }

    pub fn shm_buffer(state: &mut CompositorState, width: i32, height: i32) -> Arc<Buffer> {
        let pool = pool((width * height * 4) as usize);
        state.add_buffer(|id| {
            Buffer::new(
                id,
                BufferType::Shm(ShmBufferData {
                    width,
                    height,
                    stride: width * 4,
                    format: WL_SHM_FORMAT_ARGB8888,
                    offset: 0,
                    pool,
                }),
                None,
            )
        })
    }
}
