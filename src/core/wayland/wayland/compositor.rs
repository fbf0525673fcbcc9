//! wl_compositor, wl_surface, wl_region and wl_callback.
//!
//! Surface requests only touch pending state; `commit` hands the surface
//! to the commit coordinator.

use wayland_server::{
    protocol::{wl_buffer::WlBuffer, wl_callback::WlCallback, wl_compositor, wl_region, wl_surface},
    Dispatch, DisplayHandle, GlobalDispatch, Resource, WEnum,
};

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::feedback::frame_callback::{CallbackSink, FrameCallback};
use crate::core::state::CompositorState;
use crate::core::surface::{BufferId, SurfaceId};
use crate::core::wayland::report;
use crate::util::geometry::{Point, Rect};
use crate::util::logging::COMPOSITOR;
use crate::util::region::Region;
use crate::{wlog, wtrace};

/// `wl_surface.error.defunct_role_object`
const DEFUNCT_ROLE_OBJECT: u32 = 4;

/// Delivers `wl_callback.done`.
struct CallbackResource(WlCallback);

impl CallbackSink for CallbackResource {
    fn done(&self, time_ms: u32) {
        if self.0.is_alive() {
            self.0.done(time_ms);
        }
    }
}

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        client: &wayland_server::Client,
        resource: wayland_server::New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let compositor = data_init.init(resource, ());
        wlog!(COMPOSITOR, "Bound wl_compositor v{} for client {:?}", compositor.version(), client.id());
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for CompositorState {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        _resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let surface_id = state.create_surface(Some(client.id()), None);
                let surface = data_init.init(id, surface_id);
                if let Some(s) = state.surface(surface_id) {
                    s.write().resource = Some(surface);
                }
            }
            wl_compositor::Request::CreateRegion { id } => {
                let region: wl_region::WlRegion = data_init.init(id, ());
                state.create_region(client.id(), region.id().protocol_id());
            }
            _ => {}
        }
    }
}

/// Snapshot of the `wl_region` a client passed, None when it passed null.
fn region_of(state: &CompositorState, client: &wayland_server::Client, region: Option<wl_region::WlRegion>) -> Option<Region> {
    region.map(|r| state.region(&client.id(), r.id().protocol_id()).unwrap_or_default())
}

impl Dispatch<wl_surface::WlSurface, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = *data;
        let result = match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                let buffer = buffer.and_then(|b| {
                    let found = b.data::<BufferId>().and_then(|bid| state.buffer(*bid)).cloned();
                    if found.is_none() {
                        tracing::warn!("Surface {} attach: {} is not a known buffer", id, b.id());
                    }
                    found
                });
                wtrace!(COMPOSITOR, "Surface {} attach {:?} at ({}, {})", id, buffer.as_ref().map(|b| b.id), x, y);
                state.surface_attach(id, buffer, Point::new(x, y), resource.version())
            }
            wl_surface::Request::Damage { x, y, width, height } => {
                state.surface_damage(id, Rect::new(x, y, width, height))
            }
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                state.surface_damage_buffer(id, Rect::new(x, y, width, height))
            }
            wl_surface::Request::Frame { callback } => {
                let callback: WlCallback = data_init.init(callback, ());
                state.surface_frame(id, FrameCallback::new(CallbackResource(callback)))
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                let region = region_of(state, client, region);
                state.surface_set_opaque_region(id, region)
            }
            wl_surface::Request::SetInputRegion { region } => {
                let region = region_of(state, client, region);
                state.surface_set_input_region(id, region)
            }
            wl_surface::Request::SetBufferTransform { transform } => {
                let raw = match transform {
                    WEnum::Value(t) => t.into(),
                    WEnum::Unknown(raw) => raw,
                };
                state.surface_set_buffer_transform(id, raw)
            }
            wl_surface::Request::SetBufferScale { scale } => state.surface_set_buffer_scale(id, scale),
            wl_surface::Request::Offset { x, y } => state.surface_offset(id, Point::new(x, y)),
            wl_surface::Request::Commit => state.commit_surface(id),
            wl_surface::Request::Destroy => {
                if state.has_live_role_object(id) {
                    Err(ProtocolError::new(
                        ErrorTarget::Surface,
                        DEFUNCT_ROLE_OBJECT,
                        format!("wl_surface@{} destroyed before its role object", id),
                    )
                    .into())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        };
        report(state, Some(id), resource, result);
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &wl_surface::WlSurface,
        data: &SurfaceId,
    ) {
        state.destroy_surface(*data);
    }
}

impl Dispatch<wl_region::WlRegion, ()> for CompositorState {
    fn request(
        state: &mut Self,
        client: &wayland_server::Client,
        resource: &wl_region::WlRegion,
        request: wl_region::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let region_id = resource.id().protocol_id();
        let client_id = client.id();
        match request {
            wl_region::Request::Add { x, y, width, height } => {
                state.region_add(&client_id, region_id, Rect::new(x, y, width, height));
            }
            wl_region::Request::Subtract { x, y, width, height } => {
                state.region_subtract(&client_id, region_id, Rect::new(x, y, width, height));
            }
            wl_region::Request::Destroy => {
                state.destroy_region(&client_id, region_id);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlCallback, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlCallback,
        _request: wayland_server::protocol::wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        // wl_callback has no requests
    }
}

impl Dispatch<WlBuffer, BufferId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlBuffer,
        request: wayland_server::protocol::wl_buffer::Request,
        data: &BufferId,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wayland_server::protocol::wl_buffer::Request::Destroy = request {
            state.remove_buffer(*data);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &WlBuffer,
        data: &BufferId,
    ) {
        state.remove_buffer(*data);
    }
}
