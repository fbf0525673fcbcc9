//! wl_subcompositor and wl_subsurface protocol implementation.
//!
//! The user data of a `wl_subsurface` is the id of the surface it gives
//! the role to.

use wayland_server::{
    protocol::{
        wl_subcompositor::{self, WlSubcompositor},
        wl_subsurface::{self, WlSubsurface},
    },
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};

use crate::core::errors::{CoreError, ErrorTarget, ProtocolError};
use crate::core::role::subsurface::{BAD_SURFACE, SUBCOMPOSITOR_BAD_SURFACE};
use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::core::wayland::{report, surface_id};
use crate::util::geometry::Point;

impl GlobalDispatch<WlSubcompositor, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WlSubcompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WlSubcompositor, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_subcompositor::Request::GetSubsurface { id, surface, parent } = request {
            let (Some(sid), Some(pid)) = (surface_id(&surface), surface_id(&parent)) else {
                data_init.post_error(id, SUBCOMPOSITOR_BAD_SURFACE, "unknown wl_surface");
                return;
            };
            let subsurface = data_init.init(id, sid);
            let result = state.create_subsurface(sid, pid, Some(subsurface));
            report(state, Some(sid), resource, result);
        }
    }
}

impl Dispatch<WlSubsurface, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WlSubsurface,
        request: wl_subsurface::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let id = *data;
        let result = match request {
            wl_subsurface::Request::SetPosition { x, y } => state.subsurface_set_position(id, Point::new(x, y)),
            wl_subsurface::Request::PlaceAbove { sibling } => place(state, id, &sibling, true),
            wl_subsurface::Request::PlaceBelow { sibling } => place(state, id, &sibling, false),
            wl_subsurface::Request::SetSync => state.subsurface_set_sync(id, true),
            wl_subsurface::Request::SetDesync => state.subsurface_set_sync(id, false),
            wl_subsurface::Request::Destroy => {
                state.destroy_subsurface(id);
                Ok(())
            }
            _ => Ok(()),
        };
        report(state, Some(id), resource, result);
    }
}

fn place(
    state: &mut CompositorState,
    id: SurfaceId,
    sibling: &wayland_server::protocol::wl_surface::WlSurface,
    above: bool,
) -> crate::core::errors::Result<()> {
    match surface_id(sibling) {
        Some(sibling) => state.subsurface_place(id, sibling, above),
        None => Err(CoreError::Protocol(ProtocolError::new(
            ErrorTarget::Subsurface,
            BAD_SURFACE,
            "sibling is not a known wl_surface",
        ))),
    }
}
