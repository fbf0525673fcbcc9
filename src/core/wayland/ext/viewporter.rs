//! wp_viewporter: crop and scale of surface contents.
//!
//! Source and destination are double-buffered on the surface; the
//! viewport object only forwards them.

use wayland_protocols::wp::viewporter::server::{
    wp_viewport::{self, WpViewport},
    wp_viewporter::{self, WpViewporter},
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New};

use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::core::wayland::{report, surface_id};

// ============================================================================
// wp_viewporter
// ============================================================================

impl GlobalDispatch<WpViewporter, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WpViewporter>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpViewporter, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpViewporter,
        request: wp_viewporter::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_viewporter::Request::GetViewport { id, surface } = request {
            let Some(sid) = surface_id(&surface) else {
                data_init.post_error(id, wp_viewport::Error::NoSurface, "unknown wl_surface");
                return;
            };
            let viewport = data_init.init(id, sid);
            let result = state.create_viewport(sid);
            if result.is_ok() {
                state.resources_mut(sid).viewport = Some(viewport);
            }
            report(state, Some(sid), resource, result);
        }
    }
}

// ============================================================================
// wp_viewport
// ============================================================================

impl Dispatch<WpViewport, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpViewport,
        request: wp_viewport::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let id = *data;
        let result = match request {
            wp_viewport::Request::SetSource { x, y, width, height } => {
                state.viewport_set_source(id, x, y, width, height)
            }
            wp_viewport::Request::SetDestination { width, height } => {
                state.viewport_set_destination(id, width, height)
            }
            wp_viewport::Request::Destroy => {
                state.viewport_destroyed(id);
                Ok(())
            }
            _ => Ok(()),
        };
        report(state, Some(id), resource, result);
    }
}
