//! wp_fractional_scale_manager_v1: preferred scale hints.
//!
//! The preferred scale is recomputed when a surface's outputs change and
//! sent through the stored `wp_fractional_scale_v1`.

use wayland_protocols::wp::fractional_scale::v1::server::{
    wp_fractional_scale_manager_v1::{self, WpFractionalScaleManagerV1},
    wp_fractional_scale_v1::{self, WpFractionalScaleV1},
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New};

use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::core::wayland::{report, surface_id};

impl GlobalDispatch<WpFractionalScaleManagerV1, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WpFractionalScaleManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpFractionalScaleManagerV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpFractionalScaleManagerV1,
        request: wp_fractional_scale_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_fractional_scale_manager_v1::Request::GetFractionalScale { id, surface } = request {
            let Some(sid) = surface_id(&surface) else {
                data_init.post_error(
                    id,
                    wp_fractional_scale_manager_v1::Error::FractionalScaleExists,
                    "unknown wl_surface",
                );
                return;
            };
            let fractional: WpFractionalScaleV1 = data_init.init(id, sid);
            let result = state.create_fractional_scale(sid, Some(fractional));
            report(state, Some(sid), resource, result);
        }
    }
}

impl Dispatch<WpFractionalScaleV1, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &WpFractionalScaleV1,
        request: wp_fractional_scale_v1::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_fractional_scale_v1::Request::Destroy = request {
            state.fractional_scale_destroyed(*data);
        }
    }
}
