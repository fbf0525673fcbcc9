//! wp_content_type_manager_v1: double-buffered content type hints.

use wayland_protocols::wp::content_type::v1::server::{
    wp_content_type_manager_v1::{self, WpContentTypeManagerV1},
    wp_content_type_v1::{self, WpContentTypeV1},
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, WEnum};

use crate::core::state::CompositorState;
use crate::core::surface::{ContentType, SurfaceId};
use crate::core::wayland::{report, surface_id};

impl GlobalDispatch<WpContentTypeManagerV1, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<WpContentTypeManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<WpContentTypeManagerV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpContentTypeManagerV1,
        request: wp_content_type_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wp_content_type_manager_v1::Request::GetSurfaceContentType { id, surface } = request {
            let Some(sid) = surface_id(&surface) else {
                data_init.post_error(
                    id,
                    wp_content_type_manager_v1::Error::AlreadyConstructed,
                    "unknown wl_surface",
                );
                return;
            };
            let _content_type: WpContentTypeV1 = data_init.init(id, sid);
            let result = state.create_content_type(sid);
            report(state, Some(sid), resource, result);
        }
    }
}

impl Dispatch<WpContentTypeV1, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &WpContentTypeV1,
        request: wp_content_type_v1::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let id = *data;
        match request {
            wp_content_type_v1::Request::SetContentType { content_type } => {
                // Unknown values leave the hint unchanged
                let content_type = match content_type {
                    WEnum::Value(v) => ContentType::from_raw(v.into()),
                    WEnum::Unknown(_) => None,
                };
                if let Some(content_type) = content_type {
                    let result = state.surface_set_content_type(id, content_type);
                    report(state, Some(id), resource, result);
                }
            }
            wp_content_type_v1::Request::Destroy => state.content_type_destroyed(id),
            _ => {}
        }
    }
}
