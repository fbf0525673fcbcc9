//! zwlr_layer_shell_v1 and zwlr_layer_surface_v1.
//!
//! The layer surface role lives in `core::role::layer`; this module only
//! maps requests onto it. The first configure is sent by the initial
//! commit, once the surface's size and anchors are known.

use wayland_protocols_wlr::layer_shell::v1::server::{
    zwlr_layer_shell_v1::{self, ZwlrLayerShellV1},
    zwlr_layer_surface_v1::{self, ZwlrLayerSurfaceV1},
};
use wayland_server::{Dispatch, DisplayHandle, GlobalDispatch, Resource, WEnum};

use crate::core::output::OutputId;
use crate::core::role::layer::shell_error;
use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::core::wayland::xdg::XdgSurfaceData;
use crate::core::wayland::{report, surface_id};
use crate::util::logging::ROLE;
use crate::wlog;

/// User data of a `zwlr_layer_surface_v1`. Layer shell errors go on
/// `shell`.
#[derive(Debug, Clone)]
pub struct LayerSurfaceData {
    pub surface: SurfaceId,
    pub shell: ZwlrLayerShellV1,
}

impl GlobalDispatch<ZwlrLayerShellV1, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<ZwlrLayerShellV1>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZwlrLayerShellV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &ZwlrLayerShellV1,
        request: zwlr_layer_shell_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let zwlr_layer_shell_v1::Request::GetLayerSurface { id, surface, output, layer, namespace } = request {
            let Some(sid) = surface_id(&surface) else {
                data_init.post_error(id, shell_error::ROLE, "unknown wl_surface");
                return;
            };
            let layer_surface: ZwlrLayerSurfaceV1 = data_init.init(
                id,
                LayerSurfaceData {
                    surface: sid,
                    shell: resource.clone(),
                },
            );
            let output = output.as_ref().and_then(|o| o.data::<OutputId>()).copied();
            let layer = match layer {
                WEnum::Value(l) => l.into(),
                WEnum::Unknown(raw) => raw,
            };
            wlog!(ROLE, "get_layer_surface for surface {} (output {:?}, namespace '{}')", sid, output, namespace);
            let result = state.get_layer_surface(sid, output, layer, namespace, Some(layer_surface));
            report(state, Some(sid), resource, result);
        }
    }
}

impl Dispatch<ZwlrLayerSurfaceV1, LayerSurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &ZwlrLayerSurfaceV1,
        request: zwlr_layer_surface_v1::Request,
        data: &LayerSurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = data.surface;
        let result = match request {
            zwlr_layer_surface_v1::Request::SetSize { width, height } => {
                state.with_layer(id, |l| l.set_size(width, height))
            }
            zwlr_layer_surface_v1::Request::SetAnchor { anchor } => {
                let raw = match anchor {
                    WEnum::Value(a) => a.bits(),
                    WEnum::Unknown(raw) => raw,
                };
                state.with_layer(id, |l| l.set_anchor(raw)).and_then(|r| r.map_err(Into::into))
            }
            zwlr_layer_surface_v1::Request::SetExclusiveZone { zone } => {
                state.with_layer(id, |l| l.set_exclusive_zone(zone))
            }
            zwlr_layer_surface_v1::Request::SetMargin { top, right, bottom, left } => {
                state.with_layer(id, |l| l.set_margin(top, right, bottom, left))
            }
            zwlr_layer_surface_v1::Request::SetKeyboardInteractivity { keyboard_interactivity } => {
                let raw = match keyboard_interactivity {
                    WEnum::Value(k) => k.into(),
                    WEnum::Unknown(raw) => raw,
                };
                state
                    .with_layer(id, |l| l.set_keyboard_interactivity(raw))
                    .and_then(|r| r.map_err(Into::into))
            }
            zwlr_layer_surface_v1::Request::GetPopup { popup } => match popup.data::<XdgSurfaceData>() {
                Some(popup) => state.layer_get_popup(id, popup.surface),
                None => Ok(()),
            },
            zwlr_layer_surface_v1::Request::AckConfigure { serial } => state.layer_ack_configure(id, serial),
            zwlr_layer_surface_v1::Request::SetLayer { layer } => {
                let raw = match layer {
                    WEnum::Value(l) => l.into(),
                    WEnum::Unknown(raw) => raw,
                };
                state.with_layer(id, |l| l.set_layer(raw)).and_then(|r| r.map_err(Into::into))
            }
            zwlr_layer_surface_v1::Request::Destroy => state.layer_destroyed(id),
            _ => Ok(()),
        };
        report(state, Some(id), &data.shell, result);
    }
}
