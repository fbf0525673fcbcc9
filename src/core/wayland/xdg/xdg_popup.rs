//! xdg_popup: grabs, repositioning and destruction order.

use wayland_protocols::xdg::shell::server::xdg_popup::{self, XdgPopup};
use wayland_server::{Dispatch, DisplayHandle};

use super::xdg_positioner::snapshot;
use super::XdgSurfaceData;
use crate::core::state::CompositorState;
use crate::core::wayland::report;

impl Dispatch<XdgPopup, XdgSurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &XdgPopup,
        request: xdg_popup::Request,
        data: &XdgSurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = data.surface;
        let result = match request {
            xdg_popup::Request::Grab { .. } => state.popup_grab(id),
            xdg_popup::Request::Reposition { positioner, token } => {
                state.popup_reposition(id, snapshot(&positioner), token)
            }
            xdg_popup::Request::Destroy => state.popup_destroyed(id),
            _ => Ok(()),
        };
        report(state, Some(id), &data.wm_base, result);
    }
}
