//! xdg_surface: window geometry, configure acks and role creation.

use wayland_protocols::xdg::shell::server::xdg_popup::XdgPopup;
use wayland_protocols::xdg::shell::server::xdg_surface::{self, XdgSurface};
use wayland_protocols::xdg::shell::server::xdg_toplevel::XdgToplevel;
use wayland_server::{Dispatch, DisplayHandle, Resource};

use super::xdg_positioner::snapshot;
use super::XdgSurfaceData;
use crate::core::state::CompositorState;
use crate::core::wayland::report;
use crate::util::geometry::Rect;
use crate::util::logging::COMPOSITOR;
use crate::wlog;

impl Dispatch<XdgSurface, XdgSurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &XdgSurface,
        request: xdg_surface::Request,
        data: &XdgSurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = data.surface;
        let result = match request {
            xdg_surface::Request::GetToplevel { id: new } => {
                let toplevel: XdgToplevel = data_init.init(new, data.clone());
                wlog!(COMPOSITOR, "xdg_surface.get_toplevel for surface {}", id);
                state.get_toplevel(id, Some(toplevel))
            }
            xdg_surface::Request::GetPopup { id: new, parent, positioner } => {
                let popup: XdgPopup = data_init.init(new, data.clone());
                let parent = parent
                    .as_ref()
                    .and_then(|p| p.data::<XdgSurfaceData>())
                    .map(|p| p.surface);
                let positioner = snapshot(&positioner);
                wlog!(COMPOSITOR, "xdg_surface.get_popup for surface {} (parent {:?})", id, parent);
                state.get_popup(id, parent, positioner, Some(popup))
            }
            xdg_surface::Request::SetWindowGeometry { x, y, width, height } => {
                state.xdg_surface_set_window_geometry(id, Rect::new(x, y, width, height))
            }
            xdg_surface::Request::AckConfigure { serial } => state.xdg_surface_ack_configure(id, serial),
            xdg_surface::Request::Destroy => state.xdg_surface_destroyed(id),
            _ => Ok(()),
        };
        report(state, Some(id), &data.wm_base, result);
    }
}
