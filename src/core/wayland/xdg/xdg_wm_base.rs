//! xdg_wm_base: entry point of xdg-shell.

use parking_lot::Mutex;
use wayland_protocols::xdg::shell::server::xdg_surface::XdgSurface;
use wayland_protocols::xdg::shell::server::xdg_wm_base::{self, XdgWmBase};
use wayland_server::{Dispatch, DisplayHandle, GlobalDispatch, Resource};

use super::XdgSurfaceData;
use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::role::Positioner;
use crate::core::state::CompositorState;
use crate::core::wayland::{report, surface_id};
use crate::util::logging::COMPOSITOR;
use crate::{wlog, wtrace};

impl GlobalDispatch<XdgWmBase, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        client: &wayland_server::Client,
        resource: wayland_server::New<XdgWmBase>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let wm_base = data_init.init(resource, ());
        wlog!(COMPOSITOR, "Bound xdg_wm_base v{} for client {:?}", wm_base.version(), client.id());
    }
}

impl Dispatch<XdgWmBase, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &XdgWmBase,
        request: xdg_wm_base::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let Some(sid) = surface_id(&surface) else {
                    data_init.post_error(id, xdg_wm_base::Error::InvalidSurfaceState, "unknown wl_surface");
                    return;
                };
                let xdg_surface: XdgSurface = data_init.init(
                    id,
                    XdgSurfaceData {
                        surface: sid,
                        wm_base: resource.clone(),
                    },
                );
                let result = state.get_xdg_surface(sid, Some(xdg_surface));
                report(state, Some(sid), resource, result);
                wtrace!(COMPOSITOR, "xdg_surface created for surface {}", sid);
            }
            xdg_wm_base::Request::CreatePositioner { id } => {
                data_init.init(id, Mutex::new(Positioner::new()));
            }
            xdg_wm_base::Request::Pong { serial } => {
                wtrace!(COMPOSITOR, "xdg_wm_base pong {}", serial);
            }
            xdg_wm_base::Request::Destroy => {
                let live_surfaces = state.resources.values().any(|r| {
                    r.xdg_surface.as_ref().is_some_and(|x| {
                        x.is_alive()
                            && x.data::<XdgSurfaceData>()
                                .is_some_and(|d| d.wm_base.id() == resource.id())
                    })
                });
                if live_surfaces {
                    let err = ProtocolError::new(
                        ErrorTarget::XdgWmBase,
                        xdg_wm_base::Error::DefunctSurfaces,
                        "xdg_wm_base destroyed before its xdg_surfaces",
                    );
                    report(state, None, resource, Err(err.into()));
                }
            }
            _ => {}
        }
    }
}
