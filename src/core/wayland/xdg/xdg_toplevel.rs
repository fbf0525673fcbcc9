//! xdg_toplevel: window metadata and size limits.
//!
//! Interactive move/resize and the maximize/fullscreen/minimize requests
//! are window-manager decisions left to the embedder; they are logged and
//! answered only when the embedder calls `configure_toplevel`.

use wayland_protocols::xdg::shell::server::xdg_toplevel::{self, XdgToplevel};
use wayland_server::{Dispatch, DisplayHandle, Resource, WEnum};

use super::XdgSurfaceData;
use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::role::toplevel::error::INVALID_RESIZE_EDGE;
use crate::core::state::CompositorState;
use crate::core::wayland::report;
use crate::util::logging::COMPOSITOR;
use crate::wtrace;

impl Dispatch<XdgToplevel, XdgSurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &XdgToplevel,
        request: xdg_toplevel::Request,
        data: &XdgSurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let id = data.surface;
        let result = match request {
            xdg_toplevel::Request::SetTitle { title } => state.toplevel_set_title(id, title),
            xdg_toplevel::Request::SetAppId { app_id } => state.toplevel_set_app_id(id, app_id),
            xdg_toplevel::Request::SetParent { parent } => {
                let parent = parent
                    .as_ref()
                    .and_then(|p| p.data::<XdgSurfaceData>())
                    .map(|p| p.surface);
                state.toplevel_set_parent(id, parent)
            }
            xdg_toplevel::Request::SetMinSize { width, height } => state
                .with_toplevel(id, |t| t.set_min_size(width, height))
                .and_then(|r| r.map_err(Into::into)),
            xdg_toplevel::Request::SetMaxSize { width, height } => state
                .with_toplevel(id, |t| t.set_max_size(width, height))
                .and_then(|r| r.map_err(Into::into)),
            xdg_toplevel::Request::Resize { edges, .. } => match edges {
                WEnum::Value(edges) => {
                    wtrace!(COMPOSITOR, "Toplevel {} asked for an interactive resize ({:?})", id, edges);
                    Ok(())
                }
                WEnum::Unknown(raw) => Err(ProtocolError::new(
                    ErrorTarget::XdgToplevel,
                    INVALID_RESIZE_EDGE,
                    format!("invalid resize edge {}", raw),
                )
                .into()),
            },
            xdg_toplevel::Request::Move { .. } => {
                wtrace!(COMPOSITOR, "Toplevel {} asked for an interactive move", id);
                Ok(())
            }
            xdg_toplevel::Request::Destroy => state.toplevel_destroyed(id),
            other => {
                wtrace!(COMPOSITOR, "Toplevel {}: unhandled {:?}", id, other);
                Ok(())
            }
        };
        report(state, Some(id), &data.wm_base, result);
    }
}
