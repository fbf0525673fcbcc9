//! Wayland protocol glue.
//!
//! `Dispatch`/`GlobalDispatch` impls on `CompositorState`. Each request is
//! translated into a state operation; protocol errors returned by the
//! state are posted on the resource they name and the client is flagged.
//! Protocols are grouped like their XML sources:
//! - `wayland`: core protocol (compositor, shm, output, subcompositor, seat)
//! - `xdg`: xdg-shell
//! - `wlr`: wlr layer shell and screencopy
//! - `ext`: session lock and the `wp_*` surface extensions

pub mod ext;
pub mod wayland;
pub mod wlr;
pub mod xdg;

use wayland_protocols::ext::session_lock::v1::server::ext_session_lock_manager_v1::ExtSessionLockManagerV1;
use wayland_protocols::wp::content_type::v1::server::wp_content_type_manager_v1::WpContentTypeManagerV1;
use wayland_protocols::wp::fractional_scale::v1::server::wp_fractional_scale_manager_v1::WpFractionalScaleManagerV1;
use wayland_protocols::wp::linux_dmabuf::zv1::server::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_protocols::wp::presentation_time::server::wp_presentation::WpPresentation;
use wayland_protocols::wp::viewporter::server::wp_viewporter::WpViewporter;
use wayland_protocols::xdg::shell::server::xdg_wm_base::XdgWmBase;
use wayland_protocols_wlr::layer_shell::v1::server::zwlr_layer_shell_v1::ZwlrLayerShellV1;
use wayland_protocols_wlr::screencopy::v1::server::zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1;
use wayland_server::protocol::wl_compositor::WlCompositor;
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_seat::WlSeat;
use wayland_server::protocol::wl_shm::WlShm;
use wayland_server::protocol::wl_subcompositor::WlSubcompositor;
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::{DisplayHandle, Resource};

use crate::core::errors::{CoreError, Result};
use crate::core::output::OutputId;
use crate::core::state::{CompositorState, WL_OUTPUT_VERSION};
use crate::core::surface::SurfaceId;
use crate::util::logging::WAYLAND;
use crate::wlog;

/// Advertise every global on `dh` and remember the handle so outputs
/// added later get their `wl_output` global too.
pub fn register_globals(state: &mut CompositorState, dh: &DisplayHandle) {
    dh.create_global::<CompositorState, WlCompositor, ()>(6, ());
    dh.create_global::<CompositorState, WlSubcompositor, ()>(1, ());
    dh.create_global::<CompositorState, WlShm, ()>(1, ());
    dh.create_global::<CompositorState, WlSeat, ()>(5, ());
    dh.create_global::<CompositorState, XdgWmBase, ()>(5, ());
    dh.create_global::<CompositorState, ZwlrLayerShellV1, ()>(4, ());
    dh.create_global::<CompositorState, ZwlrScreencopyManagerV1, ()>(3, ());
    dh.create_global::<CompositorState, ExtSessionLockManagerV1, ()>(1, ());
    dh.create_global::<CompositorState, WpViewporter, ()>(1, ());
    dh.create_global::<CompositorState, WpFractionalScaleManagerV1, ()>(1, ());
    dh.create_global::<CompositorState, WpContentTypeManagerV1, ()>(1, ());
    dh.create_global::<CompositorState, WpPresentation, ()>(1, ());
    if state.default_feedback.is_some() {
        dh.create_global::<CompositorState, ZwpLinuxDmabufV1, ()>(4, ());
    } else {
        tracing::info!("Backend has no DMA-BUF feedback, zwp_linux_dmabuf_v1 not advertised");
    }

    for output in state.outputs.values_mut() {
        output.global = Some(dh.create_global::<CompositorState, WlOutput, OutputId>(WL_OUTPUT_VERSION, output.id));
    }
    state.display_handle = Some(dh.clone());
    tracing::info!("Registered globals for {} output(s)", state.outputs.len());
}

/// Surface id stored as user data of a `wl_surface`.
pub(crate) fn surface_id(surface: &WlSurface) -> Option<SurfaceId> {
    surface.data::<SurfaceId>().copied()
}

/// Post the error carried by `result`, if any.
///
/// Errors naming a role object of `surface` go on that object; anything
/// else goes on `fallback`, the resource the request arrived on (or the
/// global object the error belongs to). Non-protocol failures are only
/// logged: the client did nothing wrong.
pub(crate) fn report<R: Resource>(
    state: &mut CompositorState,
    surface: Option<SurfaceId>,
    fallback: &R,
    result: Result<()>,
) {
    let err = match result {
        Ok(()) => return,
        Err(CoreError::Protocol(err)) => err,
        Err(other) => {
            tracing::warn!("{}: {}", fallback.id(), other);
            return;
        }
    };
    if let Some(id) = surface {
        if state.post_surface_error(id, &err) {
            return;
        }
    }
    wlog!(WAYLAND, "Posting {} on {}", err, fallback.id());
    if fallback.is_alive() {
        fallback.post_error(err.code, err.message.clone());
    }
    if let Some(client) = fallback.client() {
        state.flag_client(client.id(), err);
    }
}
