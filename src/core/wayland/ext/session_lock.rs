//! ext_session_lock_manager_v1.
//!
//! Only one lock is active at a time. A lock requested while another is
//! active is answered with `finished` and every later request on it is
//! ignored.

use wayland_protocols::ext::session_lock::v1::server::{
    ext_session_lock_manager_v1::{self, ExtSessionLockManagerV1},
    ext_session_lock_surface_v1::{self, ExtSessionLockSurfaceV1},
    ext_session_lock_v1::{self, ExtSessionLockV1},
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource};

use crate::core::output::OutputId;
use crate::core::role::session_lock::lock_error;
use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::core::wayland::{report, surface_id};
use crate::util::logging::ROLE;
use crate::wlog;

fn is_active(state: &CompositorState, lock: &ExtSessionLockV1) -> bool {
    state.lock_resource.as_ref().is_some_and(|r| r.id() == lock.id())
}

impl GlobalDispatch<ExtSessionLockManagerV1, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ExtSessionLockManagerV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ExtSessionLockManagerV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &ExtSessionLockManagerV1,
        request: ext_session_lock_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let ext_session_lock_manager_v1::Request::Lock { id } = request {
            let lock = data_init.init(id, ());
            let accepted = state.lock_session(Some(lock));
            wlog!(ROLE, "Session lock requested by {:?}: {}", client.id(), if accepted { "pending" } else { "refused" });
        }
    }
}

impl Dispatch<ExtSessionLockV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &ExtSessionLockV1,
        request: ext_session_lock_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            ext_session_lock_v1::Request::GetLockSurface { id, surface, output } => {
                let Some(sid) = surface_id(&surface) else {
                    data_init.post_error(id, lock_error::ROLE, "unknown wl_surface");
                    return;
                };
                let lock_surface: ExtSessionLockSurfaceV1 = data_init.init(id, sid);
                if !is_active(state, resource) {
                    return;
                }
                let Some(output) = output.data::<OutputId>().copied() else {
                    return;
                };
                let result = state.get_lock_surface(sid, output, Some(lock_surface));
                report(state, Some(sid), resource, result);
            }
            ext_session_lock_v1::Request::UnlockAndDestroy => {
                if is_active(state, resource) {
                    let result = state.unlock_session();
                    report(state, None, resource, result);
                }
            }
            ext_session_lock_v1::Request::Destroy => {
                if is_active(state, resource) {
                    let result = state.lock_destroyed();
                    report(state, None, resource, result);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<ExtSessionLockSurfaceV1, SurfaceId> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &ExtSessionLockSurfaceV1,
        request: ext_session_lock_surface_v1::Request,
        data: &SurfaceId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let id = *data;
        let result = match request {
            ext_session_lock_surface_v1::Request::AckConfigure { serial } => {
                state.lock_surface_ack_configure(id, serial)
            }
            ext_session_lock_surface_v1::Request::Destroy => state.lock_surface_destroyed(id),
            _ => Ok(()),
        };
        report(state, Some(id), resource, result);
    }
}
