//! wl_output protocol implementation.
//!
//! One global per output; the global data is the output id. Bound
//! resources are tracked in `CompositorState::output_resources` so surface
//! `enter`/`leave` and presentation `sync_output` can find them.

use wayland_server::{
    protocol::wl_output::{self, Subpixel, WlOutput},
    Dispatch, DisplayHandle, GlobalDispatch, Resource,
};

use crate::core::output::{Output, OutputId};
use crate::core::state::CompositorState;
use crate::util::logging::OUTPUT;
use crate::wlog;

impl GlobalDispatch<WlOutput, OutputId> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        client: &wayland_server::Client,
        resource: wayland_server::New<WlOutput>,
        global_data: &OutputId,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let output_id = *global_data;
        let wl_output = data_init.init(resource, output_id);
        let Some(output) = state.outputs.get(&output_id) else {
            // Removed while the bind was in flight
            wlog!(OUTPUT, "wl_output bound for removed output {}", output_id);
            return;
        };
        send_output_info(&wl_output, output);
        state
            .output_resources
            .lock()
            .entry(output_id)
            .or_default()
            .push(wl_output.clone());

        // Surfaces of this client already on the output learn about it now
        let client_id = client.id();
        let entered: Vec<_> = state
            .surfaces
            .values()
            .filter_map(|s| {
                let s = s.read();
                (s.client_id.as_ref() == Some(&client_id) && s.outputs.contains(&output_id))
                    .then(|| s.resource.clone())
                    .flatten()
            })
            .collect();
        for surface in &entered {
            surface.enter(&wl_output);
        }
        wlog!(
            OUTPUT,
            "Bound wl_output v{} for output {} (client {:?}, {} surface(s) entered)",
            wl_output.version(),
            output_id,
            client_id,
            entered.len()
        );
    }
}

impl Dispatch<WlOutput, OutputId> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WlOutput,
        _request: wl_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        // `release` is a destructor, handled in `destroyed`
    }

    fn destroyed(
        state: &mut Self,
        _client: wayland_server::backend::ClientId,
        resource: &WlOutput,
        data: &OutputId,
    ) {
        if let Some(bound) = state.output_resources.lock().get_mut(data) {
            bound.retain(|o| o.id() != resource.id());
        }
    }
}

/// Send the full output description followed by `done`.
pub fn send_output_info(wl_output: &WlOutput, output: &Output) {
    let geometry = output.geometry();
    let info = &output.info;
    wl_output.geometry(
        geometry.position.x,
        geometry.position.y,
        info.physical_size_mm.width,
        info.physical_size_mm.height,
        Subpixel::Unknown,
        info.make.clone(),
        info.model.clone(),
        geometry.transform.to_wl(),
    );
    for (index, mode) in info.modes.iter().enumerate() {
        let mut flags = wl_output::Mode::empty();
        if index == info.current_mode {
            flags |= wl_output::Mode::Current;
        }
        if mode.preferred {
            flags |= wl_output::Mode::Preferred;
        }
        // Only the current mode is required; older clients get just that
        if flags.contains(wl_output::Mode::Current) || wl_output.version() >= 2 {
            wl_output.mode(flags, mode.size.width, mode.size.height, mode.refresh_mhz as i32);
        }
    }
    if wl_output.version() >= 2 {
        wl_output.scale(geometry.scale);
    }
    if wl_output.version() >= 4 {
        wl_output.name(info.name.clone());
        wl_output.description(info.description.clone());
    }
    if wl_output.version() >= 2 {
        wl_output.done();
    }
    wlog!(
        OUTPUT,
        "Sent output info for {} '{}': {:?} scale {}",
        output.id,
        info.name,
        geometry.mode_size,
        geometry.scale
    );
}
