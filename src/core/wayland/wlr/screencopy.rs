//! zwlr_screencopy_manager_v1: output capture into client SHM buffers.
//!
//! A frame object carries its `ScreencopyRequest` until the client
//! provides a buffer. The armed request then moves to the output, whose
//! render thread copies into the buffer; the presentation of that frame
//! completes it with `ready`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use wayland_protocols_wlr::screencopy::v1::server::{
    zwlr_screencopy_frame_v1::{self, ZwlrScreencopyFrameV1},
    zwlr_screencopy_manager_v1::{self, ZwlrScreencopyManagerV1},
};
use wayland_server::protocol::wl_output::WlOutput;
use wayland_server::protocol::wl_shm;
use wayland_server::{Dispatch, DisplayHandle, GlobalDispatch, Resource};

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::feedback::screencopy::{CopyResult, ScreencopyRequest, ScreencopySink};
use crate::core::output::OutputId;
use crate::core::state::CompositorState;
use crate::core::surface::{Buffer, BufferId};
use crate::core::wayland::report;
use crate::util::geometry::Rect;
use crate::util::logging::OUTPUT;
use crate::wlog;

/// User data of a frame object.
#[derive(Debug, Default)]
pub struct FrameData {
    /// None once the frame was copied or failed
    request: Mutex<Option<ScreencopyRequest>>,
    with_damage: AtomicBool,
}

/// Delivers a capture result to its frame object.
struct FrameSink(ZwlrScreencopyFrameV1);

impl ScreencopySink for FrameSink {
    fn ready(&self, result: &CopyResult) {
        if !self.0.is_alive() {
            return;
        }
        self.0.flags(zwlr_screencopy_frame_v1::Flags::empty());
        let with_damage = self
            .0
            .data::<FrameData>()
            .is_some_and(|d| d.with_damage.load(Ordering::Relaxed));
        if with_damage {
            for rect in result.damage.rects() {
                self.0.damage(
                    rect.x.max(0) as u32,
                    rect.y.max(0) as u32,
                    rect.width.max(0) as u32,
                    rect.height.max(0) as u32,
                );
            }
        }
        let info = &result.info;
        self.0.ready(info.tv_sec_hi(), info.tv_sec_lo(), info.tv_nsec());
    }

    fn failed(&self) {
        if self.0.is_alive() {
            self.0.failed();
        }
    }
}

fn frame_error(code: zwlr_screencopy_frame_v1::Error, msg: &str) -> crate::core::errors::CoreError {
    ProtocolError::new(ErrorTarget::ScreencopyFrame, code, msg).into()
}

impl GlobalDispatch<ZwlrScreencopyManagerV1, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<ZwlrScreencopyManagerV1>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<ZwlrScreencopyManagerV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &ZwlrScreencopyManagerV1,
        request: zwlr_screencopy_manager_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let (frame, output, region) = match request {
            zwlr_screencopy_manager_v1::Request::CaptureOutput { frame, output, .. } => (frame, output, None),
            zwlr_screencopy_manager_v1::Request::CaptureOutputRegion {
                frame,
                output,
                x,
                y,
                width,
                height,
                ..
            } => (frame, output, Some(Rect::new(x, y, width, height))),
            _ => return,
        };
        let frame = data_init.init(frame, FrameData::default());
        start_capture(state, &frame, &output, region);
    }
}

/// Resolve the captured area and announce the buffer constraints, or fail
/// the frame when there is nothing to capture.
fn start_capture(state: &CompositorState, frame: &ZwlrScreencopyFrameV1, output: &WlOutput, region: Option<Rect>) {
    let output_id = output.data::<OutputId>().copied();
    let Some(out) = output_id.and_then(|id| state.outputs.get(&id)) else {
        frame.failed();
        return;
    };
    let geometry = out.geometry();
    let full = geometry.local_rect();
    // Regions are in output-relative logical coordinates
    let area = match region {
        Some(r) => geometry
            .to_local_physical(r.translate(geometry.position.x, geometry.position.y))
            .intersection(&full),
        None => Some(full),
    };
    let Some(area) = area.filter(|a| !a.is_empty()) else {
        frame.failed();
        return;
    };

    let request = ScreencopyRequest::new(out.id, area, FrameSink(frame.clone()));
    let constraints = request.constraints;
    let format = wl_shm::Format::try_from(constraints.format).unwrap_or(wl_shm::Format::Xrgb8888);
    frame.buffer(
        format,
        constraints.size.width as u32,
        constraints.size.height as u32,
        constraints.stride,
    );
    if frame.version() >= 3 {
        frame.buffer_done();
    }
    if let Some(data) = frame.data::<FrameData>() {
        *data.request.lock() = Some(request);
    }
    wlog!(OUTPUT, "Screencopy of output {} region {:?}", out.id, area);
}

impl Dispatch<ZwlrScreencopyFrameV1, FrameData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &ZwlrScreencopyFrameV1,
        request: zwlr_screencopy_frame_v1::Request,
        data: &FrameData,
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let (buffer, with_damage) = match request {
            zwlr_screencopy_frame_v1::Request::Copy { buffer } => (buffer, false),
            zwlr_screencopy_frame_v1::Request::CopyWithDamage { buffer } => (buffer, true),
            _ => return,
        };
        let Some(mut request) = data.request.lock().take() else {
            let err = frame_error(zwlr_screencopy_frame_v1::Error::AlreadyUsed, "frame was already used");
            report(state, None, resource, Err(err));
            return;
        };
        let buffer: Option<Arc<Buffer>> = buffer.data::<BufferId>().and_then(|id| state.buffer(*id)).cloned();
        let Some(buffer) = buffer else {
            request.fail();
            return;
        };
        if !request.arm(buffer, with_damage) {
            let err = frame_error(
                zwlr_screencopy_frame_v1::Error::InvalidBuffer,
                "buffer does not match the advertised constraints",
            );
            report(state, None, resource, Err(err));
            return;
        }
        data.with_damage.store(with_damage, Ordering::Relaxed);
        let Some(output) = state.outputs.get(&request.output) else {
            request.fail();
            return;
        };
        wlog!(OUTPUT, "Screencopy armed on output {} (with damage: {})", output.id, with_damage);
        output.shared.screencopy.lock().push(request);
        output.schedule_repaint();
    }

    fn destroyed(
        _state: &mut Self,
        _client: wayland_server::backend::ClientId,
        _resource: &ZwlrScreencopyFrameV1,
        data: &FrameData,
    ) {
        // An unused request holds the frame; dropping it breaks the cycle
        data.request.lock().take();
    }
}
