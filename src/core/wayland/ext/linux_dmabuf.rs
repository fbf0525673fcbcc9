//! zwp_linux_dmabuf_v1: DMA-BUF buffer creation and format feedback.
//!
//! Version 4 clients learn formats from feedback objects: the shared
//! format table memfd plus the main device and tranches of the backend's
//! `DmaFeedback`. Older clients get `format`/`modifier` events built from
//! the same table. Buffer parameters are checked here; the import itself
//! happens when a surface commits the buffer.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use parking_lot::Mutex;
use wayland_protocols::wp::linux_dmabuf::zv1::server::{
    zwp_linux_buffer_params_v1::{self, ZwpLinuxBufferParamsV1},
    zwp_linux_dmabuf_feedback_v1::{self, ZwpLinuxDmabufFeedbackV1},
    zwp_linux_dmabuf_v1::{self, ZwpLinuxDmabufV1},
};
use wayland_server::protocol::wl_buffer::WlBuffer;
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource, WEnum};

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::feedback::dmabuf::DmaFeedback;
use crate::core::state::CompositorState;
use crate::core::surface::{Buffer, BufferId, BufferType, DmaBufData, DmaBufPlane};
use crate::core::wayland::report;
use crate::util::logging::BUFFER;
use crate::wlog;

/// Planes a single buffer may have
pub const MAX_PLANES: u32 = 4;

/// A plane added to a params object.
#[derive(Debug, Clone)]
struct PendingPlane {
    plane: DmaBufPlane,
    modifier: u64,
}

/// User data of `zwp_linux_buffer_params_v1`.
#[derive(Debug, Default)]
pub struct BufferParams {
    planes: Mutex<Vec<PendingPlane>>,
    used: Mutex<bool>,
}

type ParamsError = (zwp_linux_buffer_params_v1::Error, String);

/// Size of the file behind `fd`, None when it cannot be seeked.
fn fd_size(fd: &OwnedFd) -> Option<u64> {
    // SAFETY: lseek on a valid, owned fd; the offset is restored below.
    let end = unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_END) };
    if end < 0 {
        return None;
    }
    // SAFETY: same fd as above.
    unsafe { libc::lseek(fd.as_raw_fd(), 0, libc::SEEK_SET) };
    Some(end as u64)
}

/// Check a complete set of planes and build the buffer description.
fn validate_params(
    mut planes: Vec<PendingPlane>,
    width: i32,
    height: i32,
    format: u32,
    flags: u32,
    feedback: Option<&DmaFeedback>,
) -> Result<DmaBufData, ParamsError> {
    use zwp_linux_buffer_params_v1::Error;

    if planes.is_empty() {
        return Err((Error::Incomplete, "no planes were added".into()));
    }
    planes.sort_by_key(|p| p.plane.plane_idx);
    if planes.iter().enumerate().any(|(i, p)| p.plane.plane_idx != i as u32) {
        return Err((Error::Incomplete, "plane indices have gaps".into()));
    }
    if width <= 0 || height <= 0 {
        return Err((Error::InvalidDimensions, format!("invalid size {}x{}", width, height)));
    }
    let modifier = planes[0].modifier;
    if planes.iter().any(|p| p.modifier != modifier) {
        return Err((Error::InvalidFormat, "planes disagree on the modifier".into()));
    }
    if !feedback.is_some_and(|f| f.supports(format, modifier)) {
        return Err((
            Error::InvalidFormat,
            format!("format {:#x} with modifier {:#x} is not supported", format, modifier),
        ));
    }
    for (index, pending) in planes.iter().enumerate() {
        let plane = &pending.plane;
        let Some(size) = fd_size(&plane.fd) else {
            continue;
        };
        let needed = if index == 0 {
            plane.offset as u64 + plane.stride as u64 * height as u64
        } else {
            plane.offset as u64 + 1
        };
        if needed > size {
            return Err((
                Error::OutOfBounds,
                format!("plane {} needs {} bytes, the fd has {}", plane.plane_idx, needed, size),
            ));
        }
    }
    Ok(DmaBufData {
        width,
        height,
        format,
        modifier,
        flags,
        planes: planes.into_iter().map(|p| p.plane).collect(),
    })
}

fn params_error((code, msg): ParamsError) -> crate::core::errors::CoreError {
    ProtocolError::new(ErrorTarget::LinuxBufferParams, code, msg).into()
}

/// Send the whole feedback: table, main device, tranches, `done`.
pub fn send_feedback(resource: &ZwpLinuxDmabufFeedbackV1, feedback: &DmaFeedback) {
    let table = feedback.table();
    resource.format_table(table.fd(), table.size());
    resource.main_device(DmaFeedback::device_bytes(feedback.main_device()));
    for tranche in feedback.tranches() {
        resource.tranche_target_device(DmaFeedback::device_bytes(tranche.device));
        let indices: Vec<u8> = tranche.indices.iter().flat_map(|i| i.to_ne_bytes()).collect();
        resource.tranche_formats(indices);
        resource.tranche_flags(zwp_linux_dmabuf_feedback_v1::TrancheFlags::from_bits_truncate(
            tranche.flags.bits(),
        ));
        resource.tranche_done();
    }
    resource.done();
}

// ============================================================================
// zwp_linux_dmabuf_v1
// ============================================================================

impl GlobalDispatch<ZwpLinuxDmabufV1, ()> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<ZwpLinuxDmabufV1>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let dmabuf = data_init.init(resource, ());
        if dmabuf.version() >= 4 {
            return;
        }
        let Some(feedback) = state.default_feedback.as_ref() else {
            return;
        };
        let mut announced = Vec::new();
        for &(format, modifier) in feedback.table().entries() {
            if dmabuf.version() >= 3 {
                dmabuf.modifier(format, (modifier >> 32) as u32, (modifier & 0xFFFF_FFFF) as u32);
            } else if !announced.contains(&format) {
                dmabuf.format(format);
                announced.push(format);
            }
        }
    }
}

impl Dispatch<ZwpLinuxDmabufV1, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &ZwpLinuxDmabufV1,
        request: zwp_linux_dmabuf_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_linux_dmabuf_v1::Request::CreateParams { params_id } => {
                data_init.init(params_id, BufferParams::default());
            }
            zwp_linux_dmabuf_v1::Request::GetDefaultFeedback { id } => {
                let resource = data_init.init(id, ());
                if let Some(feedback) = state.default_feedback.as_ref() {
                    send_feedback(&resource, feedback);
                }
            }
            zwp_linux_dmabuf_v1::Request::GetSurfaceFeedback { id, .. } => {
                // Surfaces share the default feedback and its table
                let resource = data_init.init(id, ());
                if let Some(feedback) = state.default_feedback.as_ref() {
                    send_feedback(&resource, feedback);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<ZwpLinuxDmabufFeedbackV1, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &ZwpLinuxDmabufFeedbackV1,
        _request: zwp_linux_dmabuf_feedback_v1::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

// ============================================================================
// zwp_linux_buffer_params_v1
// ============================================================================

impl BufferParams {
    fn add(&self, fd: OwnedFd, plane_idx: u32, offset: u32, stride: u32, modifier: u64) -> Result<(), ParamsError> {
        use zwp_linux_buffer_params_v1::Error;
        if *self.used.lock() {
            return Err((Error::AlreadyUsed, "params were already used".into()));
        }
        if plane_idx >= MAX_PLANES {
            return Err((Error::PlaneIdx, format!("plane index {} out of range", plane_idx)));
        }
        let mut planes = self.planes.lock();
        if planes.iter().any(|p| p.plane.plane_idx == plane_idx) {
            return Err((Error::PlaneSet, format!("plane {} already set", plane_idx)));
        }
        planes.push(PendingPlane {
            plane: DmaBufPlane {
                fd: Arc::new(fd),
                plane_idx,
                offset,
                stride,
            },
            modifier,
        });
        Ok(())
    }

    /// Consume the params for a create request.
    fn take(&self) -> Result<Vec<PendingPlane>, ParamsError> {
        let mut used = self.used.lock();
        if *used {
            return Err((
                zwp_linux_buffer_params_v1::Error::AlreadyUsed,
                "params were already used".into(),
            ));
        }
        *used = true;
        Ok(std::mem::take(&mut *self.planes.lock()))
    }
}

fn raw_flags(flags: WEnum<zwp_linux_buffer_params_v1::Flags>) -> u32 {
    match flags {
        WEnum::Value(f) => f.bits(),
        WEnum::Unknown(raw) => raw,
    }
}

impl Dispatch<ZwpLinuxBufferParamsV1, BufferParams> for CompositorState {
    fn request(
        state: &mut Self,
        client: &Client,
        resource: &ZwpLinuxBufferParamsV1,
        request: zwp_linux_buffer_params_v1::Request,
        params: &BufferParams,
        dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            zwp_linux_buffer_params_v1::Request::Add {
                fd,
                plane_idx,
                offset,
                stride,
                modifier_hi,
                modifier_lo,
            } => {
                let modifier = ((modifier_hi as u64) << 32) | modifier_lo as u64;
                if let Err(err) = params.add(fd, plane_idx, offset, stride, modifier) {
                    report(state, None, resource, Err(params_error(err)));
                }
            }
            zwp_linux_buffer_params_v1::Request::Create { width, height, format, flags } => {
                let feedback = state.default_feedback.clone();
                let data = params
                    .take()
                    .and_then(|planes| validate_params(planes, width, height, format, raw_flags(flags), feedback.as_deref()));
                let data = match data {
                    Ok(data) => data,
                    Err(err) => {
                        report(state, None, resource, Err(params_error(err)));
                        return;
                    }
                };
                let buffer = state.add_buffer(|id| {
                    let wl_buffer = client
                        .create_resource::<WlBuffer, BufferId, CompositorState>(dhandle, 1, id)
                        .ok();
                    Buffer::new(id, BufferType::DmaBuf(data), wl_buffer)
                });
                match buffer.resource.as_ref() {
                    Some(wl_buffer) => {
                        resource.created(wl_buffer);
                        wlog!(BUFFER, "DMA-BUF buffer {} created ({}x{})", buffer.id, width, height);
                    }
                    None => {
                        state.remove_buffer(buffer.id);
                        resource.failed();
                    }
                }
            }
            zwp_linux_buffer_params_v1::Request::CreateImmed {
                buffer_id,
                width,
                height,
                format,
                flags,
            } => {
                let feedback = state.default_feedback.clone();
                let data = params
                    .take()
                    .and_then(|planes| validate_params(planes, width, height, format, raw_flags(flags), feedback.as_deref()));
                match data {
                    Ok(data) => {
                        let buffer = state.add_buffer(|id| {
                            let wl_buffer = data_init.init(buffer_id, id);
                            Buffer::new(id, BufferType::DmaBuf(data), Some(wl_buffer))
                        });
                        wlog!(BUFFER, "DMA-BUF buffer {} created immediately ({}x{})", buffer.id, width, height);
                    }
                    Err(err) => {
                        // Buffer id 0 is never assigned, so the dead object maps to nothing
                        data_init.init(buffer_id, 0 as BufferId);
                        report(state, None, resource, Err(params_error(err)));
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feedback::dmabuf::{
        DmaFeedbackBuilder, TrancheFlags, DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR, DRM_FORMAT_XRGB8888,
    };
    use std::os::fd::FromRawFd;
    use zwp_linux_buffer_params_v1::Error;

    fn memfd(size: usize) -> OwnedFd {
        // SAFETY: memfd_create with a static NUL terminated name.
        let fd = unsafe { libc::memfd_create(b"dmabuf-test\0".as_ptr() as *const libc::c_char, 0) };
        assert!(fd >= 0);
        // SAFETY: fd was just created and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        // SAFETY: valid fd.
        assert_eq!(unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) }, 0);
        fd
    }

    fn feedback() -> DmaFeedback {
        DmaFeedbackBuilder::new(1)
            .add_tranche(1, TrancheFlags::empty(), vec![(DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR)])
            .build()
            .unwrap()
    }

    fn plane(idx: u32, size: usize, stride: u32) -> PendingPlane {
        PendingPlane {
            plane: DmaBufPlane {
                fd: Arc::new(memfd(size)),
                plane_idx: idx,
                offset: 0,
                stride,
            },
            modifier: DRM_FORMAT_MOD_LINEAR,
        }
    }

    #[test]
    fn test_valid_single_plane() {
        let fb = feedback();
        let data = validate_params(vec![plane(0, 400, 40)], 10, 10, DRM_FORMAT_ARGB8888, 0, Some(&fb)).unwrap();
        assert_eq!(data.planes.len(), 1);
        assert_eq!(data.modifier, DRM_FORMAT_MOD_LINEAR);
    }

    #[test]
    fn test_plane_gap_is_incomplete() {
        let fb = feedback();
        let err = validate_params(vec![plane(1, 400, 40)], 10, 10, DRM_FORMAT_ARGB8888, 0, Some(&fb)).unwrap_err();
        assert_eq!(err.0, Error::Incomplete);
    }

    #[test]
    fn test_unsupported_format() {
        let fb = feedback();
        let err = validate_params(vec![plane(0, 400, 40)], 10, 10, DRM_FORMAT_XRGB8888, 0, Some(&fb)).unwrap_err();
        assert_eq!(err.0, Error::InvalidFormat);
        let err = validate_params(vec![plane(0, 400, 40)], 10, 10, DRM_FORMAT_ARGB8888, 0, None).unwrap_err();
        assert_eq!(err.0, Error::InvalidFormat);
    }

    #[test]
    fn test_plane_out_of_bounds() {
        let fb = feedback();
        let err = validate_params(vec![plane(0, 399, 40)], 10, 10, DRM_FORMAT_ARGB8888, 0, Some(&fb)).unwrap_err();
        assert_eq!(err.0, Error::OutOfBounds);
    }

    #[test]
    fn test_params_are_single_use() {
        let params = BufferParams::default();
        params.add(memfd(400), 0, 0, 40, DRM_FORMAT_MOD_LINEAR).unwrap();
        assert_eq!(params.take().unwrap().len(), 1);
        assert_eq!(params.take().unwrap_err().0, Error::AlreadyUsed);
    }

    #[test]
    fn test_duplicate_plane() {
        let params = BufferParams::default();
        for expected in [None, Some(Error::PlaneSet)] {
            assert_eq!(params.add(memfd(16), 0, 0, 4, 0).err().map(|e| e.0), expected);
        }
        assert_eq!(params.add(memfd(16), MAX_PLANES, 0, 4, 0).unwrap_err().0, Error::PlaneIdx);
    }
}
