//! wl_shm, wl_shm_pool and SHM-backed wl_buffers.

use std::sync::Arc;

use wayland_server::{
    protocol::{wl_shm, wl_shm_pool},
    Dispatch, DisplayHandle, GlobalDispatch, Resource, WEnum,
};

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::render::renderer::{WL_SHM_FORMAT_ARGB8888, WL_SHM_FORMAT_XRGB8888};
use crate::core::state::CompositorState;
use crate::core::surface::shm::ShmPool;
use crate::core::surface::{Buffer, BufferType, ShmBufferData};
use crate::core::wayland::report;
use crate::util::logging::BUFFER;
use crate::wlog;

fn shm_error(code: wl_shm::Error, msg: impl Into<String>) -> crate::core::errors::CoreError {
    ProtocolError::new(ErrorTarget::Shm, code, msg).into()
}

/// Size of a new pool, refusing empty and negative ones.
fn validate_pool_size(size: i32) -> Result<usize, wl_shm::Error> {
    if size <= 0 {
        return Err(wl_shm::Error::InvalidStride);
    }
    Ok(size as usize)
}

/// Check a `create_buffer` request against its pool.
fn validate_buffer(pool_size: usize, offset: i32, width: i32, height: i32, stride: i32, format: u32) -> Result<(), wl_shm::Error> {
    if format != WL_SHM_FORMAT_ARGB8888 && format != WL_SHM_FORMAT_XRGB8888 {
        return Err(wl_shm::Error::InvalidFormat);
    }
    if offset < 0 || width <= 0 || height <= 0 || stride < width.saturating_mul(4) {
        return Err(wl_shm::Error::InvalidStride);
    }
    let end = offset as u64 + stride as u64 * height as u64;
    if end > pool_size as u64 {
        return Err(wl_shm::Error::InvalidStride);
    }
    Ok(())
}

impl GlobalDispatch<wl_shm::WlShm, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        shm.format(wl_shm::Format::Argb8888);
        shm.format(wl_shm::Format::Xrgb8888);
    }
}

impl Dispatch<wl_shm::WlShm, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            let size = match validate_pool_size(size) {
                Ok(size) => size,
                Err(code) => {
                    wlog!(BUFFER, "wl_shm.create_pool refused: size {}", size);
                    data_init.post_error(id, code, format!("invalid pool size {}", size));
                    return;
                }
            };
            let pool = Arc::new(ShmPool::new(fd, size));
            let pool_resource = data_init.init(id, pool);
            wlog!(BUFFER, "wl_shm.create_pool {} ({} bytes)", pool_resource.id(), size);
        }
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, Arc<ShmPool>> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        pool: &Arc<ShmPool>,
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer { id, offset, width, height, stride, format } => {
                let format = match format {
                    WEnum::Value(f) => f.into(),
                    WEnum::Unknown(f) => f,
                };
                if let Err(code) = validate_buffer(pool.size(), offset, width, height, stride, format) {
                    let msg = format!(
                        "buffer {}x{} stride {} offset {} format {:#x} does not fit pool of {} bytes",
                        width,
                        height,
                        stride,
                        offset,
                        format,
                        pool.size()
                    );
                    wlog!(BUFFER, "wl_shm_pool.create_buffer refused: {}", msg);
                    data_init.post_error(id, code, msg);
                    return;
                }
                let data = ShmBufferData {
                    width,
                    height,
                    stride,
                    format,
                    offset,
                    pool: pool.clone(),
                };
                let buffer = state.add_buffer(|buffer_id| {
                    let wl_buffer = data_init.init(id, buffer_id);
                    Buffer::new(buffer_id, BufferType::Shm(data), Some(wl_buffer))
                });
                wlog!(BUFFER, "wl_shm_pool.create_buffer {}: {}x{}", buffer.id, width, height);
            }
            wl_shm_pool::Request::Resize { size } => {
                if size < 0 || !pool.resize(size as usize) {
                    let err = shm_error(wl_shm::Error::InvalidFd, format!("cannot shrink pool to {} bytes", size));
                    report(state, None, resource, Err(err));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_must_fit_pool() {
        assert!(validate_buffer(400, 0, 10, 10, 40, WL_SHM_FORMAT_ARGB8888).is_ok());
        assert_eq!(
            validate_buffer(399, 0, 10, 10, 40, WL_SHM_FORMAT_ARGB8888),
            Err(wl_shm::Error::InvalidStride)
        );
        assert_eq!(
            validate_buffer(400, 0, 10, 10, 39, WL_SHM_FORMAT_XRGB8888),
            Err(wl_shm::Error::InvalidStride)
        );
    }

    #[test]
    fn test_pool_size_must_be_positive() {
        assert_eq!(validate_pool_size(4096), Ok(4096));
        assert_eq!(validate_pool_size(0), Err(wl_shm::Error::InvalidStride));
        assert_eq!(validate_pool_size(-1), Err(wl_shm::Error::InvalidStride));
    }

    #[test]
    fn test_unsupported_format() {
        assert_eq!(validate_buffer(400, 0, 10, 10, 40, 0x3231_5258), Err(wl_shm::Error::InvalidFormat));
    }
}
