use std::os::unix::io::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use wayland_server::protocol::wl_buffer::WlBuffer;
use wayland_server::Resource;

use crate::core::context::CompositorContext;
use crate::core::errors::CoreError;
use crate::core::render::renderer::{Renderer, TextureId};
use crate::util::geometry::Size;
use crate::util::logging::BUFFER;
use crate::wlog;

use super::shm::ShmPool;

pub type BufferId = u32;

#[derive(Debug, Clone)]
pub struct ShmBufferData {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: u32,
    pub offset: i32,
    pub pool: Arc<ShmPool>,
}

#[derive(Debug, Clone)]
pub struct DmaBufPlane {
    pub fd: Arc<OwnedFd>,
    pub plane_idx: u32,
    pub offset: u32,
    pub stride: u32,
}

#[derive(Debug, Clone)]
pub struct DmaBufData {
    pub width: i32,
    pub height: i32,
    pub format: u32,
    pub modifier: u64,
    pub flags: u32,
    pub planes: Vec<DmaBufPlane>,
}

/// Client buffer storage.
#[derive(Debug, Clone)]
pub enum BufferType {
    Shm(ShmBufferData),
    DmaBuf(DmaBufData),
}

impl BufferType {
    pub fn dimensions(&self) -> (i32, i32) {
        match self {
            BufferType::Shm(data) => (data.width, data.height),
            BufferType::DmaBuf(data) => (data.width, data.height),
        }
    }

    pub fn size(&self) -> Size {
        let (w, h) = self.dimensions();
        Size::new(w, h)
    }

    /// SHM contents are copied on import, so the client may reuse the
    /// buffer immediately. DMA-BUFs are sampled in place until replaced.
    pub fn release_on_import(&self) -> bool {
        matches!(self, BufferType::Shm(_))
    }
}

/// A `wl_buffer` known to the compositor.
#[derive(Debug)]
pub struct Buffer {
    pub id: BufferId,
    pub buffer_type: BufferType,
    pub resource: Option<WlBuffer>,
    released: AtomicBool,
}

impl Buffer {
    pub fn new(id: BufferId, buffer_type: BufferType, resource: Option<WlBuffer>) -> Self {
        Self {
            id,
            buffer_type,
            resource,
            // A fresh buffer is owned by the client until attached
            released: AtomicBool::new(true),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Mark the buffer as held by the compositor.
    pub fn acquire(&self) {
        self.released.store(false, Ordering::Release);
    }

    /// Notify the client that the buffer is no longer being used.
    /// Sends at most one `wl_buffer.release` per acquisition.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(resource) = &self.resource {
            if resource.is_alive() {
                resource.release();
                wlog!(BUFFER, "wl_buffer.release sent buf={}", self.id);
            } else {
                wlog!(BUFFER, "buf={} resource dead, release not sent", self.id);
            }
        }
    }
}

// ============================================================================
// Texture Binding
// ============================================================================

/// A committed buffer bound to a renderer texture.
///
/// Dropping the binding queues texture destruction on the thread that
/// imported it.
pub struct BufferBinding {
    pub buffer: Arc<Buffer>,
    pub texture: TextureId,
    pub size: Size,
    owner: ThreadId,
    ctx: CompositorContext,
}

impl BufferBinding {
    /// Import `buffer` into `renderer`.
    pub fn bind(
        buffer: Arc<Buffer>,
        renderer: &mut dyn Renderer,
        ctx: &CompositorContext,
    ) -> Result<Arc<BufferBinding>, CoreError> {
        let texture = renderer
            .import_buffer(&buffer.buffer_type)
            .map_err(|e| CoreError::BufferImport(format!("buffer {}: {}", buffer.id, e)))?;
        buffer.acquire();
        if buffer.buffer_type.release_on_import() {
            buffer.release();
        }
        Ok(Arc::new(BufferBinding {
            size: buffer.buffer_type.size(),
            buffer,
            texture,
            owner: std::thread::current().id(),
            ctx: ctx.clone(),
        }))
    }

    pub fn is_dmabuf(&self) -> bool {
        matches!(self.buffer.buffer_type, BufferType::DmaBuf(_))
    }
}

impl Drop for BufferBinding {
    fn drop(&mut self) {
        let texture = self.texture;
        self.ctx
            .cleanup()
            .push(self.owner, Box::new(move |renderer| renderer.destroy_texture(texture)));
    }
}

impl std::fmt::Debug for BufferBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferBinding")
            .field("buffer", &self.buffer.id)
            .field("texture", &self.texture)
            .field("size", &self.size)
            .finish()
    }
}
