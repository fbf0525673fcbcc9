//! Renderer abstraction.
//!
//! The repaint pipeline only talks to a `Renderer`. A GPU implementation
//! lives with its backend; `HeadlessRenderer` validates imports, tracks
//! textures and records every draw so frames can be inspected in tests and
//! in the headless binary.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::core::feedback::dmabuf::{DRM_FORMAT_ARGB8888, DRM_FORMAT_XRGB8888};
use crate::core::output::OutputId;
use crate::core::surface::buffer::BufferType;
use crate::core::surface::transform::Transform;
use crate::util::geometry::{Rect, RectF, Size};
use crate::util::logging::RENDER;
use crate::util::region::Region;
use crate::wlog;

pub type TextureId = u64;

/// Renderer shared between the dispatch thread (imports) and render threads.
pub type SharedRenderer = Arc<Mutex<Box<dyn Renderer>>>;

/// `wl_shm` format codes (these differ from DRM fourccs for the two
/// mandatory formats).
pub const WL_SHM_FORMAT_ARGB8888: u32 = 0;
pub const WL_SHM_FORMAT_XRGB8888: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Unsupported format 0x{0:08x}")]
    UnsupportedFormat(u32),

    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    #[error("No frame in progress")]
    NoActiveFrame,

    #[error("Device error: {0}")]
    Device(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub size: Size,
    pub format: u32,
    /// Cheap content fingerprint taken at upload time
    pub checksum: u32,
}

/// The image a frame is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub output: OutputId,
    /// Physical size in pixels
    pub size: Size,
    pub scale: i32,
    pub image: usize,
}

/// One textured quad.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOp {
    pub texture: TextureId,
    /// Source crop in buffer pixels
    pub src: RectF,
    /// Destination in output-local physical pixels
    pub dst: Rect,
    pub transform: Transform,
    /// Output-local pixels that may be touched
    pub clip: Region,
    pub opaque: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    Begin(RenderTarget),
    Clear(Region),
    Draw(DrawOp),
    Copy { region: Rect },
    Finish,
}

pub trait Renderer: Send {
    fn name(&self) -> &str;

    /// Import client buffer contents. SHM contents are copied, so the
    /// client may reuse the buffer as soon as this returns.
    fn import_buffer(&mut self, buffer: &BufferType) -> Result<TextureId, RenderError>;

    fn texture_info(&self, texture: TextureId) -> Option<TextureInfo>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn begin_frame(&mut self, target: &RenderTarget) -> Result<(), RenderError>;

    fn clear(&mut self, region: &Region, color: [f32; 4]);

    fn draw_texture(&mut self, op: &DrawOp);

    /// Copy `region` of the frame in progress into a client buffer.
    fn copy_output(&mut self, region: Rect, dest: &BufferType) -> Result<(), RenderError>;

    fn finish_frame(&mut self) -> Result<(), RenderError>;
}

// ============================================================================
// Headless Renderer
// ============================================================================

/// Renderer with no device behind it.
pub struct HeadlessRenderer {
    textures: HashMap<TextureId, TextureInfo>,
    next_texture: TextureId,
    ops: Vec<RecordedOp>,
    in_frame: bool,
    frames: u64,
    fail_imports: bool,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            next_texture: 1,
            ops: Vec::new(),
            in_frame: false,
            frames: 0,
            fail_imports: false,
        }
    }

    pub fn shared() -> SharedRenderer {
        Arc::new(Mutex::new(Box::new(Self::new())))
    }

    /// Make every subsequent import fail (device loss simulation)
    pub fn set_fail_imports(&mut self, fail: bool) {
        self.fail_imports = fail;
    }

    pub fn ops(&self) -> &[RecordedOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<RecordedOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    fn supports_shm(format: u32) -> bool {
        matches!(
            format,
            WL_SHM_FORMAT_ARGB8888 | WL_SHM_FORMAT_XRGB8888 | DRM_FORMAT_ARGB8888 | DRM_FORMAT_XRGB8888
        )
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HeadlessRenderer {
    fn name(&self) -> &str {
        "headless"
    }

    fn import_buffer(&mut self, buffer: &BufferType) -> Result<TextureId, RenderError> {
        if self.fail_imports {
            return Err(RenderError::Device("imports disabled".into()));
        }
        let info = match buffer {
            BufferType::Shm(shm) => {
                if !Self::supports_shm(shm.format) {
                    return Err(RenderError::UnsupportedFormat(shm.format));
                }
                let len = shm.stride as usize * shm.height as usize;
                let checksum = shm
                    .pool
                    .with_slice(shm.offset as usize, len, |bytes| {
                        bytes.iter().step_by(61).fold(0u32, |acc, b| acc.rotate_left(5) ^ *b as u32)
                    })
                    .ok_or_else(|| RenderError::InvalidBuffer("SHM buffer outside its pool".into()))?;
                TextureInfo {
                    size: Size::new(shm.width, shm.height),
                    format: shm.format,
                    checksum,
                }
            }
            BufferType::DmaBuf(dmabuf) => {
                if dmabuf.planes.is_empty() {
                    return Err(RenderError::InvalidBuffer("DMA-BUF without planes".into()));
                }
                if !matches!(dmabuf.format, DRM_FORMAT_ARGB8888 | DRM_FORMAT_XRGB8888) {
                    return Err(RenderError::UnsupportedFormat(dmabuf.format));
                }
                TextureInfo {
                    size: Size::new(dmabuf.width, dmabuf.height),
                    format: dmabuf.format,
                    checksum: 0,
                }
            }
        };
        let id = self.next_texture;
        self.next_texture += 1;
        self.textures.insert(id, info);
        wlog!(RENDER, "Imported texture {} ({}x{})", id, info.size.width, info.size.height);
        Ok(id)
    }

    fn texture_info(&self, texture: TextureId) -> Option<TextureInfo> {
        self.textures.get(&texture).copied()
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_none() {
            tracing::warn!("destroy_texture: unknown texture {}", texture);
        }
    }

    fn begin_frame(&mut self, target: &RenderTarget) -> Result<(), RenderError> {
        if self.in_frame {
            return Err(RenderError::Device("frame already in progress".into()));
        }
        self.in_frame = true;
        self.ops.push(RecordedOp::Begin(*target));
        Ok(())
    }

    fn clear(&mut self, region: &Region, _color: [f32; 4]) {
        if self.in_frame && !region.is_empty() {
            self.ops.push(RecordedOp::Clear(region.clone()));
        }
    }

    fn draw_texture(&mut self, op: &DrawOp) {
        if !self.in_frame {
            return;
        }
        if !self.textures.contains_key(&op.texture) {
            tracing::warn!("draw_texture: unknown texture {}", op.texture);
            return;
        }
        self.ops.push(RecordedOp::Draw(op.clone()));
    }

    fn copy_output(&mut self, region: Rect, dest: &BufferType) -> Result<(), RenderError> {
        if !self.in_frame {
            return Err(RenderError::NoActiveFrame);
        }
        let (w, h) = dest.dimensions();
        if w < region.width || h < region.height {
            return Err(RenderError::InvalidBuffer("copy destination too small".into()));
        }
        self.ops.push(RecordedOp::Copy { region });
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<(), RenderError> {
        if !self.in_frame {
            return Err(RenderError::NoActiveFrame);
        }
        self.in_frame = false;
        self.frames += 1;
        self.ops.push(RecordedOp::Finish);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::test_support::pool;
    use crate::core::surface::ShmBufferData;

    fn shm(width: i32, height: i32, format: u32) -> BufferType {
        BufferType::Shm(ShmBufferData {
            width,
            height,
            stride: width * 4,
            format,
            offset: 0,
            pool: pool((width * height * 4) as usize),
        })
    }

    #[test]
    fn test_records_one_frame() {
        let mut renderer = HeadlessRenderer::new();
        let texture = renderer.import_buffer(&shm(16, 8, WL_SHM_FORMAT_ARGB8888)).unwrap();
        assert_eq!(renderer.texture_info(texture).unwrap().size, Size::new(16, 8));

        // Nothing is recorded outside a frame
        assert_eq!(renderer.finish_frame(), Err(RenderError::NoActiveFrame));
        let target = RenderTarget {
            output: 1,
            size: Size::new(64, 64),
            scale: 1,
            image: 0,
        };
        renderer.begin_frame(&target).unwrap();
        assert!(renderer.begin_frame(&target).is_err());
        renderer.clear(&Region::from_rect(Rect::new(0, 0, 64, 64)), [0.0; 4]);
        let op = DrawOp {
            texture,
            src: RectF::new(0.0, 0.0, 16.0, 8.0),
            dst: Rect::new(0, 0, 16, 8),
            transform: Transform::Normal,
            clip: Region::from_rect(Rect::new(0, 0, 16, 8)),
            opaque: false,
        };
        renderer.draw_texture(&op);
        renderer.finish_frame().unwrap();

        assert_eq!(renderer.frame_count(), 1);
        let ops = renderer.take_ops();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0], RecordedOp::Begin(target));
        assert_eq!(ops[2], RecordedOp::Draw(op));
        assert_eq!(ops[3], RecordedOp::Finish);
    }

    #[test]
    fn test_import_failures() {
        let mut renderer = HeadlessRenderer::new();
        assert_eq!(
            renderer.import_buffer(&shm(4, 4, 0x3231_5258)),
            Err(RenderError::UnsupportedFormat(0x3231_5258))
        );
        renderer.set_fail_imports(true);
        assert!(matches!(
            renderer.import_buffer(&shm(4, 4, WL_SHM_FORMAT_XRGB8888)),
            Err(RenderError::Device(_))
        ));
        assert_eq!(renderer.live_textures(), 0);
    }

    #[test]
    fn test_destroy_texture() {
        let mut renderer = HeadlessRenderer::new();
        let texture = renderer.import_buffer(&shm(4, 4, WL_SHM_FORMAT_XRGB8888)).unwrap();
        assert_eq!(renderer.live_textures(), 1);
        renderer.destroy_texture(texture);
        assert_eq!(renderer.live_textures(), 0);
        assert!(renderer.texture_info(texture).is_none());
    }
}
