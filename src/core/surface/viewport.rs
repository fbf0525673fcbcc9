//! Surface size resolution: buffer size, buffer scale, buffer transform and
//! `wp_viewport` crop/scale combined into the surface's logical geometry.

use wayland_protocols::wp::viewporter::server::wp_viewport;
use wayland_server::protocol::wl_surface;

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::util::geometry::{Rect, RectF, Size};

use super::transform::Transform;

/// Double-buffered `wp_viewport` state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewportState {
    /// Source crop in surface-local (post scale/transform) coordinates
    pub source: Option<RectF>,
    /// Destination size in surface-local coordinates
    pub destination: Option<Size>,
}

impl ViewportState {
    pub fn is_set(&self) -> bool {
        self.source.is_some() || self.destination.is_some()
    }
}

/// The resolved geometry of a committed surface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SurfaceGeometry {
    /// Buffer size in pixels, untransformed
    pub buffer_size: Size,
    pub scale: i32,
    pub transform: Transform,
    /// Part of the buffer shown, in buffer-logical coordinates
    pub src: RectF,
    /// Logical surface size
    pub size: Size,
}

impl SurfaceGeometry {
    /// Resolve the surface geometry. A surface without a buffer has no size.
    pub fn resolve(
        buffer_size: Option<Size>,
        scale: i32,
        transform: Transform,
        viewport: &ViewportState,
    ) -> Result<Self, ProtocolError> {
        let Some(buffer_size) = buffer_size else {
            return Ok(Self {
                scale,
                transform,
                ..Default::default()
            });
        };
        let scale = scale.max(1);
        let transformed = transform.transform_size(buffer_size);

        if !viewport.is_set() && (transformed.width % scale != 0 || transformed.height % scale != 0) {
            return Err(ProtocolError::new(
                ErrorTarget::Surface,
                wl_surface::Error::InvalidSize,
                format!(
                    "buffer size {}x{} is not divisible by scale {}",
                    transformed.width, transformed.height, scale
                ),
            ));
        }

        let logical = RectF::new(
            0.0,
            0.0,
            transformed.width as f64 / scale as f64,
            transformed.height as f64 / scale as f64,
        );

        let src = match viewport.source {
            Some(src) => {
                if src.x < 0.0
                    || src.y < 0.0
                    || src.x + src.width > logical.width
                    || src.y + src.height > logical.height
                {
                    return Err(ProtocolError::new(
                        ErrorTarget::Viewport,
                        wp_viewport::Error::OutOfBuffer,
                        format!(
                            "source {:?} extends outside buffer ({}x{})",
                            src, logical.width, logical.height
                        ),
                    ));
                }
                src
            }
            None => logical,
        };

        let size = match viewport.destination {
            Some(dst) => dst,
            None if viewport.source.is_some() => {
                if src.width.fract() != 0.0 || src.height.fract() != 0.0 {
                    return Err(ProtocolError::new(
                        ErrorTarget::Viewport,
                        wp_viewport::Error::BadSize,
                        "source size is not integer and no destination is set",
                    ));
                }
                Size::new(src.width as i32, src.height as i32)
            }
            None => Size::new(logical.width as i32, logical.height as i32),
        };

        Ok(Self {
            buffer_size,
            scale,
            transform,
            src,
            size,
        })
    }

    pub fn has_content(&self) -> bool {
        !self.buffer_size.is_empty() && !self.size.is_empty()
    }

    /// Convert a rect in buffer pixels to surface-local coordinates,
    /// rounding outward.
    pub fn buffer_to_surface(&self, rect: Rect) -> Rect {
        if !self.has_content() {
            return Rect::default();
        }
        let r = self.transform.invert().transform_rect(rect, self.buffer_size);
        let s = self.scale as f64;
        let logical = RectF::new(
            r.x as f64 / s,
            r.y as f64 / s,
            r.width as f64 / s,
            r.height as f64 / s,
        );
        let sx = self.size.width as f64 / self.src.width;
        let sy = self.size.height as f64 / self.src.height;
        RectF::new(
            (logical.x - self.src.x) * sx,
            (logical.y - self.src.y) * sy,
            logical.width * sx,
            logical.height * sy,
        )
        .to_enclosing()
    }

    /// Source crop in buffer pixels, as sampled by the renderer.
    pub fn src_in_buffer(&self) -> RectF {
        let s = self.scale as f64;
        RectF::new(self.src.x * s, self.src.y * s, self.src.width * s, self.src.height * s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_divides_size() {
        let g = SurfaceGeometry::resolve(Some(Size::new(200, 100)), 2, Transform::Normal, &ViewportState::default())
            .unwrap();
        assert_eq!(g.size, Size::new(100, 50));
        let err = SurfaceGeometry::resolve(Some(Size::new(201, 100)), 2, Transform::Normal, &ViewportState::default())
            .unwrap_err();
        assert_eq!(err.target, ErrorTarget::Surface);
    }

    #[test]
    fn test_rotation_swaps_size() {
        let g = SurfaceGeometry::resolve(Some(Size::new(200, 100)), 1, Transform::Rotate90, &ViewportState::default())
            .unwrap();
        assert_eq!(g.size, Size::new(100, 200));
    }

    #[test]
    fn test_viewport_source_out_of_buffer() {
        let viewport = ViewportState {
            source: Some(RectF::new(50.0, 0.0, 100.0, 10.0)),
            destination: None,
        };
        let err = SurfaceGeometry::resolve(Some(Size::new(100, 100)), 1, Transform::Normal, &viewport).unwrap_err();
        assert_eq!(err.target, ErrorTarget::Viewport);
    }

    #[test]
    fn test_viewport_fractional_source_needs_destination() {
        let mut viewport = ViewportState {
            source: Some(RectF::new(0.0, 0.0, 10.5, 10.0)),
            destination: None,
        };
        assert!(SurfaceGeometry::resolve(Some(Size::new(100, 100)), 1, Transform::Normal, &viewport).is_err());
        viewport.destination = Some(Size::new(21, 20));
        let g = SurfaceGeometry::resolve(Some(Size::new(100, 100)), 1, Transform::Normal, &viewport).unwrap();
        assert_eq!(g.size, Size::new(21, 20));
    }

    #[test]
    fn test_buffer_damage_to_surface_scaled() {
        let g = SurfaceGeometry::resolve(Some(Size::new(200, 200)), 2, Transform::Normal, &ViewportState::default())
            .unwrap();
        assert_eq!(g.buffer_to_surface(Rect::new(1, 1, 3, 3)), Rect::new(0, 0, 2, 2));
    }

    #[test]
    fn test_buffer_damage_through_viewport() {
        let viewport = ViewportState {
            source: Some(RectF::new(50.0, 50.0, 50.0, 50.0)),
            destination: Some(Size::new(100, 100)),
        };
        let g = SurfaceGeometry::resolve(Some(Size::new(100, 100)), 1, Transform::Normal, &viewport).unwrap();
        assert_eq!(g.buffer_to_surface(Rect::new(50, 50, 10, 10)), Rect::new(0, 0, 20, 20));
    }
}
