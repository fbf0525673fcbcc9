//! Buffer and output transforms.

use wayland_server::protocol::wl_output;

use crate::util::geometry::{Rect, Size};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Transform::Normal,
            1 => Transform::Rotate90,
            2 => Transform::Rotate180,
            3 => Transform::Rotate270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        })
    }

    pub fn to_wl(self) -> wl_output::Transform {
        match self {
            Transform::Normal => wl_output::Transform::Normal,
            Transform::Rotate90 => wl_output::Transform::_90,
            Transform::Rotate180 => wl_output::Transform::_180,
            Transform::Rotate270 => wl_output::Transform::_270,
            Transform::Flipped => wl_output::Transform::Flipped,
            Transform::Flipped90 => wl_output::Transform::Flipped90,
            Transform::Flipped180 => wl_output::Transform::Flipped180,
            Transform::Flipped270 => wl_output::Transform::Flipped270,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rotate90 | Transform::Rotate270 | Transform::Flipped90 | Transform::Flipped270
        )
    }

    pub fn invert(self) -> Self {
        match self {
            Transform::Rotate90 => Transform::Rotate270,
            Transform::Rotate270 => Transform::Rotate90,
            other => other,
        }
    }

    pub fn transform_size(self, size: Size) -> Size {
        if self.swaps_axes() {
            size.swapped()
        } else {
            size
        }
    }

    /// Map `rect`, given inside an area of `area` size, through this
    /// transform. The result lives in the transformed area.
    pub fn transform_rect(self, rect: Rect, area: Size) -> Rect {
        let (w, h) = (area.width, area.height);
        let (x, y, bw, bh) = (rect.x, rect.y, rect.width, rect.height);
        let (nx, ny) = match self {
            Transform::Normal => (x, y),
            Transform::Rotate90 => (h - y - bh, x),
            Transform::Rotate180 => (w - x - bw, h - y - bh),
            Transform::Rotate270 => (y, w - x - bw),
            Transform::Flipped => (w - x - bw, y),
            Transform::Flipped90 => (h - y - bh, w - x - bw),
            Transform::Flipped180 => (x, h - y - bh),
            Transform::Flipped270 => (y, x),
        };
        if self.swaps_axes() {
            Rect::new(nx, ny, bh, bw)
        } else {
            Rect::new(nx, ny, bw, bh)
        }
    }
}

impl TryFrom<wl_output::Transform> for Transform {
    type Error = ();

    fn try_from(value: wl_output::Transform) -> Result<Self, Self::Error> {
        Transform::from_raw(value.into()).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_round_trip_restores_rect() {
        let area = Size::new(100, 50);
        let rect = Rect::new(10, 5, 20, 10);
        for t in [
            Transform::Normal,
            Transform::Rotate90,
            Transform::Rotate180,
            Transform::Rotate270,
            Transform::Flipped,
            Transform::Flipped90,
            Transform::Flipped180,
            Transform::Flipped270,
        ] {
            let there = t.transform_rect(rect, area);
            let back = t.invert().transform_rect(there, t.transform_size(area));
            assert_eq!(back, rect, "{:?}", t);
        }
    }

    #[test]
    fn test_rotate90_moves_top_left_to_top_right() {
        let area = Size::new(100, 50);
        let r = Transform::Rotate90.transform_rect(Rect::new(0, 0, 10, 10), area);
        assert_eq!(r, Rect::new(40, 0, 10, 10));
    }
}
