//! `xdg_positioner` rules and popup placement.

use bitflags::bitflags;

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::util::geometry::{Point, Rect, Size};

/// `xdg_positioner.error.invalid_input`
pub const INVALID_INPUT: u32 = 0;

/// `xdg_positioner.anchor` / `xdg_positioner.gravity` (same value set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

impl Direction {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Direction::None,
            1 => Direction::Top,
            2 => Direction::Bottom,
            3 => Direction::Left,
            4 => Direction::Right,
            5 => Direction::TopLeft,
            6 => Direction::BottomLeft,
            7 => Direction::TopRight,
            8 => Direction::BottomRight,
            _ => return None,
        })
    }

    fn has_top(self) -> bool {
        matches!(self, Direction::Top | Direction::TopLeft | Direction::TopRight)
    }

    fn has_bottom(self) -> bool {
        matches!(self, Direction::Bottom | Direction::BottomLeft | Direction::BottomRight)
    }

    fn has_left(self) -> bool {
        matches!(self, Direction::Left | Direction::TopLeft | Direction::BottomLeft)
    }

    fn has_right(self) -> bool {
        matches!(self, Direction::Right | Direction::TopRight | Direction::BottomRight)
    }

    fn compose(top: bool, bottom: bool, left: bool, right: bool) -> Self {
        match (top, bottom, left, right) {
            (true, _, true, _) => Direction::TopLeft,
            (true, _, _, true) => Direction::TopRight,
            (true, _, _, _) => Direction::Top,
            (_, true, true, _) => Direction::BottomLeft,
            (_, true, _, true) => Direction::BottomRight,
            (_, true, _, _) => Direction::Bottom,
            (_, _, true, _) => Direction::Left,
            (_, _, _, true) => Direction::Right,
            _ => Direction::None,
        }
    }

    fn flip_x(self) -> Self {
        Self::compose(self.has_top(), self.has_bottom(), self.has_right(), self.has_left())
    }

    fn flip_y(self) -> Self {
        Self::compose(self.has_bottom(), self.has_top(), self.has_left(), self.has_right())
    }
}

bitflags! {
    /// `xdg_positioner.constraint_adjustment`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConstraintAdjustment: u32 {
        const SLIDE_X = 1;
        const SLIDE_Y = 2;
        const FLIP_X = 4;
        const FLIP_Y = 8;
        const RESIZE_X = 16;
        const RESIZE_Y = 32;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Positioner {
    pub size: Option<Size>,
    pub anchor_rect: Option<Rect>,
    pub anchor: Direction,
    pub gravity: Direction,
    pub constraint_adjustment: ConstraintAdjustment,
    pub offset: Point,
    pub reactive: bool,
    pub parent_size: Option<Size>,
    pub parent_configure: Option<u32>,
}

impl Positioner {
    pub fn new() -> Self {
        Self::default()
    }

    fn invalid_input(msg: &str) -> ProtocolError {
        ProtocolError::new(ErrorTarget::XdgPositioner, INVALID_INPUT, msg)
    }

    pub fn set_size(&mut self, width: i32, height: i32) -> Result<(), ProtocolError> {
        if width <= 0 || height <= 0 {
            return Err(Self::invalid_input("positioner size must be positive"));
        }
        self.size = Some(Size::new(width, height));
        Ok(())
    }

    pub fn set_anchor_rect(&mut self, rect: Rect) -> Result<(), ProtocolError> {
        if rect.width < 0 || rect.height < 0 {
            return Err(Self::invalid_input("anchor rect size must not be negative"));
        }
        self.anchor_rect = Some(rect);
        Ok(())
    }

    pub fn set_anchor(&mut self, raw: u32) -> Result<(), ProtocolError> {
        self.anchor = Direction::from_raw(raw).ok_or_else(|| Self::invalid_input("invalid anchor"))?;
        Ok(())
    }

    pub fn set_gravity(&mut self, raw: u32) -> Result<(), ProtocolError> {
        self.gravity = Direction::from_raw(raw).ok_or_else(|| Self::invalid_input("invalid gravity"))?;
        Ok(())
    }

    pub fn set_constraint_adjustment(&mut self, raw: u32) {
        self.constraint_adjustment = ConstraintAdjustment::from_bits_truncate(raw);
    }

    /// Size and anchor rect are required for a popup
    pub fn is_complete(&self) -> bool {
        self.size.is_some() && self.anchor_rect.is_some()
    }

    /// Placement before constraint adjustment, relative to the parent's
    /// window geometry.
    pub fn unconstrained_geometry(&self) -> Rect {
        self.geometry_with(self.anchor, self.gravity)
    }

    fn geometry_with(&self, anchor: Direction, gravity: Direction) -> Rect {
        let size = self.size.unwrap_or_default();
        let rect = self.anchor_rect.unwrap_or_default();

        let ax = if anchor.has_left() {
            rect.x
        } else if anchor.has_right() {
            rect.right()
        } else {
            rect.x + rect.width / 2
        };
        let ay = if anchor.has_top() {
            rect.y
        } else if anchor.has_bottom() {
            rect.bottom()
        } else {
            rect.y + rect.height / 2
        };

        let x = if gravity.has_left() {
            ax - size.width
        } else if gravity.has_right() {
            ax
        } else {
            ax - size.width / 2
        };
        let y = if gravity.has_top() {
            ay - size.height
        } else if gravity.has_bottom() {
            ay
        } else {
            ay - size.height / 2
        };

        Rect::new(x + self.offset.x, y + self.offset.y, size.width, size.height)
    }

    /// Final placement, adjusted to stay inside `bounds` (same coordinate
    /// space as the anchor rect). Flip, then slide, then resize, per axis.
    pub fn constrained_geometry(&self, bounds: Rect) -> Rect {
        let adjust = self.constraint_adjustment;
        let mut geo = self.unconstrained_geometry();

        // Horizontal
        if !fits_x(&geo, &bounds) && adjust.contains(ConstraintAdjustment::FLIP_X) {
            let flipped = self.geometry_with(self.anchor.flip_x(), self.gravity.flip_x());
            if fits_x(&flipped, &bounds) {
                geo.x = flipped.x;
            }
        }
        if !fits_x(&geo, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_X) {
            if geo.right() > bounds.right() {
                geo.x = bounds.right() - geo.width;
            }
            if geo.x < bounds.x {
                geo.x = bounds.x;
            }
        }
        if !fits_x(&geo, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_X) {
            let left = geo.x.max(bounds.x);
            let right = geo.right().min(bounds.right());
            if right > left {
                geo.x = left;
                geo.width = right - left;
            }
        }

        // Vertical
        if !fits_y(&geo, &bounds) && adjust.contains(ConstraintAdjustment::FLIP_Y) {
            let flipped = self.geometry_with(self.anchor.flip_y(), self.gravity.flip_y());
            if fits_y(&flipped, &bounds) {
                geo.y = flipped.y;
            }
        }
        if !fits_y(&geo, &bounds) && adjust.contains(ConstraintAdjustment::SLIDE_Y) {
            if geo.bottom() > bounds.bottom() {
                geo.y = bounds.bottom() - geo.height;
            }
            if geo.y < bounds.y {
                geo.y = bounds.y;
            }
        }
        if !fits_y(&geo, &bounds) && adjust.contains(ConstraintAdjustment::RESIZE_Y) {
            let top = geo.y.max(bounds.y);
            let bottom = geo.bottom().min(bounds.bottom());
            if bottom > top {
                geo.y = top;
                geo.height = bottom - top;
            }
        }

        geo
    }
}

fn fits_x(geo: &Rect, bounds: &Rect) -> bool {
    geo.x >= bounds.x && geo.right() <= bounds.right()
}

fn fits_y(geo: &Rect, bounds: &Rect) -> bool {
    geo.y >= bounds.y && geo.bottom() <= bounds.bottom()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(anchor: Direction, gravity: Direction, adjust: ConstraintAdjustment) -> Positioner {
        let mut p = Positioner::new();
        p.set_size(100, 50).unwrap();
        p.set_anchor_rect(Rect::new(10, 10, 20, 20)).unwrap();
        p.anchor = anchor;
        p.gravity = gravity;
        p.constraint_adjustment = adjust;
        p
    }

    #[test]
    fn test_incomplete_positioner() {
        let mut p = Positioner::new();
        assert!(!p.is_complete());
        p.set_size(10, 10).unwrap();
        assert!(!p.is_complete());
        assert!(p.set_size(0, 10).is_err());
        assert!(p.set_anchor_rect(Rect::new(0, 0, -1, 1)).is_err());
    }

    #[test]
    fn test_anchor_and_gravity() {
        let p = menu(Direction::BottomLeft, Direction::BottomRight, ConstraintAdjustment::empty());
        assert_eq!(p.unconstrained_geometry(), Rect::new(10, 30, 100, 50));
        let p = menu(Direction::None, Direction::None, ConstraintAdjustment::empty());
        assert_eq!(p.unconstrained_geometry(), Rect::new(-30, -5, 100, 50));
    }

    #[test]
    fn test_flip_x() {
        // Opens to the right of the anchor, would overflow a 120 wide area
        let p = menu(Direction::Right, Direction::BottomRight, ConstraintAdjustment::FLIP_X);
        let geo = p.constrained_geometry(Rect::new(-100, 0, 220, 200));
        // Flipped: anchored to the left edge, growing left
        assert_eq!(geo.x, 10 - 100);
        // The flip does not fit either, sliding does
        let p = menu(Direction::Right, Direction::BottomRight, ConstraintAdjustment::FLIP_X | ConstraintAdjustment::SLIDE_X);
        let geo = p.constrained_geometry(Rect::new(0, 0, 120, 200));
        assert_eq!(geo.x, 20);
    }

    #[test]
    fn test_slide_and_resize_y() {
        let p = menu(Direction::Bottom, Direction::Bottom, ConstraintAdjustment::SLIDE_Y);
        let geo = p.constrained_geometry(Rect::new(-100, 0, 400, 60));
        assert_eq!(geo.y, 10);
        let p = menu(Direction::Bottom, Direction::Bottom, ConstraintAdjustment::RESIZE_Y);
        let geo = p.constrained_geometry(Rect::new(-100, 0, 400, 60));
        assert_eq!((geo.y, geo.height), (30, 30));
    }
}
