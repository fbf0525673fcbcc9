use crate::util::geometry::Rect;
use crate::util::region::Region;

use super::viewport::SurfaceGeometry;

/// Damage accumulated between commits.
///
/// `wl_surface.damage` is in surface coordinates, `damage_buffer` in buffer
/// pixels. Both are kept apart until the commit resolves the geometry that
/// maps one onto the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Damage {
    pub surface: Region,
    pub buffer: Region,
}

impl Damage {
    pub fn add_surface(&mut self, rect: Rect) {
        self.surface.add(rect);
    }

    pub fn add_buffer(&mut self, rect: Rect) {
        self.buffer.add(rect);
    }

    pub fn is_empty(&self) -> bool {
        self.surface.is_empty() && self.buffer.is_empty()
    }

    pub fn merge(&mut self, other: Damage) {
        self.surface.union(&other.surface);
        self.buffer.union(&other.buffer);
    }

    /// Collapse into one surface-local region clipped to the surface.
    pub fn to_surface_local(&self, geometry: &SurfaceGeometry) -> Region {
        let bounds = Rect::from_loc_size(Default::default(), geometry.size);
        let mut out = self.surface.intersect_rect(&bounds);
        for rect in self.buffer.rects() {
            if let Some(r) = geometry.buffer_to_surface(*rect).intersection(&bounds) {
                out.add(r);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::surface::transform::Transform;
    use crate::core::surface::viewport::ViewportState;
    use crate::util::geometry::Size;

    #[test]
    fn test_damage_is_clipped_and_combined() {
        let geometry =
            SurfaceGeometry::resolve(Some(Size::new(100, 100)), 1, Transform::Normal, &ViewportState::default())
                .unwrap();
        let mut damage = Damage::default();
        damage.add_surface(Rect::new(90, 90, 50, 50));
        damage.add_buffer(Rect::new(0, 0, 10, 10));
        let local = damage.to_surface_local(&geometry);
        assert_eq!(local.area(), 100 + 100);
    }

    #[test]
    fn test_repeated_damage_is_idempotent() {
        let mut once = Damage::default();
        once.add_surface(Rect::new(0, 0, 10, 10));
        let mut twice = once.clone();
        twice.add_surface(Rect::new(0, 0, 10, 10));
        assert_eq!(once, twice);
    }
}
