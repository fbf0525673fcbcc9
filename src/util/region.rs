//! Rectangle-set regions.
//!
//! A `Region` is a list of non-overlapping rectangles. It backs `wl_region`,
//! input/opaque regions and every damage accumulator in the crate.

use super::geometry::{Point, Rect};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Add a rect. Only the part not already covered is stored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = vec![rect];
        for existing in &self.rects {
            pieces = pieces
                .into_iter()
                .flat_map(|p| subtract_rect(p, existing))
                .collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    pub fn subtract(&mut self, sub: Rect) {
        if sub.is_empty() {
            return;
        }
        self.rects = self
            .rects
            .drain(..)
            .flat_map(|r| subtract_rect(r, &sub))
            .collect();
    }

    pub fn subtract_region(&mut self, other: &Region) {
        for rect in &other.rects {
            self.subtract(*rect);
        }
    }

    pub fn intersect_rect(&self, clip: &Rect) -> Region {
        Region {
            rects: self.rects.iter().filter_map(|r| r.intersection(clip)).collect(),
        }
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let mut out = Region::new();
        for clip in &other.rects {
            for r in &self.rects {
                if let Some(i) = r.intersection(clip) {
                    // Both inputs are disjoint sets, so the pieces are disjoint too.
                    out.rects.push(i);
                }
            }
        }
        out
    }

    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }

    pub fn translate(&mut self, dx: i32, dy: i32) {
        for r in &mut self.rects {
            *r = r.translate(dx, dy);
        }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        let mut out = self.clone();
        out.translate(dx, dy);
        out
    }

    pub fn contains(&self, p: Point) -> bool {
        self.rects.iter().any(|r| r.contains(p))
    }

    /// Bounding box of the whole region, or an empty rect.
    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, r| acc.merge(r))
    }

    /// Total covered area in pixels.
    pub fn area(&self) -> i64 {
        self.rects
            .iter()
            .map(|r| r.width as i64 * r.height as i64)
            .sum()
    }

    /// Collapse to the bounding box once the rect count exceeds `max_rects`.
    /// Only valid for damage, where over-approximation is harmless.
    pub fn simplify(&mut self, max_rects: usize) {
        if self.rects.len() > max_rects {
            let bounds = self.bounds();
            self.rects.clear();
            self.rects.push(bounds);
        }
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

/// Subtract `sub` from `rect`, returning up to four pieces.
fn subtract_rect(rect: Rect, sub: &Rect) -> Vec<Rect> {
    let Some(inter) = rect.intersection(sub) else {
        return vec![rect];
    };

    let mut out = Vec::with_capacity(4);
    // Top strip (full width)
    if inter.y > rect.y {
        out.push(Rect::new(rect.x, rect.y, rect.width, inter.y - rect.y));
    }
    // Bottom strip (full width)
    if inter.bottom() < rect.bottom() {
        out.push(Rect::new(rect.x, inter.bottom(), rect.width, rect.bottom() - inter.bottom()));
    }
    // Left strip (intersection height only)
    if inter.x > rect.x {
        out.push(Rect::new(rect.x, inter.y, inter.x - rect.x, inter.height));
    }
    // Right strip (intersection height only)
    if inter.right() < rect.right() {
        out.push(Rect::new(inter.right(), inter.y, rect.right() - inter.right(), inter.height));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_overlapping_keeps_area() {
        let mut region = Region::new();
        region.add(Rect::new(0, 0, 10, 10));
        region.add(Rect::new(5, 5, 10, 10));
        assert_eq!(region.area(), 100 + 100 - 25);
        assert_eq!(region.bounds(), Rect::new(0, 0, 15, 15));
    }

    #[test]
    fn test_subtract_hole() {
        let mut region = Region::from_rect(Rect::new(0, 0, 30, 30));
        region.subtract(Rect::new(10, 10, 10, 10));
        assert_eq!(region.area(), 900 - 100);
        assert!(!region.contains(Point::new(15, 15)));
        assert!(region.contains(Point::new(5, 15)));
        assert!(region.contains(Point::new(25, 15)));
    }

    #[test]
    fn test_intersect() {
        let a = Region::from_rect(Rect::new(0, 0, 10, 10));
        let mut b = Region::from_rect(Rect::new(5, 0, 10, 10));
        b.add(Rect::new(0, 20, 5, 5));
        let i = a.intersect(&b);
        assert_eq!(i.area(), 50);
    }

    #[test]
    fn test_add_empty_is_noop() {
        let mut region = Region::new();
        region.add(Rect::new(3, 3, 0, 10));
        assert!(region.is_empty());
    }
}
