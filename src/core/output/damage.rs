//! Output damage with buffer-age history.

use std::collections::VecDeque;

use crate::util::geometry::Rect;
use crate::util::region::Region;

/// Past this many rects damage collapses to its bounding box.
const MAX_DAMAGE_RECTS: usize = 32;

/// Damage for one frame, in output-local physical pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDamage {
    /// What changed since the previous frame
    pub new: Region,
    /// What must be redrawn into the target image
    pub repaint: Region,
    pub full: bool,
}

#[derive(Debug)]
pub struct OutputDamage {
    pending: Region,
    /// Damage of previous frames, most recent first, at most K-1 entries
    history: VecDeque<Region>,
    image_count: usize,
    force_full: bool,
}

impl OutputDamage {
    pub fn new(image_count: usize) -> Self {
        Self {
            pending: Region::new(),
            history: VecDeque::new(),
            image_count: image_count.max(1),
            force_full: true,
        }
    }

    pub fn add(&mut self, region: &Region) {
        self.pending.union(region);
        self.pending.simplify(MAX_DAMAGE_RECTS);
    }

    pub fn add_rect(&mut self, rect: Rect) {
        self.pending.add(rect);
        self.pending.simplify(MAX_DAMAGE_RECTS);
    }

    /// Next frame repaints everything (mode change, new output, ...)
    pub fn damage_all(&mut self) {
        self.force_full = true;
    }

    pub fn set_image_count(&mut self, image_count: usize) {
        self.image_count = image_count.max(1);
        self.history.clear();
        self.force_full = true;
    }

    pub fn has_damage(&self) -> bool {
        self.force_full || !self.pending.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Consume pending damage for a frame drawn into an image of `age`.
    pub fn take_frame(&mut self, age: u32, output: Rect) -> FrameDamage {
        let full_region = Region::from_rect(output);
        let forced = std::mem::take(&mut self.force_full);
        let new = if forced {
            full_region.clone()
        } else {
            self.pending.intersect_rect(&output)
        };
        self.pending.clear();

        let age = age as usize;
        let usable = age >= 1 && age <= self.image_count && age - 1 <= self.history.len();
        let (mut repaint, full) = if usable && !forced {
            let mut repaint = new.clone();
            for past in self.history.iter().take(age - 1) {
                repaint.union(past);
            }
            (repaint, false)
        } else {
            (full_region, true)
        };
        repaint.simplify(MAX_DAMAGE_RECTS);

        self.history.push_front(new.clone());
        self.history.truncate(self.image_count.saturating_sub(1));

        FrameDamage { new, repaint, full }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: Rect = Rect::new(0, 0, 100, 100);

    #[test]
    fn test_first_frame_is_full() {
        let mut damage = OutputDamage::new(2);
        let frame = damage.take_frame(1, OUTPUT);
        assert!(frame.full);
        assert_eq!(frame.repaint.area(), 100 * 100);
    }

    #[test]
    fn test_no_change_means_no_new_damage() {
        let mut damage = OutputDamage::new(2);
        damage.take_frame(0, OUTPUT);
        let frame = damage.take_frame(1, OUTPUT);
        assert!(frame.new.is_empty());
        assert!(frame.repaint.is_empty());
    }

    #[test]
    fn test_buffer_age_accumulates_history() {
        let mut damage = OutputDamage::new(3);
        damage.take_frame(0, OUTPUT);

        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(50, 50, 10, 10);
        let c = Rect::new(80, 0, 10, 10);

        damage.add_rect(a);
        damage.take_frame(1, OUTPUT);
        damage.add_rect(b);
        damage.take_frame(2, OUTPUT);
        damage.add_rect(c);

        // Image last used 3 frames ago misses a, b and c
        let frame = damage.take_frame(3, OUTPUT);
        assert!(!frame.full);
        assert_eq!(frame.new, Region::from_rect(c));
        let mut expected = Region::from_rect(c);
        expected.add(b);
        expected.add(a);
        assert_eq!(frame.repaint.area(), expected.area());
        assert!(frame.repaint.contains(a.loc()) && frame.repaint.contains(b.loc()));
        assert_eq!(damage.history_len(), 2);
    }

    #[test]
    fn test_age_beyond_history_is_full() {
        let mut damage = OutputDamage::new(2);
        damage.take_frame(0, OUTPUT);
        damage.add_rect(Rect::new(0, 0, 5, 5));
        let frame = damage.take_frame(3, OUTPUT);
        assert!(frame.full);
    }
}
