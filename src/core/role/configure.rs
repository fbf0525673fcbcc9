//! Serial-tagged configure queue shared by xdg, layer and lock surfaces.

use std::collections::VecDeque;

/// Configures sent to the client and not acknowledged yet, oldest first.
#[derive(Debug, Clone)]
pub struct ConfigureQueue<T> {
    sent: VecDeque<(u32, T)>,
    acked: Option<(u32, T)>,
}

impl<T: Clone> ConfigureQueue<T> {
    pub fn new() -> Self {
        Self {
            sent: VecDeque::new(),
            acked: None,
        }
    }

    pub fn push(&mut self, serial: u32, configure: T) {
        self.sent.push_back((serial, configure));
    }

    /// Acknowledge `serial`. It and every older configure are dropped.
    /// Returns `None` when `serial` was never sent or already superseded.
    pub fn ack(&mut self, serial: u32) -> Option<T> {
        let index = self.sent.iter().position(|(s, _)| *s == serial)?;
        let acked = self.sent.drain(..=index).last()?;
        self.acked = Some(acked.clone());
        Some(acked.1)
    }

    /// Last acknowledged configure
    pub fn acked(&self) -> Option<&T> {
        self.acked.as_ref().map(|(_, c)| c)
    }

    pub fn acked_serial(&self) -> Option<u32> {
        self.acked.as_ref().map(|(s, _)| *s)
    }

    /// Most recent configure sent, acknowledged or not
    pub fn latest(&self) -> Option<&T> {
        self.sent.back().map(|(_, c)| c).or_else(|| self.acked())
    }

    /// Serial of the most recent configure sent
    pub fn latest_serial(&self) -> Option<u32> {
        self.sent.back().map(|(s, _)| *s).or_else(|| self.acked_serial())
    }

    pub fn has_pending(&self) -> bool {
        !self.sent.is_empty()
    }

    pub fn ever_acked(&self) -> bool {
        self.acked.is_some()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
        self.acked = None;
    }
}

impl<T: Clone> Default for ConfigureQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_drops_older() {
        let mut q = ConfigureQueue::new();
        q.push(10, 'a');
        q.push(11, 'b');
        q.push(12, 'c');
        assert_eq!(q.ack(11), Some('b'));
        // 10 was superseded by acking 11
        assert_eq!(q.ack(10), None);
        assert_eq!(q.acked_serial(), Some(11));
        assert!(q.has_pending());
        assert_eq!(q.ack(12), Some('c'));
        assert!(!q.has_pending());
    }

    #[test]
    fn test_unknown_serial() {
        let mut q: ConfigureQueue<()> = ConfigureQueue::new();
        q.push(1, ());
        assert_eq!(q.ack(2), None);
        assert!(!q.ever_acked());
        assert!(q.has_pending());
    }
}
