//! Frame pacing for render loops without a hardware vblank.

use std::time::{Duration, Instant};

/// Frame timing configuration
#[derive(Debug, Clone)]
pub struct FrameTimingConfig {
    /// Target frame interval (default: 16.67ms for 60Hz)
    pub target_interval: Duration,
    /// Longest a render loop sleeps, whatever the interval
    pub max_frame_time: Duration,
    /// Pace frames to the interval; false renders as fast as requested
    pub vsync: bool,
}

impl Default for FrameTimingConfig {
    fn default() -> Self {
        Self {
            target_interval: Duration::from_nanos(16_666_667),
            max_frame_time: Duration::from_millis(100),
            vsync: true,
        }
    }
}

impl FrameTimingConfig {
    pub fn for_refresh_rate(hz: u32) -> Self {
        Self {
            target_interval: Duration::from_nanos(1_000_000_000 / hz.max(1) as u64),
            ..Default::default()
        }
    }

    /// Same as `for_refresh_rate` with the rate in mHz, as outputs report it
    pub fn for_refresh_mhz(mhz: u32) -> Self {
        Self {
            target_interval: Duration::from_nanos(1_000_000_000_000 / mhz.max(1) as u64),
            ..Default::default()
        }
    }
}

/// Software vblank: tracks when the next tick is due.
pub struct FrameTiming {
    config: FrameTimingConfig,
    last_frame: Instant,
    frame_count: u64,
    fps_frames: u64,
    fps_update_time: Instant,
    current_fps: f64,
}

impl FrameTiming {
    pub fn new(config: FrameTimingConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_frame: now,
            frame_count: 0,
            fps_frames: 0,
            fps_update_time: now,
            current_fps: 0.0,
        }
    }

    pub fn config(&self) -> &FrameTimingConfig {
        &self.config
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.config.vsync = vsync;
    }

    /// Check if it's time for a new frame
    pub fn should_render(&self) -> bool {
        let elapsed = self.last_frame.elapsed();
        !self.config.vsync || elapsed >= self.config.target_interval || elapsed >= self.config.max_frame_time
    }

    /// Mark frame as started
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_count += 1;
        self.frame_count
    }

    /// Mark frame as complete (the tick it was shown on has passed)
    pub fn end_frame(&mut self) {
        let now = Instant::now();
        self.last_frame = now;
        self.fps_frames += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= Duration::from_secs(1) {
            self.current_fps = self.fps_frames as f64 / fps_elapsed.as_secs_f64();
            self.fps_frames = 0;
            self.fps_update_time = now;
        }
    }

    pub fn fps(&self) -> f64 {
        self.current_fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Get time until next frame
    pub fn time_until_next_frame(&self) -> Duration {
        if !self.config.vsync {
            return Duration::ZERO;
        }
        let elapsed = self.last_frame.elapsed();
        let interval = self.config.target_interval.min(self.config.max_frame_time);
        interval.saturating_sub(elapsed)
    }

    /// Block the calling thread until the next tick.
    pub fn wait_for_next_frame(&self) {
        let remaining = self.time_until_next_frame();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(FrameTimingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_timing_config() {
        let config = FrameTimingConfig::for_refresh_rate(120);
        assert!(config.target_interval < Duration::from_millis(10));
        let config = FrameTimingConfig::for_refresh_mhz(60_000);
        assert_eq!(config.target_interval, Duration::from_nanos(16_666_666));
    }

    #[test]
    fn test_no_vsync_never_waits() {
        let mut timing = FrameTiming::new(FrameTimingConfig {
            vsync: false,
            ..Default::default()
        });
        timing.begin_frame();
        timing.end_frame();
        assert!(timing.should_render());
        assert_eq!(timing.time_until_next_frame(), Duration::ZERO);
    }

    #[test]
    fn test_waits_within_interval() {
        let mut timing = FrameTiming::default();
        timing.end_frame();
        assert!(timing.time_until_next_frame() <= Duration::from_nanos(16_666_667));
    }
}
