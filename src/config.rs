//! Compositor configuration.
//!
//! `CompositorConfig::default()` gives a usable headless setup; `from_env`
//! layers `VITRINE_*` environment overrides on top of it.

use std::time::Duration;

use crate::core::feedback::dmabuf::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR, DRM_FORMAT_XRGB8888};

/// Configuration for the compositor
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Socket name (e.g., "wayland-0"). `None` picks the first free one.
    pub socket_name: Option<String>,
    /// Offscreen output width
    pub output_width: i32,
    /// Offscreen output height
    pub output_height: i32,
    /// Offscreen output integer scale
    pub output_scale: i32,
    /// Offscreen output refresh rate in mHz
    pub refresh_mhz: u32,
    /// Number of images in the offscreen swapchain
    pub image_count: usize,
    /// Whether the offscreen output accepts partial damage hints
    pub buffer_damage_support: bool,
    /// How long a drop may wait for the destination client
    pub drop_timeout: Duration,
    /// (format, modifier) pairs advertised by default DMA-BUF feedback
    pub dmabuf_formats: Vec<(u32, u64)>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            socket_name: None,
            output_width: 1920,
            output_height: 1080,
            output_scale: 1,
            refresh_mhz: 60_000,
            image_count: 2,
            buffer_damage_support: true,
            drop_timeout: Duration::from_millis(100),
            dmabuf_formats: vec![
                (DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR),
                (DRM_FORMAT_XRGB8888, DRM_FORMAT_MOD_LINEAR),
            ],
        }
    }
}

impl CompositorConfig {
    /// Default configuration with `VITRINE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("VITRINE_SOCKET") {
            if !name.is_empty() {
                self.socket_name = Some(name);
            }
        }
        if let Some((w, h)) = lookup("VITRINE_OUTPUT_SIZE").and_then(|v| parse_size(&v)) {
            self.output_width = w;
            self.output_height = h;
        }
        override_parsed(&lookup, "VITRINE_OUTPUT_SCALE", &mut self.output_scale, |v: &i32| *v >= 1);
        override_parsed(&lookup, "VITRINE_REFRESH_MHZ", &mut self.refresh_mhz, |v: &u32| *v > 0);
        override_parsed(&lookup, "VITRINE_IMAGE_COUNT", &mut self.image_count, |v: &usize| (1..=4).contains(v));
        override_parsed(&lookup, "VITRINE_BUFFER_DAMAGE", &mut self.buffer_damage_support, |_| true);
        let mut drop_ms = self.drop_timeout.as_millis() as u64;
        override_parsed(&lookup, "VITRINE_DROP_TIMEOUT_MS", &mut drop_ms, |v: &u64| *v > 0);
        self.drop_timeout = Duration::from_millis(drop_ms);
    }

    /// Refresh interval derived from `refresh_mhz`.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000_000 / self.refresh_mhz.max(1) as u64)
    }
}

fn override_parsed<T, F, V>(lookup: &F, key: &str, slot: &mut T, valid: V)
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => *slot = value,
        _ => tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw),
    }
}

fn parse_size(raw: &str) -> Option<(i32, i32)> {
    let (w, h) = raw.trim().split_once('x')?;
    let w: i32 = w.parse().ok()?;
    let h: i32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = CompositorConfig::default();
        assert_eq!(config.socket_name, None);
        assert_eq!(config.output_width, 1920);
        assert_eq!(config.output_height, 1080);
        assert_eq!(config.image_count, 2);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("VITRINE_OUTPUT_SIZE", "800x600"),
            ("VITRINE_OUTPUT_SCALE", "2"),
            ("VITRINE_IMAGE_COUNT", "9"),
            ("VITRINE_REFRESH_MHZ", "abc"),
        ]
        .into_iter()
        .collect();
        let mut config = CompositorConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!((config.output_width, config.output_height), (800, 600));
        assert_eq!(config.output_scale, 2);
        // Out of range and unparseable values keep the defaults
        assert_eq!(config.image_count, 2);
        assert_eq!(config.refresh_mhz, 60_000);
    }

    #[test]
    fn test_frame_interval() {
        let config = CompositorConfig::default();
        assert_eq!(config.frame_interval(), Duration::from_nanos(16_666_666));
    }
}
