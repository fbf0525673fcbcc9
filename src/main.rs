use std::time::Duration;

use anyhow::{Context, Result};
use vitrine::core::backend::OffscreenBackend;
use vitrine::core::render::renderer::HeadlessRenderer;
use vitrine::util::logging::MAIN;
use vitrine::{wlog, Compositor, CompositorConfig, CompositorEvent, CompositorState};

fn main() -> Result<()> {
    // Default log level
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,vitrine=debug");
    }
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .init();

    let config = CompositorConfig::from_env();
    let backend = OffscreenBackend::new(config.clone());
    let mut state = CompositorState::new(config.clone(), Box::new(backend), HeadlessRenderer::shared())
        .context("Failed to initialize the offscreen backend")?;

    let mut compositor = Compositor::new(&config)?;
    compositor.start(&mut state)?;
    tracing::info!("Headless compositor running, WAYLAND_DISPLAY={}", compositor.socket_name());

    // Poll often enough that presentation events are not held back a frame
    let timeout = (config.frame_interval() / 4).max(Duration::from_millis(1));
    loop {
        compositor
            .dispatch_timeout(&mut state, timeout)
            .context("Compositor loop failed")?;
        for event in compositor.take_events(&mut state) {
            match event {
                CompositorEvent::ClientFlagged { client_id, error } => {
                    tracing::warn!("Client {:?} flagged: {}", client_id, error);
                }
                other => wlog!(MAIN, "{:?}", other),
            }
        }
    }
}
