//! Offscreen backend.
//!
//! Renders into an in-memory swapchain with the `HeadlessRenderer` and paces
//! frames with a software vblank. Each running output owns an
//! `OffscreenWorker` thread fed through a bounded mailbox. A backend built
//! with `OffscreenBackend::manual` spawns no threads; frames are stepped
//! explicitly with `OffscreenOutput::step_frame`.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::CompositorConfig;
use crate::core::context::{CompositorContext, PresentationClock};
use crate::core::errors::{CoreError, Result};
use crate::core::feedback::dmabuf::{DmaFeedback, DmaFeedbackBuilder, TrancheFlags};
use crate::core::feedback::presentation::{PresentationFlags, PresentationInfo};
use crate::core::output::{FrameReport, OutputId, OutputInfo, OutputMode, OutputShared, ScenePainter};
use crate::core::runtime::{FrameTiming, FrameTimingConfig};
use crate::core::surface::transform::Transform;
use crate::util::geometry::Size;
use crate::util::logging::BACKEND;
use crate::util::region::Region;
use crate::wlog;

use super::{Backend, BackendError, BackendEvent, BackendOutput, FrameTarget};

const RENDER_NODE: &str = "/dev/dri/renderD128";
const SHUTDOWN_ACK_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Swapchain
// ============================================================================

#[derive(Debug)]
struct Swapchain {
    /// Age of each image, 0 = undefined content
    ages: Vec<u32>,
    current: usize,
}

impl Swapchain {
    fn new(count: usize) -> Self {
        Self {
            ages: vec![0; count.max(1)],
            current: 0,
        }
    }

    /// The current image was shown; every other image got one frame older.
    fn present(&mut self) {
        for age in self.ages.iter_mut().filter(|a| **a > 0) {
            *age += 1;
        }
        self.ages[self.current] = 1;
        self.current = (self.current + 1) % self.ages.len();
    }

    fn invalidate(&mut self) {
        self.ages.iter_mut().for_each(|a| *a = 0);
    }
}

// ============================================================================
// Worker
// ============================================================================

enum WorkerSignal {
    RepaintRequested,
    /// Stop after the current frame and acknowledge on the sender
    Shutdown(SyncSender<()>),
}

/// Render loop thread of one offscreen output.
pub struct OffscreenWorker {
    mailbox: SyncSender<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl OffscreenWorker {
    fn spawn(output: Weak<OffscreenOutput>, timing: FrameTimingConfig, name: &str) -> Result<Self> {
        let (mailbox, rx) = mpsc::sync_channel(2);
        let handle = std::thread::Builder::new()
            .name(format!("vitrine-{}", name))
            .spawn(move || worker_loop(output, rx, FrameTiming::new(timing)))
            .map_err(CoreError::io)?;
        Ok(Self {
            mailbox,
            handle: Some(handle),
        })
    }

    /// Returns false when the thread is gone.
    fn wake(&self) -> bool {
        match self.mailbox.try_send(WorkerSignal::RepaintRequested) {
            // A wake-up is already queued
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            // Last reference dropped by the worker itself, it exits on its own
            return;
        }
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.mailbox.send(WorkerSignal::Shutdown(ack_tx)).is_ok()
            && ack_rx.recv_timeout(SHUTDOWN_ACK_TIMEOUT).is_err()
        {
            tracing::warn!("Offscreen worker did not acknowledge shutdown");
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Offscreen worker panicked");
        }
    }
}

impl Drop for OffscreenWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(output: Weak<OffscreenOutput>, rx: Receiver<WorkerSignal>, mut timing: FrameTiming) {
    wlog!(BACKEND, "Offscreen worker started");
    loop {
        match rx.recv() {
            Ok(WorkerSignal::RepaintRequested) => {}
            Ok(WorkerSignal::Shutdown(ack)) => {
                let _ = ack.send(());
                break;
            }
            Err(_) => break,
        }

        // Keep rendering while repaints arrive during frames
        loop {
            let Some(output) = output.upgrade() else {
                return;
            };
            let again = output.run_frame(Some(&mut timing)).1;
            drop(output);
            if !again {
                break;
            }
            if let Ok(WorkerSignal::Shutdown(ack)) = rx.try_recv() {
                let _ = ack.send(());
                wlog!(BACKEND, "Offscreen worker stopped");
                return;
            }
        }
    }
    wlog!(BACKEND, "Offscreen worker stopped");
}

// ============================================================================
// Output
// ============================================================================

pub struct OffscreenOutput {
    id: OutputId,
    name: String,
    ctx: CompositorContext,
    shared: Arc<OutputShared>,
    painter: Arc<ScenePainter>,
    swapchain: Mutex<Swapchain>,
    modes: Vec<OutputMode>,
    current_mode: AtomicUsize,
    buffer_damage: bool,
    vsync: AtomicBool,
    suspended: AtomicBool,
    seq: AtomicU64,
    last_damage: Mutex<Region>,
    worker: Mutex<Option<OffscreenWorker>>,
}

impl OffscreenOutput {
    fn new(
        ctx: CompositorContext,
        info: &OutputInfo,
        shared: Arc<OutputShared>,
        painter: Arc<ScenePainter>,
        image_count: usize,
        buffer_damage: bool,
    ) -> Self {
        Self {
            id: shared.id,
            name: info.name.clone(),
            ctx,
            shared,
            painter,
            swapchain: Mutex::new(Swapchain::new(image_count)),
            modes: info.modes.clone(),
            current_mode: AtomicUsize::new(info.current_mode),
            buffer_damage,
            vsync: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            last_damage: Mutex::new(Region::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn shared(&self) -> &Arc<OutputShared> {
        &self.shared
    }

    /// Damage hint of the last painted frame
    pub fn last_damage(&self) -> Region {
        self.last_damage.lock().clone()
    }

    pub fn is_threaded(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Render one pending frame on the calling thread.
    ///
    /// Only meaningful for outputs of a manual backend; returns `None` when
    /// no repaint was pending or the frame was discarded.
    pub fn step_frame(&self) -> Option<FrameReport> {
        self.run_frame(None).0
    }

    /// Paint, present and report one frame. The second value is true when
    /// another repaint is already pending.
    fn run_frame(&self, timing: Option<&mut FrameTiming>) -> (Option<FrameReport>, bool) {
        if self.suspended.load(Ordering::Acquire) {
            return (None, false);
        }
        match self.painter.paint(&self.shared, self) {
            Ok(Some(report)) => {
                self.swapchain.lock().present();
                if let Some(timing) = timing {
                    timing.begin_frame();
                    timing.wait_for_next_frame();
                    timing.end_frame();
                }
                let info = PresentationInfo {
                    time: self.ctx.clock().now(),
                    refresh_ns: self.shared.refresh_ns(),
                    seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
                    flags: self.presentation_flags(),
                };
                self.ctx.post(BackendEvent::FramePresented {
                    output: self.id,
                    frame: report.frame,
                    info,
                });
                let again = self.shared.scheduler.finish_frame();
                (Some(report), again)
            }
            Ok(None) => (None, false),
            Err(e) => {
                let frame = self.shared.scheduler.frame();
                tracing::warn!("Output {} frame {} discarded: {}", self.id, frame, e);
                self.ctx.post(BackendEvent::FrameDiscarded { output: self.id, frame });
                let again = self.shared.scheduler.finish_frame();
                (None, again)
            }
        }
    }

    fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
        if !suspended && self.shared.scheduler.state() == crate::core::output::RepaintState::PendingRepaint {
            self.repaint();
        }
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        drop(worker);
    }
}

impl FrameTarget for OffscreenOutput {
    fn image_count(&self) -> usize {
        self.swapchain.lock().ages.len()
    }

    fn current_image(&self) -> usize {
        self.swapchain.lock().current
    }

    fn image_age(&self, index: usize) -> u32 {
        self.swapchain.lock().ages.get(index).copied().unwrap_or(0)
    }

    fn has_buffer_damage_support(&self) -> bool {
        self.buffer_damage
    }

    fn set_damage(&self, region: &Region) {
        *self.last_damage.lock() = region.clone();
    }
}

impl BackendOutput for OffscreenOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn repaint(&self) -> bool {
        if self.suspended.load(Ordering::Acquire) {
            return false;
        }
        match &*self.worker.lock() {
            Some(worker) => worker.wake(),
            // Manual outputs are stepped by their owner
            None => true,
        }
    }

    fn modes(&self) -> Vec<OutputMode> {
        self.modes.clone()
    }

    fn set_mode(&self, index: usize) -> Result<()> {
        if index >= self.modes.len() {
            return Err(CoreError::backend_error(format!("{}: no mode {}", self.name, index)));
        }
        self.current_mode.store(index, Ordering::Relaxed);
        self.swapchain.lock().invalidate();
        wlog!(BACKEND, "{} switched to mode {}", self.name, index);
        Ok(())
    }

    fn vsync(&self) -> bool {
        self.vsync.load(Ordering::Relaxed)
    }

    fn set_vsync(&self, enabled: bool) -> bool {
        self.vsync.store(enabled, Ordering::Relaxed);
        true
    }

    fn presentation_flags(&self) -> PresentationFlags {
        if self.vsync() {
            PresentationFlags::VSYNC
        } else {
            PresentationFlags::empty()
        }
    }

    fn shutdown(&self) {
        self.stop_worker();
    }
}

impl std::fmt::Debug for OffscreenOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffscreenOutput")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("swapchain", &*self.swapchain.lock())
            .finish()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Outputs currently rendering, by id
pub type RunningOutputs = Arc<Mutex<HashMap<OutputId, Arc<OffscreenOutput>>>>;

pub struct OffscreenBackend {
    config: CompositorConfig,
    threaded: bool,
    ctx: Option<CompositorContext>,
    infos: Vec<OutputInfo>,
    running: RunningOutputs,
    feedback: Option<Arc<DmaFeedback>>,
    suspended: bool,
}

impl OffscreenBackend {
    /// Backend with one worker thread per output.
    pub fn new(config: CompositorConfig) -> Self {
        Self::build(config, true)
    }

    /// Backend without threads; frames are stepped by the caller.
    pub fn manual(config: CompositorConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: CompositorConfig, threaded: bool) -> Self {
        let info = Self::output_info(&config, 1);
        Self {
            config,
            threaded,
            ctx: None,
            infos: vec![info],
            running: RunningOutputs::default(),
            feedback: None,
            suspended: false,
        }
    }

    /// Replace the enumerated outputs.
    pub fn with_outputs(mut self, infos: Vec<OutputInfo>) -> Self {
        self.infos = infos;
        self
    }

    /// Description of an offscreen output built from `config`.
    pub fn output_info(config: &CompositorConfig, index: usize) -> OutputInfo {
        OutputInfo {
            name: format!("OFFSCREEN-{}", index),
            description: "Vitrine offscreen output".into(),
            make: "Vitrine".into(),
            model: "Offscreen".into(),
            physical_size_mm: Size::new(0, 0),
            modes: vec![OutputMode {
                size: Size::new(config.output_width, config.output_height),
                refresh_mhz: config.refresh_mhz,
                preferred: true,
            }],
            current_mode: 0,
            scale: config.output_scale,
            transform: Transform::Normal,
        }
    }

    pub fn output(&self, id: OutputId) -> Option<Arc<OffscreenOutput>> {
        self.running.lock().get(&id).cloned()
    }

    /// Shared view of the running outputs. Stays valid after the backend
    /// is boxed into the compositor state, so manual outputs can still be
    /// stepped.
    pub fn running_outputs(&self) -> RunningOutputs {
        self.running.clone()
    }

    /// Simulate an unplug: stop the render loop and tell the dispatch thread.
    pub fn unplug(&mut self, id: OutputId) -> Result<()> {
        let output = self.running.lock().remove(&id).ok_or(BackendError::UnknownOutput(id))?;
        output.stop_worker();
        if let Some(ctx) = &self.ctx {
            ctx.post(BackendEvent::OutputUnplugged { output: id });
        }
        wlog!(BACKEND, "Output {} unplugged", id);
        Ok(())
    }

    fn build_feedback(&self) -> Result<DmaFeedback> {
        let device = render_node_device().unwrap_or(0);
        let feedback = DmaFeedbackBuilder::new(device)
            .add_tranche(device, TrancheFlags::empty(), self.config.dmabuf_formats.clone())
            .build()?;
        Ok(feedback)
    }
}

impl Backend for OffscreenBackend {
    fn name(&self) -> &'static str {
        "offscreen"
    }

    fn init(&mut self, ctx: &CompositorContext) -> Result<()> {
        if self.infos.is_empty() {
            return Err(BackendError::NoOutputs.into());
        }
        if !self.config.dmabuf_formats.is_empty() {
            self.feedback = Some(Arc::new(self.build_feedback()?));
        }
        self.ctx = Some(ctx.clone());
        tracing::info!(
            "Offscreen backend ready: {} output(s), {} mode",
            self.infos.len(),
            if self.threaded { "threaded" } else { "manual" }
        );
        Ok(())
    }

    fn uninit(&mut self) {
        for (_, output) in self.running.lock().drain() {
            output.stop_worker();
        }
        self.ctx = None;
    }

    fn suspend(&mut self) -> Result<()> {
        if self.suspended {
            return Err(BackendError::Suspended.into());
        }
        self.suspended = true;
        for output in self.running.lock().values() {
            output.set_suspended(true);
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        for output in self.running.lock().values() {
            output.set_suspended(false);
        }
        Ok(())
    }

    fn outputs(&self) -> Vec<OutputInfo> {
        self.infos.clone()
    }

    fn start_output(
        &mut self,
        index: usize,
        shared: Arc<OutputShared>,
        painter: Arc<ScenePainter>,
    ) -> Result<Arc<dyn BackendOutput>> {
        let ctx = self
            .ctx
            .clone()
            .ok_or_else(|| CoreError::backend_error("offscreen backend not initialized"))?;
        let info = self
            .infos
            .get(index)
            .ok_or_else(|| CoreError::backend_error(format!("no output at index {}", index)))?;
        let refresh_mhz = info.mode().map(|m| m.refresh_mhz).unwrap_or(self.config.refresh_mhz);

        let output = Arc::new(OffscreenOutput::new(
            ctx,
            info,
            shared,
            painter,
            self.config.image_count,
            self.config.buffer_damage_support,
        ));
        if self.threaded {
            let worker = OffscreenWorker::spawn(
                Arc::downgrade(&output),
                FrameTimingConfig::for_refresh_mhz(refresh_mhz),
                &info.name,
            )?;
            *output.worker.lock() = Some(worker);
        }
        output.set_suspended(self.suspended);
        wlog!(BACKEND, "Started output {} ({})", output.id, info.name);
        self.running.lock().insert(output.id, output.clone());
        Ok(output)
    }

    fn stop_output(&mut self, output: OutputId) {
        let stopped = self.running.lock().remove(&output);
        if let Some(output) = stopped {
            output.stop_worker();
        }
    }

    fn default_feedback(&self) -> Option<Arc<DmaFeedback>> {
        self.feedback.clone()
    }

    fn presentation_clock(&self) -> PresentationClock {
        self.ctx.as_ref().map(|c| c.clock()).unwrap_or_default()
    }
}

impl Drop for OffscreenBackend {
    fn drop(&mut self) {
        self.uninit();
    }
}

/// `st_rdev` of the first render node, if there is one.
fn render_node_device() -> Option<libc::dev_t> {
    let path = CString::new(RENDER_NODE).ok()?;
    // SAFETY: zeroed stat is a valid out-parameter, path is NUL terminated.
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::stat(path.as_ptr(), &mut st) };
    (rc == 0).then_some(st.st_rdev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{Output, RepaintState};
    use crate::core::render::renderer::HeadlessRenderer;
    use crate::core::render::scene::Scene;
    use parking_lot::RwLock;

    fn start(threaded: bool) -> (OffscreenBackend, Arc<OffscreenOutput>, Arc<OutputShared>, Receiver<BackendEvent>) {
        let (ctx, rx) = CompositorContext::new();
        let config = CompositorConfig {
            output_width: 64,
            output_height: 32,
            image_count: 3,
            ..Default::default()
        };
        let mut backend = OffscreenBackend::build(config, threaded);
        backend.init(&ctx).unwrap();
        let info = backend.outputs()[0].clone();
        let shared = Arc::new(OutputShared::new(
            7,
            Output::initial_geometry(&info, Default::default()),
            3,
            info.modes[0].refresh_ns(),
        ));
        let painter = Arc::new(ScenePainter::new(
            ctx,
            Arc::new(RwLock::new(Scene::new())),
            HeadlessRenderer::shared(),
        ));
        backend.start_output(0, shared.clone(), painter).unwrap();
        let output = backend.output(7).unwrap().clone();
        (backend, output, shared, rx)
    }

    #[test]
    fn test_swapchain_ages() {
        let mut chain = Swapchain::new(3);
        chain.present();
        chain.present();
        assert_eq!(chain.ages, vec![2, 1, 0]);
        chain.present();
        chain.present();
        // Image 0 was shown 4 frames ago, then again now
        assert_eq!(chain.ages, vec![1, 3, 2]);
        assert_eq!(chain.current, 1);
    }

    #[test]
    fn test_manual_step_reports_presentation() {
        let (_backend, output, shared, rx) = start(false);
        assert!(output.step_frame().is_none());

        assert!(shared.scheduler.request_repaint());
        let report = output.step_frame().unwrap();
        assert_eq!(report.frame, 1);
        // First frame is always a full repaint
        assert_eq!(report.damage.repaint.bounds(), shared.geometry().local_rect());
        assert_eq!(shared.scheduler.state(), RepaintState::Idle);
        match rx.try_recv().unwrap() {
            BackendEvent::FramePresented { output, frame, info } => {
                assert_eq!((output, frame, info.seq), (7, 1, 1));
                assert!(info.flags.contains(PresentationFlags::VSYNC));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(output.image_age(0), 1);
    }

    #[test]
    fn test_worker_renders_and_shuts_down() {
        let (mut backend, output, shared, rx) = start(true);
        assert!(output.is_threaded());
        assert!(shared.scheduler.request_repaint());
        assert!(output.repaint());
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, BackendEvent::FramePresented { frame: 1, .. }));

        backend.stop_output(7);
        assert!(!output.is_threaded());
        // No worker left to wake
        assert!(output.repaint());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_unplug_posts_event() {
        let (mut backend, _output, _shared, rx) = start(false);
        backend.unplug(7).unwrap();
        assert!(matches!(rx.try_recv().unwrap(), BackendEvent::OutputUnplugged { output: 7 }));
        assert!(backend.unplug(7).is_err());
    }

    #[test]
    fn test_default_feedback_has_main_tranche() {
        let (backend, ..) = start(false);
        let feedback = backend.default_feedback().unwrap();
        assert_eq!(feedback.tranches().len(), 1);
        assert_eq!(feedback.tranches()[0].device, feedback.main_device());
    }

    #[test]
    fn test_offscreen_has_no_leases() {
        let (mut backend, ..) = start(false);
        let err = backend.create_lease(&[7]).unwrap_err();
        assert!(matches!(err, CoreError::Backend(_)));
        assert_eq!(backend.presentation_clock(), PresentationClock::MONOTONIC);
    }

    #[test]
    fn test_init_without_outputs_fails() {
        let (ctx, _rx) = CompositorContext::new();
        let mut backend = OffscreenBackend::manual(CompositorConfig::default()).with_outputs(Vec::new());
        assert!(backend.init(&ctx).is_err());
    }
}
