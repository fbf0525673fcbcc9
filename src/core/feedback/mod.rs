//! Client-visible results of presented frames: frame callbacks,
//! presentation feedback, captures and DMA-BUF format feedback.

pub mod dmabuf;
pub mod frame_callback;
pub mod presentation;
pub mod queue;
pub mod screencopy;

pub use dmabuf::{DmaFeedback, DmaFeedbackBuilder, FeedbackError, FormatTable, Tranche, TrancheFlags};
pub use frame_callback::{CallbackSink, FrameCallback, RecordingCallback};
pub use presentation::{FeedbackSink, PresentationFeedback, PresentationFlags, PresentationInfo, RecordingFeedback};
pub use queue::{FrameBatch, FrameQueue};
pub use screencopy::{CopyConstraints, CopyResult, ScreencopyRequest, ScreencopySink};
