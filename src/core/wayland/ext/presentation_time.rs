//! wp_presentation: per-commit presentation feedback.

use wayland_protocols::wp::presentation_time::server::{
    wp_presentation::{self, WpPresentation},
    wp_presentation_feedback::{self, WpPresentationFeedback},
};
use wayland_server::{Dispatch, DisplayHandle, GlobalDispatch, Resource};

use crate::core::feedback::presentation::{FeedbackSink, PresentationFeedback, PresentationInfo};
use crate::core::output::OutputId;
use crate::core::state::{CompositorState, OutputResources};
use crate::core::wayland::{report, surface_id};
use crate::util::logging::FEEDBACK;
use crate::wtrace;

/// Delivers feedback events to a `wp_presentation_feedback`. Holds the
/// shared `wl_output` table so `sync_output` can be sent from wherever
/// the frame completes.
struct FeedbackResource {
    resource: WpPresentationFeedback,
    outputs: OutputResources,
}

impl FeedbackSink for FeedbackResource {
    fn sync_output(&self, output: OutputId) {
        if !self.resource.is_alive() {
            return;
        }
        let Some(client) = self.resource.client() else {
            return;
        };
        let outputs = self.outputs.lock();
        for wl_output in outputs.get(&output).into_iter().flatten() {
            if wl_output.client().is_some_and(|c| c.id() == client.id()) {
                self.resource.sync_output(wl_output);
            }
        }
    }

    fn presented(&self, info: &PresentationInfo) {
        if !self.resource.is_alive() {
            return;
        }
        self.resource.presented(
            info.tv_sec_hi(),
            info.tv_sec_lo(),
            info.tv_nsec(),
            info.refresh_ns,
            info.seq_hi(),
            info.seq_lo(),
            wp_presentation_feedback::Kind::from_bits_truncate(info.flags.bits()),
        );
    }

    fn discarded(&self) {
        if self.resource.is_alive() {
            self.resource.discarded();
        }
    }
}

impl GlobalDispatch<WpPresentation, ()> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &wayland_server::Client,
        resource: wayland_server::New<WpPresentation>,
        _global_data: &(),
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        let presentation = data_init.init(resource, ());
        presentation.clock_id(state.backend().presentation_clock().id as u32);
    }
}

impl Dispatch<WpPresentation, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &wayland_server::Client,
        resource: &WpPresentation,
        request: wp_presentation::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        if let wp_presentation::Request::Feedback { surface, callback } = request {
            let feedback = data_init.init(callback, ());
            let Some(id) = surface_id(&surface) else {
                feedback.discarded();
                return;
            };
            wtrace!(FEEDBACK, "Presentation feedback requested for surface {}", id);
            let sink = FeedbackResource {
                resource: feedback,
                outputs: state.output_resources.clone(),
            };
            let result = state.surface_presentation_feedback(id, PresentationFeedback::new(sink));
            report(state, Some(id), resource, result);
        }
    }
}

impl Dispatch<WpPresentationFeedback, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &wayland_server::Client,
        _resource: &WpPresentationFeedback,
        _request: wp_presentation_feedback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut wayland_server::DataInit<'_, Self>,
    ) {
        // wp_presentation_feedback has no requests
    }
}
