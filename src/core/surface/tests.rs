use std::sync::Arc;

use crate::core::feedback::frame_callback::RecordingCallback;
use crate::core::output::{OutputId, RepaintState};
use crate::core::role::positioner::Positioner;
use crate::core::role::RoleKind;
use crate::core::state::test_support::{shm_buffer, state};
use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::util::geometry::{Point, Rect, Size};

fn first_output(state: &CompositorState) -> OutputId {
    *state.outputs.keys().next().unwrap()
}

fn attach(state: &mut CompositorState, id: SurfaceId, width: i32, height: i32) {
    let buffer = shm_buffer(state, width, height);
    state.surface_attach(id, Some(buffer), Point::default(), 6).unwrap();
    state.surface_damage(id, Rect::new(0, 0, width, height)).unwrap();
}

fn toplevel_serial(state: &CompositorState, id: SurfaceId) -> u32 {
    state.with_toplevel(id, |t| t.xdg.configures.latest_serial()).unwrap().unwrap()
}

/// Toplevel that went through the initial configure and is mapped.
fn mapped_toplevel(state: &mut CompositorState, width: i32, height: i32) -> SurfaceId {
    let id = state.create_surface(None, None);
    state.get_xdg_surface(id, None).unwrap();
    state.get_toplevel(id, None).unwrap();
    state.commit_surface(id).unwrap();
    let serial = toplevel_serial(state, id);
    state.xdg_surface_ack_configure(id, serial).unwrap();
    attach(state, id, width, height);
    state.commit_surface(id).unwrap();
    id
}

#[test]
fn test_surface_init() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    let surface = state.surface(id).unwrap().read();
    assert_eq!(surface.role_kind(), RoleKind::None);
    assert!(!surface.mapped);
    assert!(!surface.current.has_buffer());
    assert_eq!(surface.children, vec![id]);
}

#[test]
fn test_commit_applies_last_pending_state() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    for (n, scale) in [1, 2, 3, 2, 1].into_iter().enumerate() {
        let side = 12 * (n as i32 + 1);
        attach(&mut state, id, side, side);
        state.surface_set_buffer_scale(id, scale).unwrap();
        state.commit_surface(id).unwrap();

        let surface = state.surface(id).unwrap().read();
        assert_eq!(surface.current.scale, scale);
        assert_eq!(surface.current.size(), Size::new(side / scale, side / scale));
        assert!(surface.pending.buffer.is_unchanged());
    }
}

#[test]
fn test_pending_state_is_not_visible_before_commit() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    attach(&mut state, id, 10, 10);
    state.surface_set_buffer_scale(id, 2).unwrap();
    {
        let surface = state.surface(id).unwrap().read();
        assert!(!surface.current.has_buffer());
        assert_eq!(surface.current.scale, 1);
    }
    state.commit_surface(id).unwrap();
    assert_eq!(state.surface(id).unwrap().read().current.size(), Size::new(5, 5));
}

#[test]
fn test_refused_commit_leaves_current_untouched() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    attach(&mut state, id, 10, 10);
    state.commit_surface(id).unwrap();

    // 10 is not a multiple of 3
    attach(&mut state, id, 10, 10);
    state.surface_set_buffer_scale(id, 3).unwrap();
    assert!(state.commit_surface(id).is_err());
    let surface = state.surface(id).unwrap().read();
    assert_eq!(surface.current.scale, 1);
    assert_eq!(surface.current.size(), Size::new(10, 10));
}

#[test]
fn test_synchronized_subsurfaces_follow_parent_commit() {
    let (mut state, _running) = state();
    let parent = mapped_toplevel(&mut state, 100, 100);
    let a = state.create_surface(None, None);
    let b = state.create_surface(None, None);
    state.create_subsurface(a, parent, None).unwrap();
    state.create_subsurface(b, parent, None).unwrap();
    state.subsurface_set_position(a, Point::new(10, 10)).unwrap();

    attach(&mut state, a, 20, 20);
    state.commit_surface(a).unwrap();
    attach(&mut state, b, 30, 30);
    state.commit_surface(b).unwrap();
    // Restack A above B
    state.subsurface_place(a, b, true).unwrap();

    // Cached until the parent commits
    assert!(!state.surface(a).unwrap().read().current.has_buffer());
    assert!(state.surface(a).unwrap().read().cached.is_some());
    assert_eq!(state.surface(parent).unwrap().read().children, vec![parent]);

    state.commit_surface(parent).unwrap();

    let p = state.surface(parent).unwrap().read().children.clone();
    assert_eq!(p, vec![parent, b, a]);
    for (id, size) in [(a, 20), (b, 30)] {
        let surface = state.surface(id).unwrap().read();
        assert_eq!(surface.current.size(), Size::new(size, size));
        assert!(surface.cached.is_none());
        assert!(surface.mapped);
    }
    let position = state.surface(a).unwrap().read().role.as_subsurface().map(|sub| sub.position);
    assert_eq!(position, Some(Point::new(10, 10)));
}

#[test]
fn test_nested_sync_subsurface_waits_for_root() {
    let (mut state, _running) = state();
    let root = mapped_toplevel(&mut state, 100, 100);
    let mid = state.create_surface(None, None);
    let leaf = state.create_surface(None, None);
    state.create_subsurface(mid, root, None).unwrap();
    state.create_subsurface(leaf, mid, None).unwrap();
    // Only the leaf is synchronized
    state.subsurface_set_sync(mid, false).unwrap();
    state.subsurface_set_sync(leaf, true).unwrap();

    attach(&mut state, leaf, 8, 8);
    state.commit_surface(leaf).unwrap();
    assert!(!state.surface(leaf).unwrap().read().current.has_buffer());

    attach(&mut state, mid, 16, 16);
    state.commit_surface(mid).unwrap();
    assert!(state.surface(leaf).unwrap().read().current.has_buffer());
}

#[test]
fn test_root_commit_reaches_synchronized_grandchild() {
    let (mut state, _running) = state();
    let root = mapped_toplevel(&mut state, 100, 100);
    let mid = state.create_surface(None, None);
    let leaf = state.create_surface(None, None);
    state.create_subsurface(mid, root, None).unwrap();
    state.create_subsurface(leaf, mid, None).unwrap();

    attach(&mut state, mid, 16, 16);
    state.commit_surface(mid).unwrap();
    state.commit_surface(root).unwrap();
    assert!(state.surface(mid).unwrap().read().current.has_buffer());

    // The middle surface has nothing cached when the root commits again
    attach(&mut state, leaf, 8, 8);
    state.commit_surface(leaf).unwrap();
    assert!(!state.surface(leaf).unwrap().read().current.has_buffer());
    state.commit_surface(root).unwrap();

    let surface = state.surface(leaf).unwrap().read();
    assert!(surface.current.has_buffer());
    assert!(surface.cached.is_none());
    assert!(surface.mapped);
}

#[test]
fn test_round_trip_fires_frame_callback_once() {
    let (mut state, running) = state();
    let output = first_output(&state);
    let backend_output = running.lock().get(&output).cloned().unwrap();
    // Let the initial full repaint go first
    while backend_output.step_frame().is_some() {}
    state.dispatch_backend_events();

    let id = state.create_surface(None, None);
    state.get_xdg_surface(id, None).unwrap();
    state.get_toplevel(id, None).unwrap();
    state.commit_surface(id).unwrap();
    let serial = toplevel_serial(&state, id);
    state.xdg_surface_ack_configure(id, serial).unwrap();

    let callback = RecordingCallback::new();
    attach(&mut state, id, 100, 100);
    state.surface_frame(id, callback.callback()).unwrap();
    state.commit_surface(id).unwrap();

    {
        let surface = state.surface(id).unwrap().read();
        assert!(surface.mapped);
        assert!(surface.current.has_buffer());
        assert_eq!(surface.current.size(), Size::new(100, 100));
        assert_eq!(surface.outputs, vec![output]);
    }
    let shared = state.outputs[&output].shared.clone();
    assert_eq!(shared.scheduler.state(), RepaintState::PendingRepaint);

    let report = backend_output.step_frame().unwrap();
    assert!(report.surfaces_drawn >= 1);
    assert_eq!(shared.scheduler.state(), RepaintState::Idle);
    assert_eq!(callback.count(), 0);

    state.dispatch_backend_events();
    assert_eq!(callback.count(), 1);

    // Nothing new: no frame, no second done
    assert!(backend_output.step_frame().is_none());
    state.dispatch_backend_events();
    assert_eq!(callback.count(), 1);
}

#[test]
fn test_offscreen_callbacks_wait_for_an_output() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    let callback = RecordingCallback::new();
    attach(&mut state, id, 10, 10);
    state.surface_frame(id, callback.callback()).unwrap();
    state.commit_surface(id).unwrap();
    // Unmapped: kept on the surface
    assert_eq!(state.surface(id).unwrap().read().current.frame_callbacks.len(), 1);
    assert_eq!(callback.count(), 0);
}

#[test]
fn test_toplevel_on_layer_surface_is_refused() {
    let (mut state, _running) = state();
    let id = state.create_surface(None, None);
    state.get_layer_surface(id, None, 2, "panel".into(), None).unwrap();
    state
        .with_layer(id, |l| {
            l.set_size(200, 30);
            l.set_anchor(1).unwrap();
        })
        .unwrap();
    state.commit_surface(id).unwrap();
    let serial = state.with_layer(id, |l| l.configures.latest_serial()).unwrap().unwrap();
    state.layer_ack_configure(id, serial).unwrap();
    attach(&mut state, id, 200, 30);
    state.commit_surface(id).unwrap();
    assert!(state.surface(id).unwrap().read().mapped);

    let err = state.get_toplevel(id, None).unwrap_err();
    assert!(err.as_protocol().is_some());

    let surface = state.surface(id).unwrap().read();
    assert_eq!(surface.role_kind(), RoleKind::Layer);
    assert!(surface.mapped);
}

#[test]
fn test_popup_unknown_serial_keeps_geometry() {
    let (mut state, _running) = state();
    let parent = mapped_toplevel(&mut state, 200, 200);

    let mut positioner = Positioner::new();
    positioner.set_size(40, 20).unwrap();
    positioner.set_anchor_rect(Rect::new(10, 10, 5, 5)).unwrap();

    let popup = state.create_surface(None, None);
    state.get_xdg_surface(popup, None).unwrap();
    state.get_popup(popup, Some(parent), positioner, None).unwrap();
    state.commit_surface(popup).unwrap();
    let serial = state.with_popup(popup, |p| p.xdg.configures.latest_serial()).unwrap().unwrap();
    state.xdg_surface_ack_configure(popup, serial).unwrap();
    attach(&mut state, popup, 40, 20);
    state.commit_surface(popup).unwrap();

    let before = state.with_popup(popup, |p| p.geometry).unwrap();
    assert_eq!(before.size(), Size::new(40, 20));
    assert!(state.surface(popup).unwrap().read().mapped);

    let err = state.xdg_surface_ack_configure(popup, serial + 1000).unwrap_err();
    assert!(err.as_protocol().is_some());
    state.commit_surface(popup).unwrap();
    assert_eq!(state.with_popup(popup, |p| p.geometry).unwrap(), before);
}

#[test]
fn test_destroyed_surface_resolves_to_none() {
    let (mut state, _running) = state();
    let id = mapped_toplevel(&mut state, 50, 50);
    let weak = Arc::downgrade(state.surface(id).unwrap());
    state.toplevel_destroyed(id).unwrap();
    state.xdg_surface_destroyed(id).unwrap();
    state.destroy_surface(id);
    assert!(state.surface(id).is_none());
    assert!(weak.upgrade().is_none());
}
