//! `ext_session_lock_v1`: lock surfaces and the lock state.

use std::collections::{HashMap, HashSet};

use crate::core::errors::{ErrorTarget, ProtocolError};
use crate::core::output::OutputId;
use crate::core::surface::SurfaceId;
use crate::util::geometry::Size;
use crate::util::logging::ROLE;
use crate::wlog;

use super::configure::ConfigureQueue;
use super::{CommittedView, PendingView, RoleCommitOutcome, RoleHandler, RoleKind};

/// `ext_session_lock_surface_v1` error codes
pub mod surface_error {
    pub const COMMIT_BEFORE_FIRST_ACK: u32 = 0;
    pub const NULL_BUFFER: u32 = 1;
    pub const DIMENSIONS_MISMATCH: u32 = 2;
    pub const INVALID_SERIAL: u32 = 3;
}

/// `ext_session_lock_v1` error codes
pub mod lock_error {
    pub const INVALID_DESTROY: u32 = 0;
    pub const INVALID_UNLOCK: u32 = 1;
    pub const ROLE: u32 = 2;
    pub const DUPLICATE_OUTPUT: u32 = 3;
    pub const ALREADY_CONSTRUCTED: u32 = 4;
}

#[derive(Debug, Clone)]
pub struct LockSurfaceRole {
    pub output: OutputId,
    pub configures: ConfigureQueue<Size>,
    has_content: bool,
    alive: bool,
}

impl LockSurfaceRole {
    pub fn new(output: OutputId) -> Self {
        Self {
            output,
            configures: ConfigureQueue::new(),
            has_content: false,
            alive: true,
        }
    }

    fn error(code: u32, msg: impl Into<String>) -> ProtocolError {
        ProtocolError::new(ErrorTarget::SessionLockSurface, code, msg)
    }

    pub fn send_configure(&mut self, serial: u32, size: Size) {
        self.configures.push(serial, size);
    }

    pub fn ack_configure(&mut self, serial: u32) -> Result<Size, ProtocolError> {
        self.configures
            .ack(serial)
            .ok_or_else(|| Self::error(surface_error::INVALID_SERIAL, format!("unknown serial {}", serial)))
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn destroy(&mut self) {
        self.alive = false;
        self.has_content = false;
    }
}

impl RoleHandler for LockSurfaceRole {
    fn kind(&self) -> RoleKind {
        RoleKind::SessionLock
    }

    fn validate_commit(&self, pending: &PendingView) -> Result<(), ProtocolError> {
        let Some(acked) = self.configures.acked() else {
            return Err(Self::error(
                surface_error::COMMIT_BEFORE_FIRST_ACK,
                "lock surface committed before the first configure was acked",
            ));
        };
        if !pending.has_buffer() {
            return Err(Self::error(surface_error::NULL_BUFFER, "lock surface committed a null buffer"));
        }
        if pending.size != *acked {
            return Err(Self::error(
                surface_error::DIMENSIONS_MISMATCH,
                format!(
                    "surface is {}x{}, configured {}x{}",
                    pending.size.width, pending.size.height, acked.width, acked.height
                ),
            ));
        }
        Ok(())
    }

    fn handle_commit(&mut self, committed: &CommittedView) -> RoleCommitOutcome {
        self.has_content = self.alive && committed.has_buffer;
        // Mapping is decided by the lock manager once the lock is granted
        RoleCommitOutcome::mapped(self.has_content)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Lock requested, waiting for a lock surface with content on every output
    Pending,
    Locked,
}

/// Process-wide lock state. Only one lock object may be active.
#[derive(Debug, Default)]
pub struct SessionLockManager {
    state: LockState,
    surfaces: HashMap<OutputId, SurfaceId>,
    ready: HashSet<OutputId>,
}

impl SessionLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn locked(&self) -> bool {
        self.state == LockState::Locked
    }

    /// Start a lock. Returns false when a lock is already active; the new
    /// lock object must then be sent `finished`.
    pub fn lock(&mut self) -> bool {
        if self.state != LockState::Unlocked {
            return false;
        }
        self.state = LockState::Pending;
        self.surfaces.clear();
        self.ready.clear();
        wlog!(ROLE, "session lock requested");
        true
    }

    pub fn add_surface(&mut self, output: OutputId, surface: SurfaceId) -> Result<(), ProtocolError> {
        if self.surfaces.contains_key(&output) {
            return Err(ProtocolError::new(
                ErrorTarget::SessionLock,
                lock_error::DUPLICATE_OUTPUT,
                format!("output {} already has a lock surface", output),
            ));
        }
        self.surfaces.insert(output, surface);
        Ok(())
    }

    pub fn surface_for(&self, output: OutputId) -> Option<SurfaceId> {
        self.surfaces.get(&output).copied()
    }

    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.surfaces.values().copied()
    }

    /// Record whether a lock surface has content. Returns true when this
    /// grants the lock.
    pub fn surface_committed(&mut self, output: OutputId, has_content: bool, outputs: &[OutputId]) -> bool {
        if has_content {
            self.ready.insert(output);
        } else {
            self.ready.remove(&output);
        }
        self.check_granted(outputs)
    }

    /// Grant a pending lock once every output shows a lock surface.
    pub fn check_granted(&mut self, outputs: &[OutputId]) -> bool {
        if self.state != LockState::Pending || outputs.is_empty() {
            return false;
        }
        if outputs.iter().all(|o| self.ready.contains(o)) {
            self.state = LockState::Locked;
            tracing::info!("Session locked");
            return true;
        }
        false
    }

    pub fn unlock(&mut self) -> Result<(), ProtocolError> {
        if self.state != LockState::Locked {
            return Err(ProtocolError::new(
                ErrorTarget::SessionLock,
                lock_error::INVALID_UNLOCK,
                "unlock before the locked event",
            ));
        }
        self.reset();
        tracing::info!("Session unlocked");
        Ok(())
    }

    /// The lock object was destroyed. Destroying a granted lock without
    /// unlocking is an error and keeps the session locked.
    pub fn lock_destroyed(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            LockState::Locked => Err(ProtocolError::new(
                ErrorTarget::SessionLock,
                lock_error::INVALID_DESTROY,
                "lock destroyed while locked",
            )),
            _ => {
                self.reset();
                Ok(())
            }
        }
    }

    pub fn remove_surface(&mut self, surface: SurfaceId) {
        self.surfaces.retain(|output, s| {
            if *s == surface {
                self.ready.remove(output);
                false
            } else {
                true
            }
        });
    }

    pub fn remove_output(&mut self, output: OutputId) {
        self.surfaces.remove(&output);
        self.ready.remove(&output);
    }

    fn reset(&mut self) {
        self.state = LockState::Unlocked;
        self.surfaces.clear();
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(size: Option<Size>) -> PendingView {
        PendingView {
            buffer_size: size,
            size: size.unwrap_or_default(),
            attaches: size.is_some(),
        }
    }

    #[test]
    fn test_lock_surface_validation() {
        let mut role = LockSurfaceRole::new(1);
        let err = role.validate_commit(&pending(Some(Size::new(800, 600)))).unwrap_err();
        assert_eq!(err.code, surface_error::COMMIT_BEFORE_FIRST_ACK);

        role.send_configure(4, Size::new(800, 600));
        role.ack_configure(4).unwrap();
        assert_eq!(role.validate_commit(&pending(None)).unwrap_err().code, surface_error::NULL_BUFFER);
        assert_eq!(
            role.validate_commit(&pending(Some(Size::new(640, 480)))).unwrap_err().code,
            surface_error::DIMENSIONS_MISMATCH
        );
        assert!(role.validate_commit(&pending(Some(Size::new(800, 600)))).is_ok());
    }

    #[test]
    fn test_lock_granted_when_all_outputs_ready() {
        let mut manager = SessionLockManager::new();
        assert!(manager.lock());
        assert!(!manager.lock());
        manager.add_surface(1, 10).unwrap();
        manager.add_surface(2, 11).unwrap();
        assert!(manager.add_surface(2, 12).is_err());

        assert!(!manager.surface_committed(1, true, &[1, 2]));
        assert!(!manager.locked());
        assert!(manager.surface_committed(2, true, &[1, 2]));
        assert!(manager.locked());

        assert!(manager.lock_destroyed().is_err());
        manager.unlock().unwrap();
        assert_eq!(manager.state(), LockState::Unlocked);
        assert!(manager.unlock().is_err());
    }
}
