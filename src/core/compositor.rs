//! Display and socket wrapper.
//!
//! `Compositor` owns the Wayland `Display` and the listening socket. It
//! accepts clients, dispatches their requests into `CompositorState`,
//! drains backend events and flushes. Everything the embedder may want to
//! react to comes out of `take_events` as a `CompositorEvent`.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use wayland_server::{Display, DisplayHandle, ListeningSocket};

use crate::config::CompositorConfig;
use crate::core::errors::{CoreError, ProtocolError};
use crate::core::output::OutputId;
use crate::core::role::RoleKind;
use crate::core::state::CompositorState;
use crate::core::surface::SurfaceId;
use crate::util::logging::CORE;
use crate::wlog;

// ============================================================================
// Client Data
// ============================================================================

/// Per-client data stored with each Wayland connection
#[derive(Debug)]
pub struct VitrineClientData {
    /// Unique client identifier (internal)
    pub id: u32,
    /// Connection timestamp
    pub connected_at: Instant,
    /// Disconnections waiting for `CompositorState` cleanup
    gone: Arc<Mutex<Vec<ClientId>>>,
}

impl ClientData for VitrineClientData {
    fn initialized(&self, client_id: ClientId) {
        tracing::debug!("Client {} initialized ({:?})", self.id, client_id);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        let reason_str = match reason {
            DisconnectReason::ConnectionClosed => "connection closed",
            DisconnectReason::ProtocolError(_) => "protocol error",
        };
        tracing::info!(
            "Client {} disconnected: {} after {:.1}s",
            self.id,
            reason_str,
            self.connected_at.elapsed().as_secs_f64()
        );
        self.gone.lock().push(client_id);
    }
}

// ============================================================================
// Compositor Events
// ============================================================================

/// Events emitted by the compositor for the embedder to handle
#[derive(Debug, Clone)]
pub enum CompositorEvent {
    ClientConnected { client_id: ClientId },
    ClientDisconnected { client_id: ClientId },
    /// A client was sent a protocol error and will be disconnected
    ClientFlagged { client_id: ClientId, error: ProtocolError },
    SurfaceCreated { surface_id: SurfaceId },
    SurfaceDestroyed { surface_id: SurfaceId },
    RoleAssigned { surface_id: SurfaceId, role: RoleKind },
    /// A role surface was mapped or unmapped
    MappingChanged { surface_id: SurfaceId, role: RoleKind, mapped: bool },
    TitleChanged { surface_id: SurfaceId, title: String },
    AppIdChanged { surface_id: SurfaceId, app_id: String },
    OutputAdded { output_id: OutputId, name: String },
    OutputRemoved { output_id: OutputId },
    SessionLocked,
    SessionUnlocked,
    /// A drag ended, by drop or timeout
    DragEnded { cancelled: bool },
}

// ============================================================================
// Main Compositor
// ============================================================================

/// Wayland display, listening socket and connected clients.
pub struct Compositor {
    display: Display<CompositorState>,
    socket: ListeningSocket,
    socket_path: PathBuf,
    next_client_id: u32,
    clients: HashMap<ClientId, u32>,
    gone: Arc<Mutex<Vec<ClientId>>>,
    events: Vec<CompositorEvent>,
    running: bool,
}

impl Compositor {
    /// Create the display and bind the socket named in `config`, or the
    /// first free `wayland-N` when none is given.
    pub fn new(config: &CompositorConfig) -> Result<Self> {
        let display = Display::new().context("Failed to create Wayland display")?;
        let runtime_dir = Self::ensure_runtime_dir()?;

        let socket = match &config.socket_name {
            Some(name) => ListeningSocket::bind(name).with_context(|| format!("Failed to bind socket {}", name))?,
            None => ListeningSocket::bind_auto("wayland", 1..33).context("No free wayland-N socket")?,
        };
        let name = socket
            .socket_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let socket_path = runtime_dir.join(&name);
        tracing::info!("Compositor listening on: {}", socket_path.display());

        Ok(Self {
            display,
            socket,
            socket_path,
            next_client_id: 1,
            clients: HashMap::new(),
            gone: Arc::new(Mutex::new(Vec::new())),
            events: Vec::new(),
            running: false,
        })
    }

    pub fn display_handle(&self) -> DisplayHandle {
        self.display.handle()
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Socket name to export as `WAYLAND_DISPLAY`
    pub fn socket_name(&self) -> String {
        self.socket_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Display file descriptor for polling
    pub fn display_fd(&mut self) -> RawFd {
        self.display.backend().poll_fd().as_raw_fd()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Advertise the globals and start accepting clients.
    pub fn start(&mut self, state: &mut CompositorState) -> Result<()> {
        if self.running {
            return Err(CoreError::state_error("Compositor already running").into());
        }
        crate::core::wayland::register_globals(state, &self.display.handle());
        self.running = true;
        tracing::info!("Compositor started");
        Ok(())
    }

    pub fn stop(&mut self, state: &mut CompositorState) -> Result<()> {
        if !self.running {
            return Err(CoreError::state_error("Compositor not running").into());
        }
        tracing::info!("Stopping compositor, {} client(s) connected", self.clients.len());
        if let Err(e) = self.display.flush_clients() {
            tracing::warn!("Error flushing clients during shutdown: {}", e);
        }
        for (client_id, _) in self.clients.drain() {
            state.client_disconnected(&client_id);
        }
        self.running = false;
        Ok(())
    }

    // =========================================================================
    // Event Processing
    // =========================================================================

    /// Accept pending client connections
    pub fn accept_connections(&mut self) {
        let mut handle = self.display.handle();
        loop {
            let stream = match self.socket.accept() {
                Ok(Some(stream)) => stream,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to accept client: {}", e);
                    break;
                }
            };
            let id = self.next_client_id;
            self.next_client_id += 1;
            let data = Arc::new(VitrineClientData {
                id,
                connected_at: Instant::now(),
                gone: self.gone.clone(),
            });
            match handle.insert_client(stream, data) {
                Ok(client) => {
                    let client_id = client.id();
                    wlog!(CORE, "Accepted client {} ({:?})", id, client_id);
                    self.clients.insert(client_id.clone(), id);
                    self.events.push(CompositorEvent::ClientConnected { client_id });
                }
                Err(e) => tracing::error!("Failed to insert client: {}", e),
            }
        }
    }

    /// Run one loop iteration without blocking.
    pub fn dispatch(&mut self, state: &mut CompositorState) -> Result<usize> {
        if !self.running {
            return Ok(0);
        }
        self.accept_connections();

        let dispatched = self
            .display
            .dispatch_clients(state)
            .context("Failed to dispatch Wayland events")?;
        self.reap_clients(state);

        state.dispatch_backend_events();

        self.display.flush_clients().context("Failed to flush clients")?;
        Ok(dispatched)
    }

    /// Wait up to `timeout` for client activity, then dispatch.
    ///
    /// Backend events do not wake the poll; callers keep `timeout` below a
    /// frame interval so presentation events are delivered promptly.
    pub fn dispatch_timeout(&mut self, state: &mut CompositorState, timeout: Duration) -> Result<usize> {
        if !timeout.is_zero() {
            let mut fds = [
                libc::pollfd {
                    fd: self.display_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.socket.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];
            let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
            // SAFETY: fds is a valid array of two pollfd for the duration of the call.
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err).context("poll on display fd");
                }
            }
        }
        self.dispatch(state)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.display.flush_clients().context("Failed to flush clients")
    }

    /// Clean up after clients that went away during dispatch.
    fn reap_clients(&mut self, state: &mut CompositorState) {
        let gone: Vec<ClientId> = std::mem::take(&mut *self.gone.lock());
        for client_id in gone {
            self.clients.remove(&client_id);
            state.client_disconnected(&client_id);
            self.events.push(CompositorEvent::ClientDisconnected { client_id });
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Take the connection events and everything `state` emitted.
    pub fn take_events(&mut self, state: &mut CompositorState) -> Vec<CompositorEvent> {
        let mut events = std::mem::take(&mut self.events);
        events.append(&mut state.take_events());
        events
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Make sure `XDG_RUNTIME_DIR` names an existing 0700 directory.
    fn ensure_runtime_dir() -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(dir) = std::env::var_os("XDG_RUNTIME_DIR") {
            let dir = PathBuf::from(dir);
            if dir.is_dir() {
                return Ok(dir);
            }
        }

        // SAFETY: getuid has no preconditions.
        let uid = unsafe { libc::getuid() };
        let dir = std::env::temp_dir().join(format!("vitrine-{}", uid));
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut perms = std::fs::metadata(&dir)?.permissions();
        perms.set_mode(0o700);
        std::fs::set_permissions(&dir, perms)?;
        std::env::set_var("XDG_RUNTIME_DIR", &dir);
        tracing::debug!("Created XDG_RUNTIME_DIR: {}", dir.display());
        Ok(dir)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_accepts_clients() {
        let config = CompositorConfig {
            socket_name: Some(format!("vitrine-test-{}", std::process::id())),
            ..Default::default()
        };
        let mut compositor = Compositor::new(&config).unwrap();
        assert!(compositor.socket_path().exists());
        assert_eq!(compositor.socket_name(), config.socket_name.clone().unwrap());

        let _stream = UnixStream::connect(compositor.socket_path()).unwrap();
        compositor.accept_connections();
        assert_eq!(compositor.client_count(), 1);
        assert!(matches!(
            compositor.events.as_slice(),
            [CompositorEvent::ClientConnected { .. }]
        ));
    }

    #[test]
    fn test_dispatch_is_idle_until_started() {
        let config = CompositorConfig {
            socket_name: Some(format!("vitrine-idle-{}", std::process::id())),
            ..Default::default()
        };
        let mut compositor = Compositor::new(&config).unwrap();
        let (mut state, _running) = crate::core::state::test_support::state();
        assert!(!compositor.is_running());
        assert_eq!(compositor.dispatch(&mut state).unwrap(), 0);
        compositor.start(&mut state).unwrap();
        assert!(compositor.start(&mut state).is_err());
        compositor.stop(&mut state).unwrap();
    }
}
