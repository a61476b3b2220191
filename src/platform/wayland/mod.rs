//! wlroots host: layer-shell overlays, screencopy and pointer tracking.
//!
//! The "magnification subsystem" here is the set of full-screen overlay
//! surfaces plus one screencopy capture per display. Magnifier surfaces are
//! panels drawn on the primary display's overlay.

mod input;
mod monitor;
mod overlay;
mod panel;
mod pool_buffer;
mod protocols;
mod renderer;
mod state;

use std::os::unix::io::AsRawFd;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use nix::libc;
use wayland_client::{Connection, EventQueue, QueueHandle};

use self::monitor::{bounds_containing, validate_source, Monitor};
use self::overlay::Overlay;
use self::panel::{find_panel_mut, panel_rect, Panel};
use self::protocols::zwlr_layer_shell_v1::Layer;
use self::protocols::zwlr_layer_surface_v1::{Anchor, KeyboardInteractivity};
use self::state::{HostState, PRIMARY_MONITOR};
use super::{Host, SurfaceId};
use crate::error::MagnifierError;
use crate::utils::{Point, Rect};

// Used until the compositor tells us about any display
const FALLBACK_BOUNDS: Rect = Rect::new(0, 0, 1920, 1080);

pub struct WaylandHost {
    conn: Connection,
    event_queue: EventQueue<HostState>,
    qh: QueueHandle<HostState>,
    state: HostState,
    initialized: bool,
    next_surface_id: usize,
}

impl WaylandHost {
    /// Connect to the compositor and collect globals, displays and input
    /// devices. Nothing is shown until [`Host::initialize`].
    pub fn connect(running: Arc<AtomicBool>) -> Result<Self> {
        log::info!("Connecting to Wayland...");

        let conn =
            Connection::connect_to_env().context("Failed to connect to Wayland compositor")?;
        let mut event_queue = conn.new_event_queue();
        let qh = event_queue.handle();
        let mut state = HostState::new(running);

        let _registry = conn.display().get_registry(&qh, ());

        event_queue
            .roundtrip(&mut state)
            .context("Failed initial roundtrip")?;
        log::info!("Connected to Wayland compositor");

        state.bind_xdg_outputs(&qh);

        // Outputs, xdg-outputs and seat capabilities, then the input devices
        // the capabilities asked for
        event_queue
            .roundtrip(&mut state)
            .context("Failed to configure monitors and seat")?;
        event_queue
            .roundtrip(&mut state)
            .context("Failed to setup input devices")?;

        log::info!("Found {} monitors", state.monitors.len());
        for (idx, monitor) in state.monitors.iter().enumerate() {
            log::info!(
                "Monitor {}: {} {}x{} scale={} bounds {}",
                idx,
                monitor.name,
                monitor.size.x as i32,
                monitor.size.y as i32,
                monitor.scale,
                monitor.bounds()
            );
        }

        Ok(Self {
            conn,
            event_queue,
            qh,
            state,
            initialized: false,
            next_surface_id: 0,
        })
    }

    fn bring_up(&mut self) -> Result<()> {
        let state = &mut self.state;
        let qh = &self.qh;

        let compositor = state.compositor.clone().context("Compositor not available")?;
        let shm = state.shm.clone().context("SHM not available")?;
        let layer_shell = state.layer_shell.clone().context(
            "Layer shell not available - your compositor doesn't support wlr-layer-shell",
        )?;
        if state.screencopy_manager.is_none() {
            bail!("Screencopy not available - your compositor doesn't support wlr-screencopy");
        }
        if state.monitors.is_empty() {
            bail!("No outputs advertised by the compositor");
        }

        for (idx, monitor) in state.monitors.iter().enumerate() {
            let surface = compositor.create_surface(qh, ());
            let layer_surface = layer_shell.get_layer_surface(
                &surface,
                Some(&monitor.output),
                Layer::Overlay,
                "twinmag".to_string(),
                qh,
                (),
            );

            layer_surface.set_anchor(Anchor::Top | Anchor::Right | Anchor::Bottom | Anchor::Left);
            layer_surface.set_exclusive_zone(-1);
            // OnDemand gives us keyboard focus for Escape
            layer_surface.set_keyboard_interactivity(KeyboardInteractivity::OnDemand);
            surface.commit();

            state.overlays.push(Overlay::new(
                idx,
                surface,
                layer_surface,
                monitor.size,
                monitor.scale.max(1),
            ));
            log::debug!("Overlay for monitor {} created", idx);
        }

        self.event_queue.roundtrip(&mut self.state)?;

        let state = &mut self.state;
        if !state.overlays.iter().all(|o| o.configured) {
            bail!("Not all overlay surfaces were configured");
        }

        // Map every overlay with a transparent buffer so it receives input
        for overlay in &mut state.overlays {
            overlay.ensure_buffers(&shm, qh)?;
            overlay.send_frame(qh);
        }
        self.conn.flush()?;
        self.event_queue.roundtrip(&mut self.state)?;

        // First capture of every display; afterwards only the sampled one is
        // refreshed
        for idx in 0..self.state.monitors.len() {
            self.state.capture_monitor(idx, &self.qh);
        }
        self.conn.flush()?;
        self.event_queue.roundtrip(&mut self.state)?;

        Ok(())
    }

    fn tear_down(&mut self) {
        let state = &mut self.state;
        state.panels.clear();
        for overlay in state.overlays.drain(..) {
            overlay.destroy();
        }
        for (frame, _) in state.pending_frames.drain(..) {
            frame.destroy();
        }
        for monitor in &mut state.monitors {
            monitor.drop_captures();
        }
        if let Err(e) = self.conn.flush() {
            log::warn!("Failed to flush connection during teardown: {}", e);
        }
    }

    fn primary_bounds(&self) -> Option<Rect> {
        self.state
            .monitors
            .get(PRIMARY_MONITOR)
            .map(|m| m.bounds())
            .filter(|b| !b.is_empty())
    }
}

impl Host for WaylandHost {
    fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        log::info!("Setting up overlays and screen capture...");
        if let Err(e) = self.bring_up() {
            self.tear_down();
            return Err(e);
        }

        self.initialized = true;
        log::info!("Overlays mapped, screen captured");
        Ok(())
    }

    fn uninitialize(&mut self) {
        if !self.initialized {
            return;
        }
        self.tear_down();
        self.initialized = false;
        log::info!("Overlays removed");
    }

    fn create_surface(&mut self, index: usize, zoom_factor: f32) -> Result<SurfaceId> {
        if !self.initialized {
            bail!("Magnification subsystem not initialized");
        }

        let display = self.primary_bounds().context("Primary display has no size")?;
        let rect = panel_rect(index, display);
        if rect.is_empty() || !display.contains_rect(&rect) {
            bail!("Panel {} at {} does not fit on display {}", index, rect, display);
        }

        let id = SurfaceId(self.next_surface_id);
        self.next_surface_id += 1;
        self.state
            .panels
            .push(Panel::new(id, index, rect, zoom_factor));
        self.state.mark_primary_dirty();

        log::info!("Magnifier surface {} placed at {}", index, rect);
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: SurfaceId) {
        let before = self.state.panels.len();
        self.state.panels.retain(|p| p.id != surface);
        if self.state.panels.len() != before {
            self.state.mark_primary_dirty();
            log::debug!("Magnifier surface {:?} destroyed", surface);
        }
    }

    fn set_transform(&mut self, surface: SurfaceId, zoom_factor: f32) -> Result<()> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            bail!("Zoom factor {} is not a valid transform", zoom_factor);
        }
        find_panel_mut(&mut self.state.panels, surface)?.zoom = zoom_factor;
        self.state.mark_primary_dirty();
        Ok(())
    }

    fn set_source(&mut self, surface: SurfaceId, rect: Rect) -> Result<()> {
        let panel = find_panel_mut(&mut self.state.panels, surface)?;
        validate_source(self.state.monitors.iter().map(Monitor::bounds), rect)?;

        if panel.update_source(rect) {
            self.state.mark_primary_dirty();
        }
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        self.state
            .pointer
            .as_ref()
            .and_then(|p| p.position)
            .or_else(|| self.primary_bounds().map(|b| b.center()))
            .unwrap_or_else(|| FALLBACK_BOUNDS.center())
    }

    fn display_bounds_containing(&self, point: Point) -> Rect {
        bounds_containing(self.state.monitor_bounds(), point).unwrap_or(FALLBACK_BOUNDS)
    }

    fn dispatch(&mut self, timeout: Duration) -> Result<bool> {
        self.state.render_dirty(&self.qh);
        if self.initialized {
            self.state.request_capture(&self.qh, Instant::now());
        }

        self.event_queue
            .dispatch_pending(&mut self.state)
            .context("Failed to dispatch events")?;
        self.conn.flush().context("Failed to flush connection")?;

        if let Some(guard) = self.event_queue.prepare_read() {
            let mut pollfd = libc::pollfd {
                fd: guard.connection_fd().as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

            let poll_result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
            if poll_result > 0 {
                guard.read().context("Failed to read events")?;
            } else if poll_result < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err).context("Poll error");
                }
            }
            // On timeout the guard is dropped, cancelling the read
        }

        self.event_queue
            .dispatch_pending(&mut self.state)
            .context("Failed to dispatch events")?;

        Ok(!self.state.closed)
    }

    fn notify(&mut self, error: &MagnifierError) {
        log::error!("{}", error);
    }
}
