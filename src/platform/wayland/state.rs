//! Wayland-side state of the host and its protocol event handlers.

use super::input::{pointer, Keyboard, Pointer};
use super::monitor::{display_index_containing, Monitor};
use super::overlay::Overlay;
use super::panel::Panel;
use super::protocols::{
    zwlr_layer_surface_v1, zwlr_screencopy_frame_v1, zxdg_output_v1, ZwlrLayerShellV1,
    ZwlrLayerSurfaceV1, ZwlrScreencopyFrameV1, ZwlrScreencopyManagerV1, ZxdgOutputManagerV1,
    ZxdgOutputV1,
};
use super::pool_buffer::PoolBuffer;
use super::renderer::{PanelFrame, Renderer, Sample};
use crate::utils::{Point, Rect, RepeatFilter, Vector2D};
use anyhow::{Context, Result};
use cairo::ImageSurface;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_callback::WlCallback, wl_compositor::WlCompositor,
    wl_keyboard::WlKeyboard, wl_output::WlOutput, wl_pointer::WlPointer, wl_registry,
    wl_seat::WlSeat, wl_shm::WlShm, wl_shm_pool::WlShmPool, wl_surface::WlSurface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, Proxy, QueueHandle, WEnum};

/// Panels live on the first advertised display.
pub const PRIMARY_MONITOR: usize = 0;

/// Shortest gap between two screen captures of the sampled display.
pub const CAPTURE_INTERVAL: Duration = Duration::from_millis(10);

pub struct HostState {
    pub compositor: Option<WlCompositor>,
    pub shm: Option<WlShm>,
    pub layer_shell: Option<ZwlrLayerShellV1>,
    pub screencopy_manager: Option<ZwlrScreencopyManagerV1>,
    pub xdg_output_manager: Option<ZxdgOutputManagerV1>,

    pub monitors: Vec<Monitor>,
    pub overlays: Vec<Overlay>,
    pub panels: Vec<Panel>,
    next_output_id: u32,

    // Screencopy frames in flight, with the monitor they capture
    pub pending_frames: Vec<(ZwlrScreencopyFrameV1, usize)>,
    last_capture: Option<Instant>,
    capture_errors: RepeatFilter,
    render_errors: RepeatFilter,

    pub pointer: Option<Pointer>,
    pub keyboard: Option<Keyboard>,

    renderer: Renderer,

    // Shared with the Ctrl+C handler and the driver loop
    running: Arc<AtomicBool>,
    pub closed: bool,
}

/// Capture data for one panel, detached from the monitor it came from.
struct OwnedSample {
    capture: ImageSurface,
    origin: Vector2D,
    size: Vector2D,
    capture_scale: Vector2D,
    y_invert: bool,
}

impl OwnedSample {
    fn as_sample(&self) -> Sample<'_> {
        Sample {
            capture: &self.capture,
            origin: self.origin,
            size: self.size,
            capture_scale: self.capture_scale,
            y_invert: self.y_invert,
        }
    }
}

impl HostState {
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            compositor: None,
            shm: None,
            layer_shell: None,
            screencopy_manager: None,
            xdg_output_manager: None,
            monitors: Vec::new(),
            overlays: Vec::new(),
            panels: Vec::new(),
            next_output_id: 0,
            pending_frames: Vec::new(),
            last_capture: None,
            capture_errors: RepeatFilter::default(),
            render_errors: RepeatFilter::default(),
            pointer: None,
            keyboard: None,
            renderer: Renderer::new(),
            running,
            closed: false,
        }
    }

    /// Request xdg-output objects for monitors that don't have one yet.
    pub fn bind_xdg_outputs(&mut self, qh: &QueueHandle<Self>) {
        let Some(manager) = &self.xdg_output_manager else {
            log::warn!("xdg-output not available, display positions come from wl_output");
            return;
        };
        for monitor in self.monitors.iter_mut().filter(|m| m.xdg_output.is_none()) {
            monitor.xdg_output = Some(manager.get_xdg_output(&monitor.output, qh, monitor.wayland_name));
        }
    }

    pub fn mark_primary_dirty(&mut self) {
        if let Some(overlay) = self
            .overlays
            .iter_mut()
            .find(|o| o.monitor_idx == PRIMARY_MONITOR)
        {
            overlay.mark_dirty();
        }
    }

    pub fn monitor_bounds(&self) -> impl Iterator<Item = Rect> + '_ {
        self.monitors.iter().map(Monitor::bounds)
    }

    /// Redraw every overlay whose content changed and whose previous frame
    /// the compositor has already shown.
    ///
    /// An overlay that fails to render is not retried until its content
    /// changes again, and a failure repeating the previous one is only
    /// logged at debug level.
    pub fn render_dirty(&mut self, qh: &QueueHandle<Self>) {
        for idx in 0..self.overlays.len() {
            let overlay = &self.overlays[idx];
            if !(overlay.dirty && overlay.configured && !overlay.frame_pending) {
                continue;
            }

            match self.render_overlay(idx, qh) {
                Ok(()) => {
                    let suppressed = self.render_errors.clear();
                    if suppressed > 0 {
                        log::info!("Rendering recovered after {} repeated failures", suppressed);
                    }
                }
                Err(e) => {
                    self.overlays[idx].dirty = false;
                    let message = format!("{:#}", e);
                    if self.render_errors.is_new(&message) {
                        log::error!("Failed to render overlay {}: {}", idx, message);
                    } else {
                        log::debug!("Failed to render overlay {}: {}", idx, message);
                    }
                }
            }
        }
    }

    /// Capture `monitor_idx` into its capture target.
    pub fn capture_monitor(&mut self, monitor_idx: usize, qh: &QueueHandle<Self>) {
        let (Some(manager), Some(monitor)) =
            (&self.screencopy_manager, self.monitors.get(monitor_idx))
        else {
            return;
        };
        // overlay_cursor = 0: keep the cursor out of the capture
        let frame = manager.capture_output(0, &monitor.output, qh, ());
        self.pending_frames.push((frame, monitor_idx));
        log::trace!("Screencopy frame requested for monitor {}", monitor_idx);
    }

    /// Keep the display the panels sample from freshly captured: at most one
    /// frame in flight and at most one request per [`CAPTURE_INTERVAL`].
    pub fn request_capture(&mut self, qh: &QueueHandle<Self>, now: Instant) {
        if !capture_due(!self.pending_frames.is_empty(), self.last_capture, now) {
            return;
        }
        let Some(monitor_idx) = self.sampled_monitor() else {
            return;
        };
        self.capture_monitor(monitor_idx, qh);
        self.last_capture = Some(now);
    }

    /// The display holding the first panel's source rectangle.
    fn sampled_monitor(&self) -> Option<usize> {
        self.panels
            .iter()
            .filter_map(|p| p.source)
            .find_map(|rect| display_index_containing(self.monitor_bounds(), rect))
    }

    fn render_overlay(&mut self, overlay_idx: usize, qh: &QueueHandle<Self>) -> Result<()> {
        let monitor_idx = self.overlays[overlay_idx].monitor_idx;
        let monitor = self
            .monitors
            .get(monitor_idx)
            .context("Overlay refers to an unknown monitor")?;
        let origin = monitor.logical_position;
        let logical_size = monitor.get_logical_size();
        if !logical_size.is_positive() {
            log::warn!("Monitor {} has no size yet, skipping render", monitor_idx);
            return Ok(());
        }

        let mut draws = Vec::new();
        if monitor_idx == PRIMARY_MONITOR {
            for panel in &self.panels {
                let sample = panel
                    .source
                    .and_then(|rect| capture_for(&mut self.monitors, rect));
                draws.push((panel.clone(), sample));
            }
        }

        let shm = self.shm.as_ref().context("No SHM available")?;
        let overlay = &mut self.overlays[overlay_idx];
        overlay.ensure_buffers(shm, qh)?;

        {
            let Some(buffer) = overlay.get_available_buffer() else {
                log::trace!("Overlay {} has no free buffer, deferring", overlay_idx);
                return Ok(());
            };
            buffer.clear()?;
            let output_scale = buffer.pixel_size / logical_size;
            let ctx = buffer.create_cairo_context()?;

            for (panel, sample) in &draws {
                let local = Point::new(panel.rect.left - origin.x, panel.rect.top - origin.y);
                let size = Vector2D::from((panel.rect.width(), panel.rect.height()));
                let frame = PanelFrame {
                    origin: Vector2D::from(local) * output_scale,
                    size: size * output_scale,
                    output_scale,
                    zoom: panel.zoom as f64,
                };
                let sample = sample.as_ref().map(OwnedSample::as_sample);
                self.renderer.render_panel(&ctx, &frame, sample.as_ref())?;
                if let Err(e) = self.renderer.draw_label(&ctx, &frame, &panel.label()) {
                    log::debug!("Failed to draw label for panel {}: {}", panel.index, e);
                }
            }
        }

        overlay.send_frame(qh);
        log::trace!("Rendered overlay {} ({} panels)", overlay_idx, draws.len());
        Ok(())
    }

    fn monitor_for_surface(&self, surface: &WlSurface) -> Option<usize> {
        self.overlays
            .iter()
            .find(|o| &o.surface == surface)
            .map(|o| o.monitor_idx)
    }

    fn to_global(&self, monitor_idx: usize, surface_x: f64, surface_y: f64) -> Option<Point> {
        let monitor = self.monitors.get(monitor_idx)?;
        Some(pointer::to_global(
            surface_x,
            surface_y,
            monitor.logical_position,
            monitor.get_logical_size(),
        ))
    }
}

/// Whether a new capture may be requested.
fn capture_due(in_flight: bool, last: Option<Instant>, now: Instant) -> bool {
    if in_flight {
        return false;
    }
    last.map_or(true, |last| now.saturating_duration_since(last) >= CAPTURE_INTERVAL)
}

fn capture_for(monitors: &mut [Monitor], rect: Rect) -> Option<OwnedSample> {
    let idx = display_index_containing(monitors.iter().map(Monitor::bounds), rect)?;
    let monitor = &mut monitors[idx];
    let capture_scale = monitor.capture_scale()?;
    let origin = Vector2D::from((
        rect.left - monitor.logical_position.x,
        rect.top - monitor.logical_position.y,
    )) * capture_scale;
    let y_invert = monitor.screen_y_invert;

    let capture = match monitor.screen_buffer.as_mut()?.cairo_surface() {
        Ok(surface) => surface,
        Err(e) => {
            log::error!("Failed to access capture of monitor {}: {}", monitor.wayland_name, e);
            return None;
        }
    };

    Some(OwnedSample {
        capture,
        origin,
        size: Vector2D::from((rect.width(), rect.height())),
        capture_scale,
        y_invert,
    })
}

impl Dispatch<wl_registry::WlRegistry, ()> for HostState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            log::debug!("Global: {} v{} (name: {})", interface, version, name);

            match interface.as_str() {
                "wl_compositor" => {
                    state.compositor = Some(registry.bind(name, version.min(4), qh, ()));
                }
                "wl_shm" => {
                    state.shm = Some(registry.bind(name, 1, qh, ()));
                }
                "wl_seat" => {
                    let _seat: WlSeat = registry.bind(name, version.min(5), qh, ());
                }
                "wl_output" => {
                    let output: WlOutput = registry.bind(name, version.min(4), qh, ());
                    state
                        .monitors
                        .push(Monitor::new(output, state.next_output_id));
                    state.next_output_id += 1;
                }
                "zxdg_output_manager_v1" => {
                    state.xdg_output_manager = Some(registry.bind(name, version.min(3), qh, ()));
                    log::info!("xdg-output manager available");
                }
                "zwlr_layer_shell_v1" => {
                    state.layer_shell = Some(registry.bind(name, 1, qh, ()));
                    log::info!("Layer shell available");
                }
                "zwlr_screencopy_manager_v1" => {
                    state.screencopy_manager = Some(registry.bind(name, version.min(3), qh, ()));
                    log::info!("Screencopy manager available");
                }
                _ => {}
            }
        }
    }
}

delegate_noop!(HostState: ignore WlCompositor);
delegate_noop!(HostState: ignore WlShm);
delegate_noop!(HostState: ignore WlShmPool);
delegate_noop!(HostState: ignore WlSurface);
delegate_noop!(HostState: ignore ZwlrLayerShellV1);
delegate_noop!(HostState: ignore ZwlrScreencopyManagerV1);
delegate_noop!(HostState: ignore ZxdgOutputManagerV1);

impl Dispatch<WlSeat, ()> for HostState {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: <WlSeat as Proxy>::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_seat::{Capability, Event};

        match event {
            Event::Capabilities {
                capabilities: WEnum::Value(caps),
            } => {
                log::info!(
                    "Seat capabilities: pointer={} keyboard={}",
                    caps.contains(Capability::Pointer),
                    caps.contains(Capability::Keyboard)
                );

                if caps.contains(Capability::Pointer) && state.pointer.is_none() {
                    seat.get_pointer(qh, ());
                    state.pointer = Some(Pointer::default());
                }
                if caps.contains(Capability::Keyboard) && state.keyboard.is_none() {
                    seat.get_keyboard(qh, ());
                    state.keyboard = Some(Keyboard::new());
                }
            }
            Event::Name { name } => {
                log::info!("Seat name: {}", name);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlOutput, ()> for HostState {
    fn event(
        state: &mut Self,
        output: &WlOutput,
        event: <WlOutput as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_output::Event;

        let Some(monitor) = state.monitors.iter_mut().find(|m| &m.output == output) else {
            return;
        };

        match event {
            Event::Geometry { x, y, .. } => monitor.set_geometry(x, y),
            Event::Mode {
                width,
                height,
                refresh,
                ..
            } => monitor.set_mode(width, height, refresh),
            Event::Scale { factor } => monitor.set_scale(factor),
            Event::Name { name } => monitor.set_name(name),
            Event::Done => monitor.set_done(),
            _ => {}
        }
    }
}

impl Dispatch<ZxdgOutputV1, u32> for HostState {
    fn event(
        state: &mut Self,
        _: &ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        wayland_name: &u32,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(monitor) = state
            .monitors
            .iter_mut()
            .find(|m| m.wayland_name == *wayland_name)
        else {
            return;
        };

        match event {
            zxdg_output_v1::Event::LogicalPosition { x, y } => monitor.set_logical_position(x, y),
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                monitor.set_logical_size(width, height)
            }
            _ => {}
        }
    }
}

impl Dispatch<WlKeyboard, ()> for HostState {
    fn event(
        state: &mut Self,
        _: &WlKeyboard,
        event: <WlKeyboard as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_keyboard::{Event, KeyState};

        let Some(keyboard) = state.keyboard.as_mut() else {
            return;
        };

        match event {
            Event::Keymap {
                format: WEnum::Value(format),
                fd,
                ..
            } => {
                if let Err(e) = keyboard.handle_keymap(format, fd) {
                    log::warn!("{:#}", e);
                }
            }
            Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => keyboard.handle_modifiers(mods_depressed, mods_latched, mods_locked, group),
            Event::Key {
                key,
                state: WEnum::Value(KeyState::Pressed),
                ..
            } => {
                if keyboard.is_escape(key) {
                    log::info!("Escape key pressed, exiting...");
                    state.running.store(false, Ordering::SeqCst);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlPointer, ()> for HostState {
    fn event(
        state: &mut Self,
        _: &WlPointer,
        event: <WlPointer as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_pointer::Event;

        match event {
            Event::Enter {
                surface,
                surface_x,
                surface_y,
                ..
            } => {
                let Some(idx) = state.monitor_for_surface(&surface) else {
                    log::warn!("Pointer entered unknown surface");
                    return;
                };
                let Some(global) = state.to_global(idx, surface_x, surface_y) else {
                    return;
                };
                log::debug!("Pointer entered monitor {} at ({}, {})", idx, global.x, global.y);
                if let Some(pointer) = state.pointer.as_mut() {
                    pointer.handle_enter(idx, global);
                }
            }
            Event::Leave { .. } => {
                log::debug!("Pointer left surface");
                if let Some(pointer) = state.pointer.as_mut() {
                    pointer.handle_leave();
                }
            }
            Event::Motion {
                surface_x,
                surface_y,
                ..
            } => {
                let Some(idx) = state.pointer.as_ref().and_then(|p| p.monitor_idx) else {
                    return;
                };
                let Some(global) = state.to_global(idx, surface_x, surface_y) else {
                    return;
                };
                log::trace!("Pointer motion: ({}, {})", global.x, global.y);
                if let Some(pointer) = state.pointer.as_mut() {
                    pointer.handle_motion(global);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlCallback, usize> for HostState {
    fn event(
        state: &mut Self,
        _: &WlCallback,
        event: <WlCallback as Proxy>::Event,
        monitor_idx: &usize,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_callback::Event;

        if let Event::Done { .. } = event {
            if let Some(overlay) = state
                .overlays
                .iter_mut()
                .find(|o| o.monitor_idx == *monitor_idx)
            {
                overlay.frame_pending = false;
            }
        }
    }
}

impl Dispatch<WlBuffer, ()> for HostState {
    fn event(
        state: &mut Self,
        buffer: &WlBuffer,
        event: <WlBuffer as Proxy>::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use wayland_client::protocol::wl_buffer::Event;

        if let Event::Release = event {
            if let Some(overlay) = state.overlays.iter_mut().find(|o| o.owns_buffer(buffer)) {
                overlay.release_buffer(buffer);
            }
        }
    }
}

impl Dispatch<ZwlrLayerSurfaceV1, ()> for HostState {
    fn event(
        state: &mut Self,
        layer_surface: &ZwlrLayerSurfaceV1,
        event: zwlr_layer_surface_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_layer_surface_v1::Event::Configure { serial, .. } => {
                if let Some(overlay) = state
                    .overlays
                    .iter_mut()
                    .find(|o| &o.layer_surface == layer_surface)
                {
                    layer_surface.ack_configure(serial);
                    overlay.configured = true;
                    overlay.mark_dirty();
                    log::debug!("Acknowledged configure for overlay {}", overlay.monitor_idx);
                }
            }
            zwlr_layer_surface_v1::Event::Closed => {
                log::warn!("Layer surface closed by compositor");
                state.closed = true;
            }
            _ => {}
        }
    }
}

impl Dispatch<ZwlrScreencopyFrameV1, ()> for HostState {
    fn event(
        state: &mut Self,
        frame: &ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use zwlr_screencopy_frame_v1::{Event, Flags};

        let Some(idx) = state
            .pending_frames
            .iter()
            .find(|(f, _)| f == frame)
            .map(|(_, idx)| *idx)
        else {
            return;
        };

        match event {
            Event::Buffer {
                format,
                width,
                height,
                stride,
            } => {
                let WEnum::Value(format) = format else {
                    log::warn!("Screencopy offered an unknown format for monitor {}", idx);
                    return;
                };
                let Some(shm) = &state.shm else {
                    return;
                };
                let Some(monitor) = state.monitors.get_mut(idx) else {
                    return;
                };

                let pixel_size = Vector2D::new(width as f64, height as f64);
                let reusable = monitor
                    .capture_target
                    .as_ref()
                    .is_some_and(|b| b.matches(pixel_size, format, stride));
                if !reusable {
                    match PoolBuffer::new(pixel_size, format, stride, shm, qh) {
                        Ok(buffer) => monitor.capture_target = Some(buffer),
                        Err(e) => {
                            log::error!("Failed to create screencopy buffer: {:#}", e);
                            return;
                        }
                    }
                }

                // Before v3 there is no buffer_done; copy right away
                if frame.version() < 3 {
                    if let Some(buffer) = &monitor.capture_target {
                        frame.copy(&buffer.buffer);
                    }
                }
            }
            Event::BufferDone => {
                if let Some(buffer) = state
                    .monitors
                    .get(idx)
                    .and_then(|m| m.capture_target.as_ref())
                {
                    frame.copy(&buffer.buffer);
                }
            }
            Event::Flags { flags } => {
                if let (WEnum::Value(flags), Some(monitor)) = (flags, state.monitors.get_mut(idx)) {
                    monitor.capture_y_invert = flags.contains(Flags::YInvert);
                }
            }
            Event::Ready { .. } => {
                state.pending_frames.retain(|(f, _)| f != frame);
                frame.destroy();
                if let Some(monitor) = state.monitors.get_mut(idx) {
                    monitor.finish_capture();
                }
                let suppressed = state.capture_errors.clear();
                if suppressed > 0 {
                    log::info!("Screen capture recovered after {} repeated failures", suppressed);
                }
                log::trace!("Monitor {} screen capture complete", idx);
                state.mark_primary_dirty();
            }
            Event::Failed => {
                state.pending_frames.retain(|(f, _)| f != frame);
                frame.destroy();
                let message = format!("Screencopy frame failed for monitor {}", idx);
                if state.capture_errors.is_new(&message) {
                    log::warn!("{}", message);
                } else {
                    log::debug!("{}", message);
                }
            }
            _ => {}
        }
    }
}
