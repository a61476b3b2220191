use super::pool_buffer::PoolBuffer;
use super::protocols::ZwlrLayerSurfaceV1;
use crate::utils::Vector2D;
use anyhow::Result;
use wayland_client::protocol::wl_shm::{self, WlShm};
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_callback::WlCallback, wl_shm_pool::WlShmPool, wl_surface::WlSurface,
};
use wayland_client::{Dispatch, QueueHandle};

/// Transparent full-screen layer surface covering one display.
///
/// Receives pointer input for that display and, on the primary display,
/// carries the magnifier panels.
pub struct Overlay {
    pub monitor_idx: usize,
    pub surface: WlSurface,
    pub layer_surface: ZwlrLayerSurfaceV1,
    pub configured: bool,

    // Double buffering
    pub last_buffer: usize,
    pub buffers: [Option<PoolBuffer>; 2],

    pub dirty: bool,
    pub frame_pending: bool,

    pub pixel_size: Vector2D,
    pub buffer_scale: i32,
}

impl Overlay {
    pub fn new(
        monitor_idx: usize,
        surface: WlSurface,
        layer_surface: ZwlrLayerSurfaceV1,
        pixel_size: Vector2D,
        buffer_scale: i32,
    ) -> Self {
        Self {
            monitor_idx,
            surface,
            layer_surface,
            configured: false,
            last_buffer: 0,
            buffers: [None, None],
            dirty: false,
            frame_pending: false,
            pixel_size,
            buffer_scale,
        }
    }

    pub fn ensure_buffers<T>(&mut self, shm: &WlShm, qh: &QueueHandle<T>) -> Result<()>
    where
        T: Dispatch<WlShmPool, ()> + 'static,
        T: Dispatch<WlBuffer, ()> + 'static,
    {
        let stride = (self.pixel_size.x as u32) * 4;
        for slot in self.buffers.iter_mut().filter(|b| b.is_none()) {
            let mut buffer =
                PoolBuffer::new(self.pixel_size, wl_shm::Format::Argb8888, stride, shm, qh)?;
            buffer.clear()?;
            *slot = Some(buffer);
        }
        Ok(())
    }

    /// The buffer not currently attached, unless the compositor still holds it.
    pub fn get_available_buffer(&mut self) -> Option<&mut PoolBuffer> {
        let next = 1 - self.last_buffer;
        self.buffers[next].as_mut().filter(|b| !b.busy)
    }

    pub fn owns_buffer(&self, buffer: &WlBuffer) -> bool {
        self.buffers
            .iter()
            .flatten()
            .any(|b| &b.buffer == buffer)
    }

    pub fn release_buffer(&mut self, buffer: &WlBuffer) {
        for b in self.buffers.iter_mut().flatten() {
            if &b.buffer == buffer {
                b.busy = false;
            }
        }
    }

    /// Attach the buffer last drawn by [`Overlay::get_available_buffer`].
    pub fn send_frame<T>(&mut self, qh: &QueueHandle<T>)
    where
        T: Dispatch<WlCallback, usize> + 'static,
    {
        self.last_buffer = 1 - self.last_buffer;

        if let Some(buffer) = &mut self.buffers[self.last_buffer] {
            self.surface.frame(qh, self.monitor_idx);
            self.frame_pending = true;
            buffer.busy = true;

            self.surface.damage_buffer(0, 0, i32::MAX, i32::MAX);
            self.surface.attach(Some(&buffer.buffer), 0, 0);
            self.surface.set_buffer_scale(self.buffer_scale);
            self.surface.commit();

            self.dirty = false;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn destroy(self) {
        self.layer_surface.destroy();
        self.surface.destroy();
        // buffers are destroyed on drop
    }
}
