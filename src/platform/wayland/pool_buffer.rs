//! Shared memory buffers handed to the compositor.
//!
//! Each buffer is an unlinked file in XDG_RUNTIME_DIR, mapped into our
//! address space with memmap2 and shared with the compositor through a
//! `wl_shm` pool. Overlays draw into them with cairo; screencopy writes
//! captured frames into them.

use crate::utils::Vector2D;
use anyhow::{bail, Context, Result};
use cairo::{Context as CairoContext, Format, ImageSurface};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::io::AsFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use wayland_client::protocol::wl_shm::Format as ShmFormat;
use wayland_client::protocol::{wl_buffer::WlBuffer, wl_shm::WlShm, wl_shm_pool::WlShmPool};
use wayland_client::{Dispatch, QueueHandle};

static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(0);

pub struct PoolBuffer {
    pub buffer: WlBuffer,
    pub stride: u32,
    pub pixel_size: Vector2D,
    pub busy: bool,
    format: ShmFormat,
    cairo_format: Format,

    // Created on demand; must go before `map`
    cairo_surface: Option<ImageSurface>,
    map: MmapMut,
    _file: File,
}

impl PoolBuffer {
    /// Allocate a `pixel_size` buffer in `format` with `stride` bytes per row.
    pub fn new<T>(
        pixel_size: Vector2D,
        format: ShmFormat,
        stride: u32,
        shm: &WlShm,
        qh: &QueueHandle<T>,
    ) -> Result<Self>
    where
        T: Dispatch<WlShmPool, ()> + 'static,
        T: Dispatch<WlBuffer, ()> + 'static,
    {
        let size = stride as usize * pixel_size.y as usize;
        if size == 0 {
            bail!("Refusing to allocate an empty {}x{} buffer", pixel_size.x, pixel_size.y);
        }

        let file = create_shm_file(size)?;
        // SAFETY: the file is private to this process and the compositor, and
        // is never truncated after mapping.
        let map = unsafe { MmapMut::map_mut(&file) }.context("Failed to map shm file")?;

        let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());
        let buffer = pool.create_buffer(
            0,
            pixel_size.x as i32,
            pixel_size.y as i32,
            stride as i32,
            format,
            qh,
            (),
        );
        pool.destroy();

        Ok(Self {
            buffer,
            stride,
            pixel_size,
            busy: false,
            format,
            cairo_format: cairo_format_for(format),
            cairo_surface: None,
            map,
            _file: file,
        })
    }

    /// Whether this buffer has the layout the compositor asked for.
    pub fn matches(&self, pixel_size: Vector2D, format: ShmFormat, stride: u32) -> bool {
        self.pixel_size == pixel_size && self.format == format && self.stride == stride
    }

    /// Tell cairo the compositor wrote new pixels behind its back.
    pub fn mark_dirty(&self) {
        if let Some(surface) = &self.cairo_surface {
            surface.mark_dirty();
        }
    }

    /// Cairo view of the buffer memory, created on first use.
    pub fn cairo_surface(&mut self) -> Result<ImageSurface> {
        if let Some(surface) = &self.cairo_surface {
            return Ok(surface.clone());
        }

        // SAFETY: the mapping outlives the surface; Drop clears the surface
        // before the map is unmapped.
        let surface = unsafe {
            ImageSurface::create_for_data_unsafe(
                self.map.as_mut_ptr(),
                self.cairo_format,
                self.pixel_size.x as i32,
                self.pixel_size.y as i32,
                self.stride as i32,
            )?
        };
        self.cairo_surface = Some(surface.clone());
        Ok(surface)
    }

    pub fn create_cairo_context(&mut self) -> Result<CairoContext> {
        let surface = self.cairo_surface()?;
        Ok(CairoContext::new(&surface)?)
    }

    /// Fill the whole buffer with transparent pixels.
    pub fn clear(&mut self) -> Result<()> {
        let ctx = self.create_cairo_context()?;
        ctx.set_source_rgba(0.0, 0.0, 0.0, 0.0);
        ctx.set_operator(cairo::Operator::Source);
        ctx.paint()?;
        Ok(())
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if let Some(surface) = self.cairo_surface.take() {
            surface.finish();
        }
        self.buffer.destroy();
    }
}

fn cairo_format_for(format: ShmFormat) -> Format {
    match format {
        ShmFormat::Argb8888 => Format::ARgb32,
        ShmFormat::Xrgb8888 => Format::Rgb24,
        other => {
            log::warn!("Unsupported shm format {:?}, treating as ARGB8888", other);
            Format::ARgb32
        }
    }
}

fn create_shm_file(size: usize) -> Result<File> {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").context("XDG_RUNTIME_DIR not set")?;

    for _ in 0..16 {
        let path = PathBuf::from(&runtime_dir).join(format!(
            ".twinmag-{}-{}",
            std::process::id(),
            NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
        ));

        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                // Only the descriptor is needed from here on
                std::fs::remove_file(&path).ok();
                file.set_len(size as u64)
                    .context("Failed to size shm file")?;
                return Ok(file);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()));
            }
        }
    }

    bail!("Could not find a free shm file name in {}", runtime_dir)
}
