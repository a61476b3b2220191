//! Host platform seam.
//!
//! The driver never talks to a compositor directly. Everything it needs
//! from the desktop goes through [`Host`], and the one piece of shared
//! native state, the magnification subsystem, is reference counted by
//! [`Subsystem`] so it is brought up once and torn down once no matter how
//! many surfaces use it.

pub mod wayland;

use std::time::Duration;

use anyhow::Result;

use crate::error::MagnifierError;
use crate::utils::{Point, Rect};

/// Opaque handle to a magnifier surface created by a [`Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub usize);

pub trait Host {
    /// Bring up the shared magnification subsystem.
    fn initialize(&mut self) -> Result<()>;

    /// Tear down the shared magnification subsystem.
    fn uninitialize(&mut self);

    /// Create the `index`-th magnifier surface.
    fn create_surface(&mut self, index: usize, zoom_factor: f32) -> Result<SurfaceId>;

    fn destroy_surface(&mut self, surface: SurfaceId);

    /// Apply a linear zoom transform to a surface.
    fn set_transform(&mut self, surface: SurfaceId, zoom_factor: f32) -> Result<()>;

    /// Sample `rect` of the display into `surface`.
    fn set_source(&mut self, surface: SurfaceId, rect: Rect) -> Result<()>;

    fn cursor_position(&self) -> Point;

    fn display_bounds_containing(&self, point: Point) -> Rect;

    /// Pump host events for at most `timeout`. Returns `false` once the host
    /// has shut down and no more events will arrive.
    fn dispatch(&mut self, timeout: Duration) -> Result<bool>;

    /// Surface a failure to the user.
    fn notify(&mut self, error: &MagnifierError);
}

/// Reference count over the host's magnification subsystem.
#[derive(Debug, Default)]
pub struct Subsystem {
    refs: usize,
}

impl Subsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn references(&self) -> usize {
        self.refs
    }

    /// Take a reference, initializing the subsystem on the first one.
    pub fn acquire<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.refs == 0 {
            host.initialize()?;
            log::info!("Magnification subsystem initialized");
        }
        self.refs += 1;
        log::trace!("Subsystem acquired ({} references)", self.refs);
        Ok(())
    }

    /// Drop a reference, uninitializing the subsystem with the last one.
    pub fn release<H: Host + ?Sized>(&mut self, host: &mut H) {
        match self.refs {
            0 => {
                log::warn!("Subsystem released with no outstanding references, ignoring");
            }
            1 => {
                self.refs = 0;
                host.uninitialize();
                log::info!("Magnification subsystem released");
            }
            _ => {
                self.refs -= 1;
                log::trace!("Subsystem released ({} references)", self.refs);
            }
        }
    }
}

#[cfg(test)]
pub mod fake;

#[cfg(test)]
mod tests {
    use super::fake::{Call, FakeHost};
    use super::*;

    fn host() -> FakeHost {
        FakeHost::new(Rect::new(0, 0, 1920, 1080), Point::new(0, 0))
    }

    #[test]
    fn test_initializes_once_for_many_references() {
        let mut host = host();
        let mut subsystem = Subsystem::new();

        subsystem.acquire(&mut host).unwrap();
        subsystem.acquire(&mut host).unwrap();
        subsystem.acquire(&mut host).unwrap();
        assert_eq!(subsystem.references(), 3);
        assert_eq!(host.count(|c| *c == Call::Initialize), 1);

        subsystem.release(&mut host);
        subsystem.release(&mut host);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 0);
        subsystem.release(&mut host);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_extra_release_is_ignored() {
        let mut host = host();
        let mut subsystem = Subsystem::new();

        subsystem.acquire(&mut host).unwrap();
        subsystem.release(&mut host);
        subsystem.release(&mut host);
        subsystem.release(&mut host);
        assert_eq!(subsystem.references(), 0);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 1);
    }

    #[test]
    fn test_failed_initialize_takes_no_reference() {
        let mut host = host();
        host.fail_initialize = true;
        let mut subsystem = Subsystem::new();

        assert!(subsystem.acquire(&mut host).is_err());
        assert_eq!(subsystem.references(), 0);
        subsystem.release(&mut host);
        assert_eq!(host.count(|c| *c == Call::Uninitialize), 0);
    }
}
